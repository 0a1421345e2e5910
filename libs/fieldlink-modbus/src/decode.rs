//! Float32 register decoding
//!
//! Two holding registers carry one IEEE754 binary32 value. Devices disagree on
//! which register holds the high word and on the byte order inside a
//! register, so both are configurable:
//!
//! | Notation | Word order | Byte order |
//! |----------|------------|------------|
//! | ABCD     | big        | big        |
//! | CDAB     | little     | big        |
//! | BADC     | big        | little     |
//! | DCBA     | little     | little     |
//!
//! Decoding arranges the pair by word order, serializes each register by byte
//! order and reads the four bytes as a big-endian float.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModbusError, ModbusResult};

/// Which register of a pair holds the most significant 16 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// First register is the high word
    #[default]
    Big,
    /// First register is the low word
    Little,
}

/// Byte order inside one register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// High byte first
    #[default]
    Big,
    /// Low byte first
    Little,
}

/// Word and byte ordering for a register pair
///
/// Deserializes from either ABCD notation (`"CDAB"`) or the explicit
/// `{word, byte}` form; serializes to the explicit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "OrderNotation")]
pub struct RegisterOrder {
    pub word: WordOrder,
    pub byte: ByteOrder,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderNotation {
    Abcd(String),
    Explicit {
        #[serde(default)]
        word: WordOrder,
        #[serde(default)]
        byte: ByteOrder,
    },
}

impl TryFrom<OrderNotation> for RegisterOrder {
    type Error = String;

    fn try_from(notation: OrderNotation) -> Result<Self, Self::Error> {
        match notation {
            OrderNotation::Abcd(text) => Self::from_abcd(&text).ok_or_else(|| {
                format!("unknown register order '{text}', expected ABCD, CDAB, BADC or DCBA")
            }),
            OrderNotation::Explicit { word, byte } => Ok(Self::new(word, byte)),
        }
    }
}

impl RegisterOrder {
    pub const ABCD: Self = Self::new(WordOrder::Big, ByteOrder::Big);
    pub const CDAB: Self = Self::new(WordOrder::Little, ByteOrder::Big);
    pub const BADC: Self = Self::new(WordOrder::Big, ByteOrder::Little);
    pub const DCBA: Self = Self::new(WordOrder::Little, ByteOrder::Little);

    pub const fn new(word: WordOrder, byte: ByteOrder) -> Self {
        Self { word, byte }
    }

    /// Parse ABCD-style notation (case-insensitive)
    pub fn from_abcd(notation: &str) -> Option<Self> {
        match notation.to_ascii_uppercase().as_str() {
            "ABCD" => Some(Self::ABCD),
            "CDAB" => Some(Self::CDAB),
            "BADC" => Some(Self::BADC),
            "DCBA" => Some(Self::DCBA),
            _ => None,
        }
    }

    pub fn as_abcd(&self) -> &'static str {
        match (self.word, self.byte) {
            (WordOrder::Big, ByteOrder::Big) => "ABCD",
            (WordOrder::Little, ByteOrder::Big) => "CDAB",
            (WordOrder::Big, ByteOrder::Little) => "BADC",
            (WordOrder::Little, ByteOrder::Little) => "DCBA",
        }
    }

    fn arrange(&self, first: u16, second: u16) -> [u16; 2] {
        match self.word {
            WordOrder::Big => [first, second],
            WordOrder::Little => [second, first],
        }
    }

    fn register_bytes(&self, register: u16) -> [u8; 2] {
        match self.byte {
            ByteOrder::Big => register.to_be_bytes(),
            ByteOrder::Little => register.to_le_bytes(),
        }
    }

    fn register_from_bytes(&self, bytes: [u8; 2]) -> u16 {
        match self.byte {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        }
    }
}

impl std::fmt::Display for RegisterOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_abcd())
    }
}

/// Decode one float from exactly two registers, given in read order
pub fn decode_f32(pair: &[u16], order: RegisterOrder) -> ModbusResult<f32> {
    let [first, second] = pair else {
        return Err(ModbusError::decode(format!(
            "float32 needs 2 registers, got {}",
            pair.len()
        )));
    };

    let [high, low] = order.arrange(*first, *second);
    let [a, b] = order.register_bytes(high);
    let [c, d] = order.register_bytes(low);
    Ok(f32::from_be_bytes([a, b, c, d]))
}

/// Decode consecutive register pairs, returning the longest decodable prefix.
///
/// Stops at the first pair that fails; a trailing odd register is never padded.
pub fn decode_f32_prefix(registers: &[u16], order: RegisterOrder) -> Vec<f32> {
    let values: Vec<f32> = registers
        .chunks(2)
        .map_while(|pair| decode_f32(pair, order).ok())
        .collect();

    if values.len() * 2 < registers.len() {
        debug!(
            "Decoded {} of {} registers ({})",
            values.len() * 2,
            registers.len(),
            order
        );
    }
    values
}

/// Encode a float into two registers in read order
pub fn encode_f32(value: f32, order: RegisterOrder) -> [u16; 2] {
    let [a, b, c, d] = value.to_be_bytes();
    let high = order.register_from_bytes([a, b]);
    let low = order.register_from_bytes([c, d]);
    order.arrange(high, low)
}

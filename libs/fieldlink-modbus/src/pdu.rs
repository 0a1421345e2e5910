//! Modbus PDU data structure
//!
//! Use a fixed-size stack array to avoid heap allocation per request, plus the
//! request builders and response parsers for FC03 and FC06.

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
    MAX_READ_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                    fc,
                    function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            } else {
                debug!(
                    "PDU parsed: FC={:02X} ({}), data_len={}",
                    fc,
                    function_code_description(fc),
                    pdu.len - 1
                );
            }
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    /// Read a big-endian u16 at `offset`
    fn u16_at(&self, offset: usize) -> Option<u16> {
        (offset + 1 < self.len).then(|| u16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
    }

    /// Convert an exception response into a device error
    fn check_exception(&self, expected_fc: u8) -> ModbusResult<()> {
        if self.is_exception() {
            return Err(ModbusError::Device {
                function: expected_fc,
                code: self.exception_code().unwrap_or(0),
            });
        }

        match self.function_code() {
            Some(fc) if fc == expected_fc => Ok(()),
            Some(fc) => Err(ModbusError::protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                expected_fc, fc
            ))),
            None => Err(ModbusError::malformed("empty PDU")),
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable function code description
fn function_code_description(fc: u8) -> &'static str {
    match fc & !EXCEPTION_FLAG {
        0x03 => "Read Holding Registers",
        0x06 => "Write Single Register",
        _ => "Unknown Function",
    }
}

/// PDU builder - fluent API
#[derive(Default)]
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn value(mut self, value: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// FC03 request: start address + register count
    pub fn read_holding_registers(address: u16, count: u16) -> ModbusResult<ModbusPdu> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ModbusError::InvalidRequest(format!(
                "register count {} outside 1..={}",
                count, MAX_READ_REGISTERS
            )));
        }
        if u32::from(address) + u32::from(count) > 0x1_0000 {
            return Err(ModbusError::InvalidRequest(format!(
                "register range {}+{} exceeds address space",
                address, count
            )));
        }

        Ok(Self::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(address)?
            .quantity(count)?
            .build())
    }

    /// FC06 request: register address + value
    pub fn write_single_register(address: u16, value: u16) -> ModbusResult<ModbusPdu> {
        Ok(Self::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .address(address)?
            .value(value)?
            .build())
    }
}

/// Parse an FC03 response PDU into registers.
///
/// The payload must carry exactly `expected_count` registers; anything else is
/// rejected as malformed rather than partially parsed.
pub fn parse_read_holding_response(pdu: &ModbusPdu, expected_count: u16) -> ModbusResult<Vec<u16>> {
    pdu.check_exception(FC_READ_HOLDING_REGISTERS)?;

    let data = pdu.as_slice();
    if data.len() < 2 {
        return Err(ModbusError::malformed("FC03 response without byte count"));
    }

    let byte_count = data[1] as usize;
    let payload = &data[2..];
    if byte_count != payload.len() {
        return Err(ModbusError::malformed(format!(
            "byte count {} but {} payload bytes",
            byte_count,
            payload.len()
        )));
    }
    if byte_count != expected_count as usize * 2 {
        return Err(ModbusError::malformed(format!(
            "expected {} registers, got {} bytes",
            expected_count, byte_count
        )));
    }

    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Parse an FC06 response PDU; the device echoes address and value.
pub fn parse_write_single_response(pdu: &ModbusPdu, address: u16, value: u16) -> ModbusResult<()> {
    pdu.check_exception(FC_WRITE_SINGLE_REGISTER)?;

    match (pdu.u16_at(1), pdu.u16_at(3)) {
        (Some(a), Some(v)) if a == address && v == value => Ok(()),
        (Some(a), Some(v)) => Err(ModbusError::malformed(format!(
            "write echo mismatch: sent {}={}, device echoed {}={}",
            address, value, a, v
        ))),
        _ => Err(ModbusError::malformed("FC06 response too short")),
    }
}

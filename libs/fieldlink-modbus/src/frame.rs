//! Modbus TCP framing
//!
//! MBAP header encoding and response validation. One request is in flight per
//! connection, so a response is matched against the single outstanding
//! transaction instead of a pending-request table.

use tracing::debug;

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (fixed to 0)
    pub protocol_id: u16,
    /// Length field (unit id + PDU)
    pub length: u16,
    /// Unit identifier
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the 7 leading bytes of a frame
    pub fn parse(data: &[u8]) -> ModbusResult<Self> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusError::protocol("TCP frame too short"));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }
}

/// Per-connection frame encoder/decoder
#[derive(Debug)]
pub struct FrameCodec {
    next_transaction_id: u16,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            next_transaction_id: 1,
        }
    }

    /// Get next transaction ID - wraps naturally from 0xFFFF to 0x0000
    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build complete TCP frame (MBAP + PDU), returning its transaction id
    pub fn encode(&mut self, unit_id: u8, pdu: &ModbusPdu) -> (u16, Vec<u8>) {
        let transaction_id = self.next_transaction_id();
        let length = (pdu.len() + 1) as u16; // PDU length + unit_id

        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol_id
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu.as_slice());

        debug!(
            "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, PDU_len={}",
            transaction_id,
            unit_id,
            pdu.function_code().unwrap_or(0),
            pdu.len()
        );

        (transaction_id, frame)
    }

    /// Validate a received frame against the outstanding request and extract its PDU
    pub fn decode(
        &self,
        data: &[u8],
        expected_transaction: u16,
        expected_unit: u8,
    ) -> ModbusResult<ModbusPdu> {
        let header = MbapHeader::parse(data)?;

        if header.protocol_id != 0 {
            return Err(ModbusError::protocol(format!(
                "Invalid protocol ID: expected 0, got {}",
                header.protocol_id
            )));
        }

        let length = header.length as usize;
        if length == 0 || length > MAX_MBAP_LENGTH {
            return Err(ModbusError::protocol(format!(
                "Invalid TCP frame length: {}",
                length
            )));
        }
        if data.len() != MBAP_HEADER_LEN + length {
            return Err(ModbusError::protocol(format!(
                "Invalid TCP frame length: expected {}, got {}",
                MBAP_HEADER_LEN + length,
                data.len()
            )));
        }

        if header.transaction_id != expected_transaction {
            return Err(ModbusError::protocol(format!(
                "Unexpected transaction ID: expected {:04X}, got {:04X}",
                expected_transaction, header.transaction_id
            )));
        }
        if header.unit_id != expected_unit {
            return Err(ModbusError::protocol(format!(
                "Unexpected unit ID: expected {}, got {}",
                expected_unit, header.unit_id
            )));
        }

        ModbusPdu::from_slice(&data[MBAP_HEADER_LEN + 1..])
    }
}

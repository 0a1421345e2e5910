//! Modbus protocol constants based on official specification
//!
//! Only the subset needed for FC03/FC06 over TCP is kept here.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP, excluding the unit identifier
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes
/// The unit identifier is counted by the Length field.
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Response PDU: Function Code (1) + Byte Count (1) + N × 2 ≤ 253
/// → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Function Codes
// ============================================================================

/// FC03 - Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// FC06 - Write Single Register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Exception Codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Unit identifier meaning "not significant" on Modbus TCP
pub const UNIT_ID_NOT_USED: u8 = 0xFF;

/// Human-readable exception code description
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Server Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Server Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

//! Fieldlink Modbus
//!
//! Register access for a single Modbus-TCP field device. The library covers
//! exactly two function codes, FC03 (read holding registers) and FC06 (write
//! single register), plus everything needed to turn holding registers into
//! IEEE754 float32 readings.
//!
//! # Architecture
//!
//! ```text
//! fieldlink-modbus
//!     ├── pdu / frame        (PDU builder + MBAP framing)
//!     ├── connection         (TCP stream with connect/read timeouts)
//!     ├── client             (RegisterClient + Connector seams, TCP implementation)
//!     ├── negotiator         (ordered call-convention adapters)
//!     ├── decode             (word/byte ordering, float32 decoding)
//!     └── simulator          (in-process device, `simulator` feature)
//! ```
//!
//! Every request goes through the [`Negotiator`], which tries the call
//! conventions a [`RegisterClient`] may accept in a fixed priority order.

pub mod client;
pub mod connection;
pub mod constants;
pub mod decode;
pub mod error;
pub mod frame;
pub mod negotiator;
pub mod pdu;

#[cfg(feature = "simulator")]
pub mod simulator;

pub use client::{
    Connector, DeviceEndpoint, LegacyField, RegisterClient, TcpConnector, TcpRegisterClient,
    UnitSelector,
};
pub use decode::{decode_f32, decode_f32_prefix, encode_f32, ByteOrder, RegisterOrder, WordOrder};
pub use error::{ModbusError, ModbusResult};
pub use negotiator::{Attempt, CallAdapter, Negotiator};
pub use pdu::{ModbusPdu, PduBuilder};

//! Modbus TCP simulator for testing
//!
//! In-memory Modbus TCP device serving FC03 and FC06 over a real socket.
//! Holding registers are zero-initialised and 0-based. Exceptions can be
//! injected per read start address or per write address.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE,
    EXCEPTION_ILLEGAL_FUNCTION, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER,
    MAX_MBAP_LENGTH, MAX_READ_REGISTERS, MBAP_HEADER_LEN,
};
use crate::decode::{encode_f32, RegisterOrder};

#[derive(Default)]
struct DeviceState {
    holding_registers: HashMap<u16, u16>,
    /// Read start address -> exception code
    read_faults: HashMap<u16, u8>,
    /// Write address -> exception code
    write_faults: HashMap<u16, u8>,
    /// Writes acknowledged but not stored
    read_only: HashSet<u16>,
    /// (start, count) of every FC03 request served
    reads: Vec<(u16, u16)>,
    /// (address, value) of every FC06 request served
    writes: Vec<(u16, u16)>,
}

/// Simple Modbus TCP simulator
#[derive(Clone, Default)]
pub struct ModbusSimulator {
    state: Arc<RwLock<DeviceState>>,
}

impl ModbusSimulator {
    /// Create new simulator
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        self.state
            .write()
            .await
            .holding_registers
            .insert(address, value);
    }

    pub async fn set_registers(&self, start: u16, values: &[u16]) {
        let mut state = self.state.write().await;
        for (offset, value) in values.iter().enumerate() {
            state
                .holding_registers
                .insert(start.wrapping_add(offset as u16), *value);
        }
    }

    /// Store floats as consecutive register pairs starting at `start`
    pub async fn set_f32_values(&self, start: u16, values: &[f32], order: RegisterOrder) {
        let registers: Vec<u16> = values.iter().flat_map(|v| encode_f32(*v, order)).collect();
        self.set_registers(start, &registers).await;
    }

    pub async fn register(&self, address: u16) -> u16 {
        self.state
            .read()
            .await
            .holding_registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Answer FC03 requests starting at `start` with an exception
    pub async fn fail_reads_at(&self, start: u16, exception_code: u8) {
        self.state.write().await.read_faults.insert(start, exception_code);
    }

    /// Answer FC06 requests to `address` with an exception
    pub async fn fail_writes_at(&self, address: u16, exception_code: u8) {
        self.state
            .write()
            .await
            .write_faults
            .insert(address, exception_code);
    }

    /// Acknowledge writes to `address` without storing them
    pub async fn make_read_only(&self, address: u16) {
        self.state.write().await.read_only.insert(address);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.read_faults.clear();
        state.write_faults.clear();
        state.read_only.clear();
    }

    /// FC03 requests served so far, as (start, count)
    pub async fn reads(&self) -> Vec<(u16, u16)> {
        self.state.read().await.reads.clone()
    }

    /// FC06 requests served so far, as (address, value)
    pub async fn writes(&self) -> Vec<(u16, u16)> {
        self.state.read().await.writes.clone()
    }

    /// Start simulator server on 127.0.0.1; port 0 picks a free port
    pub async fn start(&self, port: u16) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Modbus simulator listening on {}", local_addr);

        let sim = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let sim = sim.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sim.handle_connection(stream).await {
                                debug!("Connection closed: {}", e);
                            }
                        });
                    },
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break;
                    },
                }
            }
        });

        Ok(local_addr)
    }

    /// Serve one connection until the peer closes it
    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; MBAP_HEADER_LEN];
            match stream.read_exact(&mut header).await {
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }

            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let protocol_id = u16::from_be_bytes([header[2], header[3]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            if length < 2 || length > MAX_MBAP_LENGTH {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad MBAP length {length}"),
                ));
            }

            let mut body = vec![0u8; length];
            stream.read_exact(&mut body).await?;
            if protocol_id != 0 {
                continue; // Not Modbus protocol
            }

            let unit_id = body[0];
            let response_pdu = self.process_pdu(&body[1..]).await;
            debug!(
                "Transaction: {}, Unit: {}, Function: 0x{:02X}",
                transaction_id, unit_id, body[1]
            );

            let mut response = Vec::with_capacity(MBAP_HEADER_LEN + 1 + response_pdu.len());
            response.extend_from_slice(&transaction_id.to_be_bytes());
            response.extend_from_slice(&[0x00, 0x00]); // Protocol ID
            response.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
            response.push(unit_id);
            response.extend_from_slice(&response_pdu);
            stream.write_all(&response).await?;
        }
    }

    async fn process_pdu(&self, pdu: &[u8]) -> Vec<u8> {
        let function_code = pdu[0];
        if pdu.len() < 5 {
            return exception(function_code, EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let operand = u16::from_be_bytes([pdu[3], pdu[4]]);

        match function_code {
            FC_READ_HOLDING_REGISTERS => self.read_holding_registers(address, operand).await,
            FC_WRITE_SINGLE_REGISTER => self.write_single_register(address, operand).await,
            _ => exception(function_code, EXCEPTION_ILLEGAL_FUNCTION),
        }
    }

    /// Read holding registers (Function 0x03)
    async fn read_holding_registers(&self, start: u16, count: u16) -> Vec<u8> {
        let mut state = self.state.write().await;
        state.reads.push((start, count));

        if let Some(code) = state.read_faults.get(&start) {
            return exception(FC_READ_HOLDING_REGISTERS, *code);
        }
        if count == 0 || count > MAX_READ_REGISTERS {
            return exception(FC_READ_HOLDING_REGISTERS, EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        if u32::from(start) + u32::from(count) > 0x1_0000 {
            return exception(FC_READ_HOLDING_REGISTERS, EXCEPTION_ILLEGAL_DATA_ADDRESS);
        }

        let mut response = Vec::with_capacity(2 + count as usize * 2);
        response.push(FC_READ_HOLDING_REGISTERS);
        response.push((count * 2) as u8); // Byte count
        for offset in 0..count {
            let value = state
                .holding_registers
                .get(&(start + offset))
                .copied()
                .unwrap_or(0);
            response.extend_from_slice(&value.to_be_bytes());
        }
        response
    }

    /// Write single register (Function 0x06)
    async fn write_single_register(&self, address: u16, value: u16) -> Vec<u8> {
        let mut state = self.state.write().await;
        state.writes.push((address, value));

        if let Some(code) = state.write_faults.get(&address) {
            return exception(FC_WRITE_SINGLE_REGISTER, *code);
        }
        if !state.read_only.contains(&address) {
            state.holding_registers.insert(address, value);
        }

        // Echo request
        let mut response = vec![FC_WRITE_SINGLE_REGISTER];
        response.extend_from_slice(&address.to_be_bytes());
        response.extend_from_slice(&value.to_be_bytes());
        response
    }
}

fn exception(function_code: u8, code: u8) -> Vec<u8> {
    vec![function_code | EXCEPTION_FLAG, code]
}

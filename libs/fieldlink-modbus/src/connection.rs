//! Modbus TCP Connection
//!
//! A single TCP stream to the device. Connect, send and receive are each
//! bounded by a timeout so no operation blocks indefinitely.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};

/// Open TCP connection to a Modbus device
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: String,
}

impl TcpConnection {
    /// Create a TCP connection
    pub async fn connect(host: &str, port: u16, timeout_duration: Duration) -> ModbusResult<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }

                info!("TCP connected: {}", addr);
                Ok(Self { stream, peer: addr })
            },
            Ok(Err(e)) => {
                warn!("TCP err: {} - {}", addr, e);
                Err(ModbusError::connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(ModbusError::timeout(format!(
                    "Connection to {addr} timed out"
                )))
            },
        }
    }

    /// Send a complete frame
    pub async fn send(&mut self, data: &[u8], timeout_duration: Duration) -> ModbusResult<()> {
        match timeout(timeout_duration, self.stream.write_all(data)).await {
            Ok(Ok(())) => {
                debug!("TCP TX: {}B", data.len());
                Ok(())
            },
            Ok(Err(e)) => Err(ModbusError::Io(format!("TCP send error: {e}"))),
            Err(_) => Err(ModbusError::timeout("TCP send timeout")),
        }
    }

    /// Receive one complete Modbus TCP frame
    ///
    /// Frame: [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]
    pub async fn receive_frame(&mut self, timeout_duration: Duration) -> ModbusResult<Vec<u8>> {
        let mut header = [0u8; MBAP_HEADER_LEN];
        self.read_exact(&mut header, timeout_duration, "header").await?;

        // Length covers unit id + PDU: 1..=254
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || length > MAX_MBAP_LENGTH {
            return Err(ModbusError::protocol(format!(
                "Invalid TCP frame length: {}",
                length
            )));
        }

        let mut frame = vec![0u8; MBAP_HEADER_LEN + length];
        frame[..MBAP_HEADER_LEN].copy_from_slice(&header);
        self.read_exact(&mut frame[MBAP_HEADER_LEN..], timeout_duration, "PDU")
            .await?;

        debug!("TCP RX: {}B", frame.len());
        Ok(frame)
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout_duration: Duration,
        part: &str,
    ) -> ModbusResult<()> {
        match timeout(timeout_duration, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ModbusError::Io(format!("TCP {part} read error: {e}"))),
            Err(_) => Err(ModbusError::timeout(format!("TCP {part} read timeout"))),
        }
    }

    /// Shut down the write half; the socket is released on drop
    pub async fn close(mut self) -> ModbusResult<()> {
        self.stream.shutdown().await?;
        debug!("TCP closed: {}", self.peer);
        Ok(())
    }
}

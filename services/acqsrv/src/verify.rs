//! Write-then-verify
//!
//! Writes one holding register on a dedicated connection and reads it back.
//! Outcomes are values, not errors: a write the device acknowledged stays a
//! success even when the read-back fails.

use std::sync::Arc;

use fieldlink_modbus::{Connector, DeviceEndpoint, Negotiator, RegisterClient};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome tag of one write-verify run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    ConnectFailed,
    WriteError,
    /// Write acknowledged, read-back failed
    ReadError,
    Ok,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    pub outcome: WriteOutcome,
    pub address: u16,
    pub wrote: u16,
    pub readback: Option<u16>,
    /// Error text for the failing step
    pub detail: Option<String>,
}

impl WriteResult {
    fn failed(outcome: WriteOutcome, address: u16, wrote: u16, detail: String) -> Self {
        Self {
            outcome,
            address,
            wrote,
            readback: None,
            detail: Some(detail),
        }
    }

    /// True once the device acknowledged the write
    pub fn ok(&self) -> bool {
        matches!(self.outcome, WriteOutcome::Ok | WriteOutcome::ReadError)
    }

    /// True if the read-back matches the written value
    pub fn verified(&self) -> bool {
        self.readback == Some(self.wrote)
    }

    pub fn to_payload(&self) -> WritePayload {
        match self.outcome {
            WriteOutcome::Ok => WritePayload::success(WriteDetail {
                wrote: self.wrote,
                readback: self.readback,
                verify: None,
            }),
            WriteOutcome::ReadError => WritePayload::success(WriteDetail {
                wrote: self.wrote,
                readback: None,
                verify: Some("read_error".to_string()),
            }),
            WriteOutcome::ConnectFailed => WritePayload::failure("connect_failed".to_string()),
            WriteOutcome::WriteError => WritePayload::failure(format!(
                "write_error:{}",
                self.detail.as_deref().unwrap_or_default()
            )),
        }
    }
}

/// Wire shape of a write-verify result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePayload {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WriteDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WritePayload {
    fn success(detail: WriteDetail) -> Self {
        Self {
            ok: true,
            result: Some(detail),
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDetail {
    pub wrote: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readback: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
}

/// Runs write-verify against any endpoint
#[derive(Clone)]
pub struct WriteVerifier {
    connector: Arc<dyn Connector>,
    negotiator: Negotiator,
}

impl WriteVerifier {
    pub fn new(connector: Arc<dyn Connector>, negotiator: Negotiator) -> Self {
        Self {
            connector,
            negotiator,
        }
    }

    /// Write `value` to `address`, then read it back
    pub async fn write_and_verify(
        &self,
        endpoint: &DeviceEndpoint,
        address: u16,
        value: u16,
    ) -> WriteResult {
        let mut client = match self.connector.connect(endpoint).await {
            Ok(client) => client,
            Err(e) => {
                warn!("Write {}@{}: connect failed: {}", address, endpoint.address(), e);
                return WriteResult::failed(
                    WriteOutcome::ConnectFailed,
                    address,
                    value,
                    e.to_string(),
                );
            },
        };

        let result = self
            .run(client.as_mut(), endpoint.unit_id, address, value)
            .await;

        if let Err(e) = client.close().await {
            debug!("Close {}: {}", endpoint.address(), e);
        }
        result
    }

    async fn run(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> WriteResult {
        if let Err(e) = self
            .negotiator
            .write_register(client, unit, address, value)
            .await
        {
            warn!("Write {}={} failed: {}", address, value, e);
            return WriteResult::failed(WriteOutcome::WriteError, address, value, e.to_string());
        }

        match self.negotiator.read_holding(client, unit, address, 1).await {
            Ok(registers) if !registers.is_empty() => {
                let readback = registers[0];
                if readback == value {
                    info!("Write {}={} verified", address, value);
                } else {
                    warn!("Write {}={} read back {}", address, value, readback);
                }
                WriteResult {
                    outcome: WriteOutcome::Ok,
                    address,
                    wrote: value,
                    readback: Some(readback),
                    detail: None,
                }
            },
            Ok(_) => {
                warn!("Write {}={} acknowledged, read-back empty", address, value);
                WriteResult::failed(
                    WriteOutcome::ReadError,
                    address,
                    value,
                    "empty read-back".to_string(),
                )
            },
            Err(e) => {
                warn!("Write {}={} acknowledged, read-back failed: {}", address, value, e);
                WriteResult::failed(WriteOutcome::ReadError, address, value, e.to_string())
            },
        }
    }
}

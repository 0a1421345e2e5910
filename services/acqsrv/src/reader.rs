//! Block reader
//!
//! One acquisition cycle: connect, read every configured [`RegisterBlock`] in
//! order, decode, close. A required block that fails aborts the cycle; an
//! optional block that fails is logged and left out of the reading. A block
//! with a fallback start is re-read there when the primary read fails or comes
//! back all zeros.

use std::sync::Arc;

use fieldlink_modbus::{
    decode_f32_prefix, Connector, DeviceEndpoint, ModbusError, ModbusResult, Negotiator,
    RegisterClient, RegisterOrder,
};
use tracing::{debug, info, warn};

use crate::config::{Config, RegisterBlock};
use crate::error::CycleError;
use crate::snapshot::DecodedReading;

/// Reads the configured register blocks from one device
#[derive(Clone)]
pub struct BlockReader {
    connector: Arc<dyn Connector>,
    negotiator: Negotiator,
    endpoint: DeviceEndpoint,
    blocks: Vec<RegisterBlock>,
    order: RegisterOrder,
}

impl BlockReader {
    pub fn new(
        connector: Arc<dyn Connector>,
        negotiator: Negotiator,
        endpoint: DeviceEndpoint,
        blocks: Vec<RegisterBlock>,
        order: RegisterOrder,
    ) -> Self {
        Self {
            connector,
            negotiator,
            endpoint,
            blocks,
            order,
        }
    }

    pub fn from_config(config: &Config, connector: Arc<dyn Connector>) -> Self {
        Self::new(
            connector,
            Negotiator::default(),
            config.device.endpoint(),
            config.blocks.clone(),
            config.decode,
        )
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Run one cycle; the connection is closed on every path
    pub async fn read_cycle(&self) -> Result<DecodedReading, CycleError> {
        let mut client = self
            .connector
            .connect(&self.endpoint)
            .await
            .map_err(CycleError::Connect)?;

        let result = self.read_blocks(client.as_mut()).await;

        if let Err(e) = client.close().await {
            debug!("Close {}: {}", self.endpoint.address(), e);
        }
        result
    }

    async fn read_blocks(
        &self,
        client: &mut dyn RegisterClient,
    ) -> Result<DecodedReading, CycleError> {
        let mut reading = DecodedReading::default();

        for (index, block) in self.blocks.iter().enumerate() {
            let registers = match self.read_block(client, block).await {
                Ok(registers) => registers,
                Err(source) if block.required => {
                    warn!("Required block {} failed: {}", block.name, source);
                    return Err(CycleError::RequiredBlock {
                        block: block.name.clone(),
                        source,
                    });
                },
                Err(e) => {
                    warn!("Block {} omitted: {}", block.name, e);
                    continue;
                },
            };

            let values = decode_f32_prefix(&registers, self.order);
            if block.required && values.len() * 2 < registers.len() {
                return Err(CycleError::Decode {
                    block: block.name.clone(),
                    decoded: values.len(),
                    expected: registers.len() / 2,
                });
            }

            if index == 0 {
                let [float1, float2, ..] = values.as_slice() else {
                    return Err(CycleError::Decode {
                        block: block.name.clone(),
                        decoded: values.len(),
                        expected: 2,
                    });
                };
                reading.float1 = *float1;
                reading.float2 = *float2;
            }
            reading.raw.extend_from_slice(&registers);
            reading.values.extend(values);
        }

        debug!(
            "Cycle: {} values from {} registers",
            reading.values.len(),
            reading.raw.len()
        );
        Ok(reading)
    }

    /// Primary read, then the fallback start if the primary is unusable
    async fn read_block(
        &self,
        client: &mut dyn RegisterClient,
        block: &RegisterBlock,
    ) -> ModbusResult<Vec<u16>> {
        let primary = self.read_range(client, block.start, block.count).await;

        let Some(fallback) = block.fallback_start else {
            return primary;
        };
        match primary {
            Ok(registers) if registers.iter().any(|r| *r != 0) => Ok(registers),
            Ok(_) => {
                info!(
                    "Block {} all zero at {}, trying {}",
                    block.name, block.start, fallback
                );
                self.read_range(client, fallback, block.count).await
            },
            Err(e) => {
                info!(
                    "Block {} failed at {} ({}), trying {}",
                    block.name, block.start, e, fallback
                );
                self.read_range(client, fallback, block.count).await
            },
        }
    }

    async fn read_range(
        &self,
        client: &mut dyn RegisterClient,
        start: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        let registers = self
            .negotiator
            .read_holding(client, self.endpoint.unit_id, start, count)
            .await?;

        if registers.is_empty() {
            return Err(ModbusError::malformed(format!(
                "no registers at {}",
                start
            )));
        }
        if registers.len() != count as usize {
            return Err(ModbusError::malformed(format!(
                "expected {} registers at {}, got {}",
                count,
                start,
                registers.len()
            )));
        }
        Ok(registers)
    }
}

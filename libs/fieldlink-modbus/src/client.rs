//! Register client seam
//!
//! [`RegisterClient`] is the connection object requests are issued against.
//! Each request names its target unit through a [`UnitSelector`]; a client that
//! does not understand a selector shape answers [`ModbusError::Unsupported`],
//! which is what lets the negotiator move on to the next convention.
//!
//! [`TcpRegisterClient`] is the production client. It holds one TCP stream and
//! reopens it lazily after a transport failure.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::TcpConnection;
use crate::constants::UNIT_ID_NOT_USED;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameCodec;
use crate::pdu::{
    parse_read_holding_response, parse_write_single_response, ModbusPdu, PduBuilder,
};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Historical field names for the unit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyField {
    Slave,
    Unit,
}

impl LegacyField {
    pub fn name(&self) -> &'static str {
        match self {
            LegacyField::Slave => "slave",
            LegacyField::Unit => "unit",
        }
    }
}

/// How a request names its target unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSelector {
    /// Named `device_id` parameter
    DeviceId(u8),
    /// Named legacy parameter (`slave` or `unit`)
    Legacy(LegacyField, u8),
    /// Unit passed positionally
    Positional(u8),
    /// No identifier on the call; the client's session unit applies
    Session,
}

impl fmt::Display for UnitSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSelector::DeviceId(unit) => write!(f, "device_id={}", unit),
            UnitSelector::Legacy(field, unit) => write!(f, "{}={}", field.name(), unit),
            UnitSelector::Positional(unit) => write!(f, "positional({})", unit),
            UnitSelector::Session => write!(f, "session"),
        }
    }
}

/// Where and how to reach one Modbus-TCP device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `host:port` form used in logs
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection object that register requests are issued against
#[async_trait]
pub trait RegisterClient: Send {
    /// FC03
    async fn read_holding_registers(
        &mut self,
        selector: UnitSelector,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>>;

    /// FC06
    async fn write_single_register(
        &mut self,
        selector: UnitSelector,
        address: u16,
        value: u16,
    ) -> ModbusResult<()>;

    /// Unit used for [`UnitSelector::Session`] calls
    fn session_unit(&self) -> Option<u8> {
        None
    }

    /// Set the session unit. Returns false if the client keeps no session unit.
    fn set_session_unit(&mut self, _unit: Option<u8>) -> bool {
        false
    }

    /// Release the underlying transport
    async fn close(&mut self) -> ModbusResult<()>;
}

/// Opens a fresh client for one acquisition or write cycle
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &DeviceEndpoint) -> ModbusResult<Box<dyn RegisterClient>>;
}

/// Connector producing [`TcpRegisterClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &DeviceEndpoint) -> ModbusResult<Box<dyn RegisterClient>> {
        let client = TcpRegisterClient::connect(endpoint.clone()).await?;
        Ok(Box::new(client))
    }
}

/// Modbus-TCP register client
#[derive(Debug)]
pub struct TcpRegisterClient {
    endpoint: DeviceEndpoint,
    connection: Option<TcpConnection>,
    codec: FrameCodec,
    session_unit: Option<u8>,
}

impl TcpRegisterClient {
    /// Connect eagerly so an unreachable device fails here
    pub async fn connect(endpoint: DeviceEndpoint) -> ModbusResult<Self> {
        let connection =
            TcpConnection::connect(&endpoint.host, endpoint.port, endpoint.connect_timeout)
                .await?;

        Ok(Self {
            endpoint,
            connection: Some(connection),
            codec: FrameCodec::new(),
            session_unit: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn resolve_unit(&self, selector: UnitSelector) -> ModbusResult<u8> {
        match selector {
            UnitSelector::DeviceId(unit) | UnitSelector::Positional(unit) => Ok(unit),
            UnitSelector::Session => Ok(self.session_unit.unwrap_or(UNIT_ID_NOT_USED)),
            UnitSelector::Legacy(field, _) => Err(ModbusError::unsupported(format!(
                "unknown parameter '{}'",
                field.name()
            ))),
        }
    }

    async fn ensure_connected(&mut self) -> ModbusResult<()> {
        if self.connection.is_none() {
            info!("Reconnecting: {}", self.endpoint.address());
            let connection = TcpConnection::connect(
                &self.endpoint.host,
                self.endpoint.port,
                self.endpoint.connect_timeout,
            )
            .await?;
            self.connection = Some(connection);
        }
        Ok(())
    }

    /// One request/response exchange
    async fn transact(&mut self, unit: u8, pdu: &ModbusPdu) -> ModbusResult<ModbusPdu> {
        self.ensure_connected().await?;
        let timeout = self.endpoint.request_timeout;
        let (transaction_id, frame) = self.codec.encode(unit, pdu);

        let Some(connection) = self.connection.as_mut() else {
            return Err(ModbusError::NotConnected);
        };
        let received = async {
            connection.send(&frame, timeout).await?;
            connection.receive_frame(timeout).await
        }
        .await;

        let result = received.and_then(|raw| self.codec.decode(&raw, transaction_id, unit));

        if let Err(e) = &result {
            // A stream that lost frame sync is as unusable as a dead one
            if e.needs_reconnect() || matches!(e, ModbusError::Protocol(_)) {
                warn!("Dropping connection to {}: {}", self.endpoint.address(), e);
                self.connection = None;
            }
        }
        result
    }
}

#[async_trait]
impl RegisterClient for TcpRegisterClient {
    async fn read_holding_registers(
        &mut self,
        selector: UnitSelector,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        let unit = self.resolve_unit(selector)?;
        let request = PduBuilder::read_holding_registers(address, count)?;
        debug!("FC03 {} addr={} count={}", selector, address, count);

        let response = self.transact(unit, &request).await?;
        parse_read_holding_response(&response, count)
    }

    async fn write_single_register(
        &mut self,
        selector: UnitSelector,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        let unit = self.resolve_unit(selector)?;
        let request = PduBuilder::write_single_register(address, value)?;
        debug!("FC06 {} addr={} value={}", selector, address, value);

        let response = self.transact(unit, &request).await?;
        parse_write_single_response(&response, address, value)
    }

    fn session_unit(&self) -> Option<u8> {
        self.session_unit
    }

    fn set_session_unit(&mut self, unit: Option<u8>) -> bool {
        self.session_unit = unit;
        true
    }

    async fn close(&mut self) -> ModbusResult<()> {
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

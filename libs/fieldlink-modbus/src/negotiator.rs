//! Call-convention negotiation
//!
//! Field firmware and client stacks disagree on how a request names its unit.
//! The [`Negotiator`] walks an ordered list of [`CallAdapter`] strategies and
//! uses the first one the client accepts. An adapter reports
//! [`Attempt::Rejected`] only when the client refuses the call shape; any other
//! outcome, success or failure, is final for that call.
//!
//! Default order:
//! 1. [`NamedDeviceId`]
//! 2. [`LegacyName`] (`slave`, then `unit`)
//! 3. [`Positional`]
//! 4. [`SessionUnit`]: set the client's session unit, call without an
//!    identifier, restore the previous session unit.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{LegacyField, RegisterClient, UnitSelector};
use crate::error::{ModbusError, ModbusResult};

/// Outcome of one adapter attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// The client accepted the call shape; carries the call result
    Accepted(ModbusResult<T>),
    /// The client refused the call shape
    Rejected(String),
}

impl<T> Attempt<T> {
    fn from_result(result: ModbusResult<T>) -> Self {
        match result {
            Err(ModbusError::Unsupported(reason)) => Attempt::Rejected(reason),
            other => Attempt::Accepted(other),
        }
    }
}

/// One way of issuing a register call
#[async_trait]
pub trait CallAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_read(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Attempt<Vec<u16>>;

    async fn try_write(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Attempt<()>;
}

/// Unit passed as `device_id`
#[derive(Debug, Clone, Copy)]
pub struct NamedDeviceId;

#[async_trait]
impl CallAdapter for NamedDeviceId {
    fn name(&self) -> &'static str {
        "device_id"
    }

    async fn try_read(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Attempt<Vec<u16>> {
        let result = client
            .read_holding_registers(UnitSelector::DeviceId(unit), address, count)
            .await;
        Attempt::from_result(result)
    }

    async fn try_write(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Attempt<()> {
        let result = client
            .write_single_register(UnitSelector::DeviceId(unit), address, value)
            .await;
        Attempt::from_result(result)
    }
}

/// Unit passed under a historical parameter name
#[derive(Debug, Clone, Copy)]
pub struct LegacyName(pub LegacyField);

#[async_trait]
impl CallAdapter for LegacyName {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn try_read(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Attempt<Vec<u16>> {
        let result = client
            .read_holding_registers(UnitSelector::Legacy(self.0, unit), address, count)
            .await;
        Attempt::from_result(result)
    }

    async fn try_write(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Attempt<()> {
        let result = client
            .write_single_register(UnitSelector::Legacy(self.0, unit), address, value)
            .await;
        Attempt::from_result(result)
    }
}

/// Unit passed positionally
#[derive(Debug, Clone, Copy)]
pub struct Positional;

#[async_trait]
impl CallAdapter for Positional {
    fn name(&self) -> &'static str {
        "positional"
    }

    async fn try_read(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Attempt<Vec<u16>> {
        let result = client
            .read_holding_registers(UnitSelector::Positional(unit), address, count)
            .await;
        Attempt::from_result(result)
    }

    async fn try_write(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Attempt<()> {
        let result = client
            .write_single_register(UnitSelector::Positional(unit), address, value)
            .await;
        Attempt::from_result(result)
    }
}

/// Unit set on the client for the duration of one call
#[derive(Debug, Clone, Copy)]
pub struct SessionUnit;

/// Restores the client's previous session unit when dropped, including when
/// the call future is cancelled mid-flight.
struct SessionGuard<'a> {
    client: &'a mut dyn RegisterClient,
    previous: Option<u8>,
}

impl<'a> SessionGuard<'a> {
    /// Returns None if the client keeps no session unit
    fn install(client: &'a mut dyn RegisterClient, unit: u8) -> Option<Self> {
        let previous = client.session_unit();
        if !client.set_session_unit(Some(unit)) {
            return None;
        }
        Some(Self { client, previous })
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.client.set_session_unit(self.previous);
    }
}

#[async_trait]
impl CallAdapter for SessionUnit {
    fn name(&self) -> &'static str {
        "session_unit"
    }

    async fn try_read(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Attempt<Vec<u16>> {
        let Some(mut guard) = SessionGuard::install(client, unit) else {
            return Attempt::Rejected("client has no session unit".to_string());
        };
        let result = guard
            .client
            .read_holding_registers(UnitSelector::Session, address, count)
            .await;
        drop(guard);
        Attempt::from_result(result)
    }

    async fn try_write(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Attempt<()> {
        let Some(mut guard) = SessionGuard::install(client, unit) else {
            return Attempt::Rejected("client has no session unit".to_string());
        };
        let result = guard
            .client
            .write_single_register(UnitSelector::Session, address, value)
            .await;
        drop(guard);
        Attempt::from_result(result)
    }
}

/// Ordered call-convention policy shared by the read and write paths
#[derive(Clone)]
pub struct Negotiator {
    adapters: Arc<Vec<Box<dyn CallAdapter>>>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::with_adapters(vec![
            Box::new(NamedDeviceId),
            Box::new(LegacyName(LegacyField::Slave)),
            Box::new(LegacyName(LegacyField::Unit)),
            Box::new(Positional),
            Box::new(SessionUnit),
        ])
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("adapters", &self.adapter_names())
            .finish()
    }
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(adapters: Vec<Box<dyn CallAdapter>>) -> Self {
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Read holding registers using the first accepted convention
    pub async fn read_holding(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        for adapter in self.adapters.iter() {
            match adapter.try_read(client, unit, address, count).await {
                Attempt::Accepted(result) => {
                    debug!("Read via {}: addr={} count={}", adapter.name(), address, count);
                    return result;
                },
                Attempt::Rejected(reason) => {
                    debug!("Read convention {} rejected: {}", adapter.name(), reason);
                },
            }
        }

        warn!("No read convention accepted (addr={})", address);
        Err(ModbusError::Capability {
            operation: "read_holding_registers",
            attempted: self.adapters.len(),
        })
    }

    /// Write a single register using the first accepted convention
    pub async fn write_register(
        &self,
        client: &mut dyn RegisterClient,
        unit: u8,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        for adapter in self.adapters.iter() {
            match adapter.try_write(client, unit, address, value).await {
                Attempt::Accepted(result) => {
                    debug!("Write via {}: addr={} value={}", adapter.name(), address, value);
                    return result;
                },
                Attempt::Rejected(reason) => {
                    debug!("Write convention {} rejected: {}", adapter.name(), reason);
                },
            }
        }

        warn!("No write convention accepted (addr={})", address);
        Err(ModbusError::Capability {
            operation: "write_single_register",
            attempted: self.adapters.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    /// Client that only understands one selector shape and records every call
    struct PickyClient {
        accepts: fn(&UnitSelector) -> bool,
        session: Option<u8>,
        has_session: bool,
        calls: Vec<(UnitSelector, Option<u8>)>,
        reply: ModbusResult<Vec<u16>>,
    }

    impl PickyClient {
        fn new(accepts: fn(&UnitSelector) -> bool) -> Self {
            Self {
                accepts,
                session: Some(9),
                has_session: true,
                calls: Vec::new(),
                reply: Ok(vec![1, 2]),
            }
        }

        fn check(&mut self, selector: UnitSelector) -> ModbusResult<()> {
            self.calls.push((selector, self.session));
            if (self.accepts)(&selector) {
                Ok(())
            } else {
                Err(ModbusError::unsupported(format!("rejects {}", selector)))
            }
        }
    }

    #[async_trait]
    impl RegisterClient for PickyClient {
        async fn read_holding_registers(
            &mut self,
            selector: UnitSelector,
            _address: u16,
            _count: u16,
        ) -> ModbusResult<Vec<u16>> {
            self.check(selector)?;
            self.reply.clone()
        }

        async fn write_single_register(
            &mut self,
            selector: UnitSelector,
            _address: u16,
            _value: u16,
        ) -> ModbusResult<()> {
            self.check(selector)?;
            self.reply.clone().map(|_| ())
        }

        fn session_unit(&self) -> Option<u8> {
            self.session
        }

        fn set_session_unit(&mut self, unit: Option<u8>) -> bool {
            if self.has_session {
                self.session = unit;
            }
            self.has_session
        }

        async fn close(&mut self) -> ModbusResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_order() {
        assert_eq!(
            Negotiator::default().adapter_names(),
            vec!["device_id", "slave", "unit", "positional", "session_unit"]
        );
    }

    #[tokio::test]
    async fn test_first_convention_wins() {
        let mut client = PickyClient::new(|_| true);
        let regs = Negotiator::default()
            .read_holding(&mut client, 1, 125, 2)
            .await
            .unwrap();

        assert_eq!(regs, vec![1, 2]);
        assert_eq!(client.calls.len(), 1);
        assert_eq!(client.calls[0].0, UnitSelector::DeviceId(1));
    }

    #[tokio::test]
    async fn test_legacy_names_tried_in_order() {
        let mut client =
            PickyClient::new(|s| matches!(s, UnitSelector::Legacy(LegacyField::Unit, _)));
        Negotiator::default()
            .write_register(&mut client, 4, 125, 0)
            .await
            .unwrap();

        let selectors: Vec<_> = client.calls.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            selectors,
            vec![
                UnitSelector::DeviceId(4),
                UnitSelector::Legacy(LegacyField::Slave, 4),
                UnitSelector::Legacy(LegacyField::Unit, 4),
            ]
        );
    }

    #[tokio::test]
    async fn test_session_unit_restored_after_success() {
        let mut client = PickyClient::new(|s| matches!(s, UnitSelector::Session));
        Negotiator::default()
            .read_holding(&mut client, 3, 125, 2)
            .await
            .unwrap();

        // The session call saw unit 3, the prior value is back afterwards
        assert_eq!(client.calls.last(), Some(&(UnitSelector::Session, Some(3))));
        assert_eq!(client.session, Some(9));
    }

    #[tokio::test]
    async fn test_session_unit_restored_after_device_error() {
        let mut client = PickyClient::new(|s| matches!(s, UnitSelector::Session));
        client.reply = Err(ModbusError::Device {
            function: 0x03,
            code: 0x02,
        });

        let err = Negotiator::default()
            .read_holding(&mut client, 3, 125, 2)
            .await
            .unwrap_err();

        assert!(err.is_device_error());
        assert_eq!(client.session, Some(9));
    }

    #[tokio::test]
    async fn test_session_unit_restored_when_cancelled() {
        struct HangingClient {
            session: Option<u8>,
        }

        #[async_trait]
        impl RegisterClient for HangingClient {
            async fn read_holding_registers(
                &mut self,
                _selector: UnitSelector,
                _address: u16,
                _count: u16,
            ) -> ModbusResult<Vec<u16>> {
                std::future::pending().await
            }

            async fn write_single_register(
                &mut self,
                _selector: UnitSelector,
                _address: u16,
                _value: u16,
            ) -> ModbusResult<()> {
                std::future::pending().await
            }

            fn session_unit(&self) -> Option<u8> {
                self.session
            }

            fn set_session_unit(&mut self, unit: Option<u8>) -> bool {
                self.session = unit;
                true
            }

            async fn close(&mut self) -> ModbusResult<()> {
                Ok(())
            }
        }

        let mut client = HangingClient { session: None };
        let negotiator = Negotiator::with_adapters(vec![Box::new(SessionUnit)]);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            negotiator.read_holding(&mut client, 7, 0, 1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(client.session, None);
    }

    #[tokio::test]
    async fn test_device_error_is_final() {
        let mut client = PickyClient::new(|_| true);
        client.reply = Err(ModbusError::timeout("read"));

        let err = Negotiator::default()
            .read_holding(&mut client, 1, 125, 2)
            .await
            .unwrap_err();

        assert!(matches!(err, ModbusError::Timeout(_)));
        assert_eq!(client.calls.len(), 1);
    }

    #[tokio::test]
    async fn test_all_rejected_is_capability_error() {
        let mut client = PickyClient::new(|_| false);
        client.has_session = false;

        let err = Negotiator::default()
            .read_holding(&mut client, 1, 125, 2)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ModbusError::Capability {
                operation: "read_holding_registers",
                attempted: 5
            }
        );
        // Session adapter bailed out before issuing a call
        assert_eq!(client.calls.len(), 4);
        assert_eq!(client.session, Some(9));
    }
}

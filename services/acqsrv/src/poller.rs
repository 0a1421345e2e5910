//! Background acquisition
//!
//! [`AcquisitionEngine::refresh`] is the one code path that turns a device
//! cycle into a published snapshot; the poller and on-demand status refreshes
//! both go through it. The poller runs one cycle, sleeps, repeats. Cycles never
//! overlap, and cancellation is observed only between cycles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CycleError;
use crate::reader::BlockReader;
use crate::snapshot::{Snapshot, SnapshotStore};

/// Cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub last_error: Option<String>,
}

/// Reader plus the store it publishes into
pub struct AcquisitionEngine {
    reader: BlockReader,
    store: Arc<SnapshotStore>,
    cycles_ok: AtomicU64,
    cycles_failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl AcquisitionEngine {
    pub fn new(reader: BlockReader, store: Arc<SnapshotStore>) -> Self {
        Self {
            reader,
            store,
            cycles_ok: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn reader(&self) -> &BlockReader {
        &self.reader
    }

    /// Run one cycle; publish on success, keep the previous snapshot on failure
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, CycleError> {
        match self.reader.read_cycle().await {
            Ok(reading) => {
                self.cycles_ok.fetch_add(1, Ordering::Relaxed);
                let snapshot = self.store.replace(reading);
                debug!("Snapshot #{} published", snapshot.sequence);
                Ok(snapshot)
            },
            Err(e) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(e.to_string());
                warn!("Poll failed ({}): {}", e.kind(), e);
                Err(e)
            },
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cycles_ok: self.cycles_ok.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Periodic driver for an [`AcquisitionEngine`]
pub struct Poller {
    engine: Arc<AcquisitionEngine>,
    interval: Duration,
}

impl Poller {
    pub fn new(engine: Arc<AcquisitionEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Start the loop on the runtime
    pub fn spawn(self) -> PollerHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(self.run(task_token));
        PollerHandle { token, handle }
    }

    async fn run(self, token: CancellationToken) {
        info!(
            "Poller started: {} every {:?}",
            self.engine.reader().endpoint().address(),
            self.interval
        );

        while !token.is_cancelled() {
            // Result already logged and counted by the engine
            let _ = self.engine.refresh().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                () = token.cancelled() => break,
            }
        }

        info!("Poller stopped");
    }
}

/// Stops a spawned [`Poller`]
pub struct PollerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancel and wait for the in-flight cycle, if any, to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::FakeDevice;
    use fieldlink_modbus::ModbusError;
    use tracing_test::traced_test;

    fn engine_for(device: &FakeDevice) -> Arc<AcquisitionEngine> {
        let reader = BlockReader::from_config(&Config::default(), Arc::new(device.clone()));
        Arc::new(AcquisitionEngine::new(reader, Arc::new(SnapshotStore::new())))
    }

    #[tokio::test]
    async fn test_refresh_publishes() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);
        let engine = engine_for(&device);

        let snapshot = engine.refresh().await.unwrap();

        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.reading.float1, 20.0);
        assert_eq!(engine.store().read().sequence, 1);
        assert_eq!(engine.stats().cycles_ok, 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);
        let engine = engine_for(&device);
        engine.refresh().await.unwrap();
        let before = engine.store().read();

        device.fail_read(
            125,
            ModbusError::Device {
                function: 0x03,
                code: 0x04,
            },
        );
        assert!(engine.refresh().await.is_err());
        device.refuse_connections(true);
        assert!(engine.refresh().await.is_err());

        let after = engine.store().read();
        assert_eq!(*before, *after);

        let stats = engine.stats();
        assert_eq!(stats.cycles_failed, 2);
        assert!(stats.last_error.unwrap().starts_with("connect failed"));
    }

    #[tokio::test]
    async fn test_poller_runs_until_stopped() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);
        let engine = engine_for(&device);

        let handle = Poller::new(engine.clone(), Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        let cycles = device.opened();
        assert!(cycles >= 2, "only {cycles} cycles ran");
        // Every cycle closed its connection
        assert_eq!(device.closed(), cycles);
        assert_eq!(engine.store().read().sequence as usize, cycles);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.opened(), cycles);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_poller_logs_device_address() {
        let device = FakeDevice::new();
        let engine = engine_for(&device);

        let handle = Poller::new(engine, Duration::from_secs(3600)).spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;

        assert!(logs_contain("Poller started: 127.0.0.1:502"));
        assert!(logs_contain("Poller stopped"));
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);
        let engine = engine_for(&device);

        let handle = Poller::new(engine, Duration::from_secs(3600)).spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
        assert_eq!(device.opened(), 1);
    }

    #[tokio::test]
    async fn test_poller_survives_failing_device() {
        let device = FakeDevice::new();
        device.refuse_connections(true);
        let engine = engine_for(&device);

        let handle = Poller::new(engine.clone(), Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        device.refuse_connections(false);
        device.set_registers(125, &[16800, 0, 16800, 0]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        let stats = engine.stats();
        assert!(stats.cycles_failed >= 1);
        assert!(stats.cycles_ok >= 1);
        assert_eq!(engine.store().read().reading.float1, 20.0);
    }
}

//! acqsrv - Modbus-TCP acquisition service
//!
//! Polls one field device for holding registers, decodes them into float32
//! readings and publishes the latest reading as a snapshot. A write-then-verify
//! primitive backs the reset commands.
//!
//! ```text
//! Poller ──> AcquisitionEngine ──> BlockReader ──> Negotiator ──> device
//!                   │                    └──> decode_f32_prefix
//!                   └──> SnapshotStore <── GET /status
//! WriteVerifier <── POST /reset/{target}, POST /write
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod reader;
pub mod shutdown;
pub mod snapshot;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, RegisterBlock};
pub use error::{AcqError, CycleError, Result};
pub use poller::{AcquisitionEngine, Poller, PollerHandle};
pub use reader::BlockReader;
pub use snapshot::{DecodedReading, Snapshot, SnapshotStore};
pub use verify::{WriteOutcome, WriteResult, WriteVerifier};

/// Service information
pub const SERVICE_NAME: &str = "acqsrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

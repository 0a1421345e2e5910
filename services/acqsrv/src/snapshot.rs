//! Latest-reading publication
//!
//! The store holds one immutable [`Snapshot`] behind an `Arc`. Replacing swaps
//! the pointer under a short write lock; readers clone the `Arc` and never see
//! fields from two different cycles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One decoded acquisition cycle
///
/// Non-finite floats (a device's "no value" pattern decodes to NaN) serialize
/// as `null` and deserialize back as NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedReading {
    /// First float of the first block
    #[serde(with = "float_or_null")]
    pub float1: f32,
    /// Second float of the first block
    #[serde(with = "float_or_null")]
    pub float2: f32,
    /// Every decoded float, first block first
    #[serde(with = "floats_or_null")]
    pub values: Vec<f32>,
    /// Every register read, in read order, decoded or not
    pub raw: Vec<u16>,
}

mod float_or_null {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        value.is_finite().then_some(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
    }
}

mod floats_or_null {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let values = Vec::<Option<f32>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }
}

/// A published reading plus publication metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub reading: DecodedReading,
    /// 0 until the first successful cycle
    pub sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            reading: DecodedReading::default(),
            sequence: 0,
            updated_at: None,
        }
    }
}

/// Shared holder of the current snapshot
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Store holding the zeroed initial reading
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::initial())),
        }
    }

    /// Current snapshot; never waits on an in-flight cycle
    pub fn read(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Install a new reading wholesale and return its snapshot
    pub fn replace(&self, reading: DecodedReading) -> Arc<Snapshot> {
        let mut current = self.current.write();
        // Sequence assigned under the lock so it follows installation order
        let snapshot = Arc::new(Snapshot {
            reading,
            sequence: current.sequence + 1,
            updated_at: Some(Utc::now()),
        });
        *current = Arc::clone(&snapshot);
        snapshot
    }
}

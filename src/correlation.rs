//! Correlation ids and the records that carry them to the sink.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Opaque token tying a logged request to its logged response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Source of correlation ids. Called concurrently from every request.
pub trait CorrelationIdGenerator: Send + Sync + 'static {
    fn next(&self) -> CorrelationId;
}

impl<F> CorrelationIdGenerator for F
where
    F: Fn() -> CorrelationId + Send + Sync + 'static,
{
    fn next(&self) -> CorrelationId {
        self()
    }
}

/// 64 random bits from the thread-local CSPRNG, as 16 hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCorrelationId;

impl CorrelationIdGenerator for RandomCorrelationId {
    fn next(&self) -> CorrelationId {
        CorrelationId(format!("{:016x}", rand::random::<u64>()))
    }
}

/// Process start time combined with an atomic counter.
///
/// Ids are ordered within one process and unique across restarts that are at
/// least a second apart.
#[derive(Debug)]
pub struct SequentialCorrelationId {
    start_time: u64,
    counter: AtomicU64,
}

impl SequentialCorrelationId {
    pub fn new() -> Self {
        let start_time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            start_time,
            counter: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialCorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIdGenerator for SequentialCorrelationId {
    fn next(&self) -> CorrelationId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        // High 32 bits: process start timestamp, Low 32 bits: counter
        let id = (self.start_time << 32) | (counter & 0xFFFF_FFFF);
        CorrelationId(format!("{id:016x}"))
    }
}

/// Handed to the sink with the request, before any response exists.
#[derive(Debug, Clone)]
pub struct Precorrelation {
    id: CorrelationId,
    started_at: SystemTime,
    started: Instant,
}

impl Precorrelation {
    pub(crate) fn new(id: CorrelationId) -> Self {
        Self {
            id,
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// When the logical request entered the interceptor.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub(crate) fn correlate(&self) -> Correlation {
        Correlation {
            id: self.id.clone(),
            started_at: self.started_at,
            duration: self.started.elapsed(),
        }
    }
}

/// Handed to the sink with the response.
#[derive(Debug, Clone)]
pub struct Correlation {
    id: CorrelationId,
    started_at: SystemTime,
    duration: Duration,
}

impl Correlation {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Time from interception until the response was final.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

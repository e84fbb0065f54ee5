//! Error types for the logging pipeline.
//!
//! Capture problems never show up here: they degrade the affected body to
//! [`CapturedBody::Skipped`](crate::CapturedBody::Skipped) or
//! [`CapturedBody::Truncated`](crate::CapturedBody::Truncated), and errors of
//! the wrapped body stream are forwarded with their original type.

use std::fmt;
use tower::BoxError;

use crate::correlation::CorrelationId;

/// Failure reported by a [`Sink`](crate::Sink), its formatter or its writer.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to format HTTP message: {0}")]
    Format(#[source] BoxError),
    #[error("failed to write HTTP log record: {0}")]
    Write(#[source] BoxError),
}

impl SinkError {
    pub fn format(error: impl Into<BoxError>) -> Self {
        SinkError::Format(error.into())
    }

    pub fn write(error: impl Into<BoxError>) -> Self {
        SinkError::Write(error.into())
    }
}

/// Which of the two writes failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The pre-correlation write of the request.
    Request,
    /// The correlation write of the response.
    Response,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Request => f.write_str("request"),
            Phase::Response => f.write_str("response"),
        }
    }
}

/// Pipeline fault surfaced to the interception point's caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sink failed to write {phase} for correlation {correlation_id}: {source}")]
    Sink {
        correlation_id: CorrelationId,
        phase: Phase,
        #[source]
        source: SinkError,
    },
}

impl Error {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Error::Sink { correlation_id, .. } => correlation_id,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Error::Sink { phase, .. } => *phase,
        }
    }
}

#![allow(dead_code)]

use logbook::{
    CapturedRequest, CapturedResponse, Correlation, CorrelationId, Precorrelation, Sink,
    SinkError,
};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One logged request/response pair.
#[derive(Debug, Clone)]
pub struct Pair {
    pub id: CorrelationId,
    pub request: CapturedRequest,
    pub response: CapturedResponse,
    pub duration: Duration,
}

/// Test sink that collects all records for verification
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    requests: Arc<Mutex<Vec<(CorrelationId, CapturedRequest)>>>,
    pairs: Arc<Mutex<Vec<Pair>>>,
    failed_responses: Arc<AtomicUsize>,
    inactive: bool,
    fail_requests: bool,
    fail_responses: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inactive() -> Self {
        Self {
            inactive: true,
            ..Self::default()
        }
    }

    pub fn failing_requests() -> Self {
        Self {
            fail_requests: true,
            ..Self::default()
        }
    }

    pub fn failing_responses() -> Self {
        Self {
            fail_responses: true,
            ..Self::default()
        }
    }

    /// Response writes this sink rejected.
    pub fn failed_responses(&self) -> usize {
        self.failed_responses.load(Ordering::SeqCst)
    }

    /// Waits until `expected` response writes were rejected.
    pub async fn wait_for_failed_responses(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.failed_responses() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn requests(&self) -> Vec<(CorrelationId, CapturedRequest)> {
        self.requests.lock().clone()
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.lock().clone()
    }

    /// Responses of streamed bodies are written when the stream ends, which
    /// can trail the client seeing the last byte.
    pub async fn wait_for_pairs(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.pairs.lock().len() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Sink for RecordingSink {
    fn is_active(&self) -> bool {
        !self.inactive
    }

    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError> {
        if self.fail_requests {
            return Err(SinkError::write(io::Error::other("log volume unavailable")));
        }
        self.requests
            .lock()
            .push((precorrelation.id().clone(), request.clone()));
        Ok(())
    }

    fn write_response(
        &self,
        correlation: &Correlation,
        request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError> {
        if self.fail_responses {
            self.failed_responses.fetch_add(1, Ordering::SeqCst);
            return Err(SinkError::write(io::Error::other("log volume unavailable")));
        }
        self.pairs.lock().push(Pair {
            id: correlation.id().clone(),
            request: request.clone(),
            response: response.clone(),
            duration: correlation.duration(),
        });
        Ok(())
    }
}

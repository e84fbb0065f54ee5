//! Composite sink for fanning records out to several sinks.
//!
//! This module provides [`MultiSink`], which composes an arbitrary number of
//! [`Sink`] implementations. Every inner sink receives every write, in the
//! order the sinks were added.
//!
//! # Example
//!
//! ```rust
//! use logbook::{DefaultSink, DefaultHttpLogFormatter, JsonHttpLogFormatter, MultiSink, TracingHttpLogWriter};
//!
//! let sink = MultiSink::new()
//!     .with(DefaultSink::new(JsonHttpLogFormatter, TracingHttpLogWriter::default()))
//!     .with(DefaultSink::new(DefaultHttpLogFormatter, TracingHttpLogWriter::default()));
//!
//! assert_eq!(sink.len(), 2);
//! ```

use std::sync::Arc;
use tracing::warn;

use crate::correlation::{Correlation, Precorrelation};
use crate::error::SinkError;
use crate::sink::Sink;
use crate::types::{CapturedRequest, CapturedResponse};

/// A sink that delegates to multiple inner sinks.
///
/// The composite is active while any inner sink is. Activity is only asked
/// for once per logical request, so once the composite is active every inner
/// sink receives both the request and the response record, even one that
/// turned inactive in between. A failing sink does not stop the others from
/// receiving the record; the first failure is returned once all of them ran.
#[derive(Clone, Default)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to the chain. Returns self for builder pattern.
    pub fn with<S: Sink>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    fn each(
        &self,
        mut write: impl FnMut(&dyn Sink) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(error) = write(sink.as_ref()) {
                match first_error {
                    None => first_error = Some(error),
                    Some(_) => warn!(error = %error, "additional sink failure"),
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Sink for MultiSink {
    fn is_active(&self) -> bool {
        self.sinks.iter().any(|sink| sink.is_active())
    }

    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError> {
        self.each(|sink| sink.write_request(precorrelation, request))
    }

    fn write_response(
        &self,
        correlation: &Correlation,
        request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError> {
        self.each(|sink| sink.write_response(correlation, request, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::types::{CapturedBody, HttpHeaders};
    use axum::http::{Method, StatusCode, Uri, Version};
    use parking_lot::Mutex;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Test sink that counts calls
    #[derive(Default)]
    struct CountingSink {
        inactive: Arc<AtomicBool>,
        fail: bool,
        request_count: Arc<AtomicUsize>,
        response_count: Arc<AtomicUsize>,
    }

    impl Sink for CountingSink {
        fn is_active(&self) -> bool {
            !self.inactive.load(Ordering::SeqCst)
        }

        fn write_request(&self, _: &Precorrelation, _: &CapturedRequest) -> Result<(), SinkError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::write(io::Error::other("disk full")));
            }
            Ok(())
        }

        fn write_response(
            &self,
            _: &Correlation,
            _: &CapturedRequest,
            _: &CapturedResponse,
        ) -> Result<(), SinkError> {
            self.response_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_request() -> CapturedRequest {
        CapturedRequest::new(
            Method::GET,
            Uri::from_static("/test"),
            Version::HTTP_11,
            HttpHeaders::new(),
            CapturedBody::empty(),
        )
    }

    fn test_response() -> CapturedResponse {
        CapturedResponse::new(
            Version::HTTP_11,
            StatusCode::CREATED,
            HttpHeaders::new(),
            CapturedBody::empty(),
        )
    }

    #[test]
    fn test_multi_sink_empty() {
        let sink = MultiSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);
        assert!(!sink.is_active());

        let precorrelation = Precorrelation::new(CorrelationId::new("1"));
        sink.write_request(&precorrelation, &test_request()).unwrap();
    }

    #[test]
    fn test_multi_sink_active_if_any_sink_is() {
        let inactive = || CountingSink {
            inactive: Arc::new(AtomicBool::new(true)),
            ..CountingSink::default()
        };

        assert!(!MultiSink::new().with(inactive()).with(inactive()).is_active());
        assert!(MultiSink::new()
            .with(inactive())
            .with(CountingSink::default())
            .is_active());
    }

    #[test]
    fn test_sink_turning_inactive_still_gets_its_response() {
        let flaky = CountingSink::default();
        let steady = CountingSink::default();
        let toggle = flaky.inactive.clone();
        let (flaky_requests, flaky_responses) =
            (flaky.request_count.clone(), flaky.response_count.clone());
        let steady_responses = steady.response_count.clone();

        let sink = MultiSink::new().with(flaky).with(steady);
        assert!(sink.is_active());

        let precorrelation = Precorrelation::new(CorrelationId::new("42"));
        sink.write_request(&precorrelation, &test_request()).unwrap();
        toggle.store(true, Ordering::SeqCst);
        sink.write_response(&precorrelation.correlate(), &test_request(), &test_response())
            .unwrap();

        assert_eq!(flaky_requests.load(Ordering::SeqCst), 1);
        assert_eq!(flaky_responses.load(Ordering::SeqCst), 1);
        assert_eq!(steady_responses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_does_not_stop_other_sinks() {
        let failing = CountingSink {
            fail: true,
            ..CountingSink::default()
        };
        let healthy = CountingSink::default();
        let healthy_requests = healthy.request_count.clone();

        let sink = MultiSink::new().with(failing).with(healthy);
        let precorrelation = Precorrelation::new(CorrelationId::new("7"));
        let error = sink
            .write_request(&precorrelation, &test_request())
            .unwrap_err();

        assert!(matches!(error, SinkError::Write(_)));
        assert_eq!(healthy_requests.load(Ordering::SeqCst), 1);
    }

    /// Sink that records which correlation ids it saw
    #[derive(Default)]
    struct RecordingSink {
        ids: Arc<Mutex<Vec<CorrelationId>>>,
    }

    impl Sink for RecordingSink {
        fn write_request(&self, p: &Precorrelation, _: &CapturedRequest) -> Result<(), SinkError> {
            self.ids.lock().push(p.id().clone());
            Ok(())
        }

        fn write_response(
            &self,
            c: &Correlation,
            _: &CapturedRequest,
            _: &CapturedResponse,
        ) -> Result<(), SinkError> {
            self.ids.lock().push(c.id().clone());
            Ok(())
        }
    }

    #[test]
    fn test_sinks_receive_same_correlation() {
        let first = RecordingSink::default();
        let second = RecordingSink::default();
        let (first_ids, second_ids) = (first.ids.clone(), second.ids.clone());

        let sink = MultiSink::new().with(first).with(second);
        let precorrelation = Precorrelation::new(CorrelationId::new("c0ffee"));
        sink.write_request(&precorrelation, &test_request()).unwrap();
        sink.write_response(&precorrelation.correlate(), &test_request(), &test_response())
            .unwrap();

        let expected = vec![CorrelationId::new("c0ffee"); 2];
        assert_eq!(*first_ids.lock(), expected);
        assert_eq!(*second_ids.lock(), expected);
    }
}

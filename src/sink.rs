//! The outbound contract of the pipeline.
//!
//! A [`Sink`] receives two calls per logical request: the pre-correlation
//! write of the request and the correlation write of the response, both
//! carrying the same correlation id. [`DefaultSink`] splits that work between
//! an [`HttpLogFormatter`] and an [`HttpLogWriter`].

use std::sync::Arc;

use crate::correlation::{Correlation, Precorrelation};
use crate::error::SinkError;
use crate::format::HttpLogFormatter;
use crate::types::{CapturedRequest, CapturedResponse};
use crate::writer::HttpLogWriter;

/// Trait for handling captured request and response data.
///
/// Implement this trait to send captured traffic anywhere. Calls happen inline
/// on the request's task, so implementations should hand slow I/O off rather
/// than block.
///
/// # Examples
///
/// ```rust
/// use logbook::{CapturedRequest, CapturedResponse, Correlation, Precorrelation, Sink, SinkError};
/// use tracing::info;
///
/// #[derive(Debug)]
/// struct MySink;
///
/// impl Sink for MySink {
///     fn write_request(
///         &self,
///         precorrelation: &Precorrelation,
///         request: &CapturedRequest,
///     ) -> Result<(), SinkError> {
///         info!(id = %precorrelation.id(), "{} {}", request.method(), request.uri());
///         Ok(())
///     }
///
///     fn write_response(
///         &self,
///         correlation: &Correlation,
///         _request: &CapturedRequest,
///         response: &CapturedResponse,
///     ) -> Result<(), SinkError> {
///         info!(id = %correlation.id(), "{} in {:?}", response.status(), correlation.duration());
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send + Sync + 'static {
    /// Polled once per logical request before any capture work. An inactive
    /// sink turns the middleware into a pass-through.
    fn is_active(&self) -> bool {
        true
    }

    /// Pre-correlation write, before the application produced a response.
    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError>;

    /// Correlation write, once the response is final.
    fn write_response(
        &self,
        correlation: &Correlation,
        request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError> {
        (**self).write_request(precorrelation, request)
    }

    fn write_response(
        &self,
        correlation: &Correlation,
        request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError> {
        (**self).write_response(correlation, request, response)
    }
}

/// Formats each message and passes the result to a writer.
#[derive(Debug, Clone, Default)]
pub struct DefaultSink<F, W> {
    formatter: F,
    writer: W,
}

impl<F, W> DefaultSink<F, W>
where
    F: HttpLogFormatter,
    W: HttpLogWriter,
{
    pub fn new(formatter: F, writer: W) -> Self {
        Self { formatter, writer }
    }
}

impl<F, W> Sink for DefaultSink<F, W>
where
    F: HttpLogFormatter,
    W: HttpLogWriter,
{
    fn is_active(&self) -> bool {
        self.writer.is_active()
    }

    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError> {
        let formatted = self.formatter.format_request(precorrelation, request)?;
        self.writer.write_request(precorrelation, &formatted)
    }

    fn write_response(
        &self,
        correlation: &Correlation,
        _request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError> {
        let formatted = self.formatter.format_response(correlation, response)?;
        self.writer.write_response(correlation, &formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::format::DefaultHttpLogFormatter;
    use crate::types::{CapturedBody, HttpHeaders};
    use axum::http::{Method, StatusCode, Uri, Version};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        active: bool,
        records: Mutex<Vec<(String, String)>>,
    }

    impl HttpLogWriter for RecordingWriter {
        fn is_active(&self) -> bool {
            self.active
        }

        fn write_request(
            &self,
            precorrelation: &Precorrelation,
            formatted: &str,
        ) -> Result<(), SinkError> {
            self.records
                .lock()
                .push((precorrelation.id().to_string(), formatted.to_owned()));
            Ok(())
        }

        fn write_response(&self, correlation: &Correlation, formatted: &str) -> Result<(), SinkError> {
            self.records
                .lock()
                .push((correlation.id().to_string(), formatted.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn test_default_sink_formats_then_writes() {
        let sink = DefaultSink::new(
            DefaultHttpLogFormatter,
            RecordingWriter {
                active: true,
                ..RecordingWriter::default()
            },
        );
        assert!(sink.is_active());

        let precorrelation = Precorrelation::new(CorrelationId::new("c0ffee"));
        let request = CapturedRequest::new(
            Method::GET,
            Uri::from_static("/hello"),
            Version::HTTP_11,
            HttpHeaders::new(),
            CapturedBody::empty(),
        );
        let response = CapturedResponse::new(
            Version::HTTP_11,
            StatusCode::OK,
            HttpHeaders::new(),
            CapturedBody::Captured("Hello".into()),
        );

        sink.write_request(&precorrelation, &request).unwrap();
        sink.write_response(&precorrelation.correlate(), &request, &response)
            .unwrap();

        let records = sink.writer.records.lock();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|(id, _)| id == "c0ffee"));
        assert!(records[0].1.starts_with("Incoming Request: c0ffee"));
        assert!(records[1].1.contains("HTTP/1.1 200 OK"));
    }

    #[test]
    fn test_activity_follows_writer() {
        let sink = DefaultSink::new(DefaultHttpLogFormatter, RecordingWriter::default());
        assert!(!sink.is_active());
    }
}

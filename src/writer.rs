//! Writers that deliver formatted log records.
//!
//! This module provides [`TracingHttpLogWriter`], which emits every record as
//! a `tracing` event under the `logbook` target. It is the writer behind the
//! default sink, and an example of how to implement [`HttpLogWriter`].

use tracing::{enabled, event, Level};

use crate::correlation::{Correlation, Precorrelation};
use crate::error::SinkError;

/// Delivers formatted records somewhere.
pub trait HttpLogWriter: Send + Sync + 'static {
    /// Whether records would be delivered at all. Checked once per request.
    fn is_active(&self) -> bool {
        true
    }

    fn write_request(&self, precorrelation: &Precorrelation, formatted: &str)
        -> Result<(), SinkError>;

    fn write_response(&self, correlation: &Correlation, formatted: &str) -> Result<(), SinkError>;
}

/// `tracing`'s macros need the level as a constant, so dispatch on it here.
macro_rules! at_level {
    ($level:expr, $macro:ident!($($args:tt)*)) => {
        match $level {
            Level::ERROR => $macro!(target: "logbook", Level::ERROR, $($args)*),
            Level::WARN => $macro!(target: "logbook", Level::WARN, $($args)*),
            Level::INFO => $macro!(target: "logbook", Level::INFO, $($args)*),
            Level::DEBUG => $macro!(target: "logbook", Level::DEBUG, $($args)*),
            _ => $macro!(target: "logbook", Level::TRACE, $($args)*),
        }
    };
}

/// Emits each record as a `tracing` event.
///
/// The writer is active only while a subscriber accepts events of its level
/// under the `logbook` target, so a filtered-out writer costs nothing.
///
/// # Examples
///
/// ```rust
/// use logbook::{DefaultSink, JsonHttpLogFormatter, Logbook, TracingHttpLogWriter};
/// use tracing::Level;
///
/// let logbook = Logbook::builder()
///     .sink(DefaultSink::new(
///         JsonHttpLogFormatter,
///         TracingHttpLogWriter::new(Level::DEBUG),
///     ))
///     .build();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TracingHttpLogWriter {
    level: Level,
}

impl TracingHttpLogWriter {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for TracingHttpLogWriter {
    fn default() -> Self {
        Self::new(Level::TRACE)
    }
}

impl HttpLogWriter for TracingHttpLogWriter {
    fn is_active(&self) -> bool {
        at_level!(self.level, enabled!())
    }

    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        formatted: &str,
    ) -> Result<(), SinkError> {
        at_level!(
            self.level,
            event!(correlation_id = %precorrelation.id(), "{}", formatted)
        );
        Ok(())
    }

    fn write_response(&self, correlation: &Correlation, formatted: &str) -> Result<(), SinkError> {
        at_level!(
            self.level,
            event!(
                correlation_id = %correlation.id(),
                duration_ms = correlation.duration().as_millis() as u64,
                "{}",
                formatted
            )
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn subscriber(output: Captured, max_level: Level) -> impl tracing::Subscriber {
        tracing_subscriber::fmt()
            .with_writer(output)
            .with_max_level(max_level)
            .with_ansi(false)
            .finish()
    }

    #[test]
    fn test_records_are_emitted_as_events() {
        let output = Captured::default();
        let writer = TracingHttpLogWriter::new(Level::INFO);
        let precorrelation = Precorrelation::new(CorrelationId::new("abc123"));

        tracing::subscriber::with_default(subscriber(output.clone(), Level::INFO), || {
            assert!(writer.is_active());
            writer.write_request(&precorrelation, "GET /hello").unwrap();
            writer
                .write_response(&precorrelation.correlate(), "200 OK")
                .unwrap();
        });

        let logged = String::from_utf8(output.0.lock().clone()).unwrap();
        assert!(logged.contains("GET /hello"));
        assert!(logged.contains("200 OK"));
        assert!(logged.contains("correlation_id=abc123"));
        assert!(logged.contains("logbook"));
    }

    #[test]
    fn test_inactive_when_level_filtered_out() {
        let writer = TracingHttpLogWriter::default();
        assert_eq!(writer.level(), Level::TRACE);

        tracing::subscriber::with_default(subscriber(Captured::default(), Level::INFO), || {
            assert!(!writer.is_active());
        });
    }
}

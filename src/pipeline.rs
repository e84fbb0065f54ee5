//! The per-request logging pipeline.
//!
//! [`Logbook::intercept`] starts one pass of a logical request through the
//! pipeline and hands back a stage value. Each stage only offers the next
//! legal step, so the request write always precedes the response write and
//! neither can happen twice for the same stage:
//!
//! ```text
//! intercept ──► Suppressed
//!     │
//!     └──► Wrapped ──write_request──► Precorrelated ──write_response──► Correlated
//! ```

use axum::http::{request, response};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::LogbookConfig;
use crate::correlation::{
    Correlation, CorrelationId, CorrelationIdGenerator, Precorrelation, RandomCorrelationId,
};
use crate::dispatch::{classify, Classification, Dispatch, RequestScope};
use crate::error::{Error, Phase};
use crate::format::JsonHttpLogFormatter;
use crate::sink::{DefaultSink, Sink};
use crate::strategy::{BodyDecision, DefaultStrategy, Strategy};
use crate::types::{CapturedRequest, CapturedResponse, SkipReason};
use crate::writer::TracingHttpLogWriter;

type Condition = dyn Fn(&request::Parts) -> bool + Send + Sync;
type RequestFilter = dyn Fn(CapturedRequest) -> CapturedRequest + Send + Sync;
type ResponseFilter = dyn Fn(CapturedResponse) -> CapturedResponse + Send + Sync;

struct Inner {
    sink: Box<dyn Sink>,
    strategy: Box<dyn Strategy>,
    correlation_id: Box<dyn CorrelationIdGenerator>,
    conditions: Vec<Box<Condition>>,
    request_filter: Option<Box<RequestFilter>>,
    response_filter: Option<Box<ResponseFilter>>,
}

/// Shared pipeline configuration. Cloning is cheap.
///
/// # Examples
///
/// ```rust
/// use logbook::{Logbook, LogbookConfig};
///
/// let logbook = Logbook::builder()
///     .config(LogbookConfig {
///         max_body_size: Some(8 * 1024),
///         exclude_paths: vec!["/health".to_string()],
///         ..LogbookConfig::default()
///     })
///     .condition(|parts| parts.method != "OPTIONS")
///     .build();
/// ```
#[derive(Clone)]
pub struct Logbook {
    inner: Arc<Inner>,
}

impl fmt::Debug for Logbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logbook")
            .field("conditions", &self.inner.conditions.len())
            .field("request_filter", &self.inner.request_filter.is_some())
            .field("response_filter", &self.inner.response_filter.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Logbook {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Logbook {
    pub fn builder() -> LogbookBuilder {
        LogbookBuilder::default()
    }

    /// A logbook writing to `sink` with every other setting at its default.
    pub fn new<S: Sink>(sink: S) -> Self {
        Self::builder().sink(sink).build()
    }

    pub fn is_active(&self) -> bool {
        self.inner.sink.is_active()
    }

    /// Start one pass of a request through the pipeline.
    ///
    /// An inactive sink suppresses the pass before anything else is looked
    /// at. Passes that go on attach a [`RequestScope`] to `parts` (unless the
    /// host already did) so later passes of the same logical request can be
    /// recognised.
    pub fn intercept(&self, parts: &mut request::Parts) -> Interception {
        if !self.is_active() {
            return Interception::Suppressed(Suppressed::Inactive);
        }

        let dispatch = Dispatch::of(&parts.extensions);
        let scope = RequestScope::of(&parts.extensions);
        let classification = classify(&dispatch, scope.as_ref());
        if classification == Classification::Duplicate {
            debug!(kind = ?dispatch.kind(), "Logical request already logged");
            return Interception::Suppressed(Suppressed::Duplicate);
        }
        if !self.inner.conditions.iter().all(|condition| condition(parts)) {
            return Interception::Suppressed(Suppressed::Excluded);
        }

        let scope = scope.unwrap_or_else(|| RequestScope::attach(&mut parts.extensions));
        let decision = match classification {
            Classification::DeferredOriginal => BodyDecision::Skip(SkipReason::AlreadyConsumed),
            _ => self.inner.strategy.request_body(parts),
        };

        Interception::Wrapped(Wrapped {
            logbook: self.clone(),
            scope,
            classification,
            decision,
        })
    }
}

/// Builder for [`Logbook`].
#[derive(Default)]
pub struct LogbookBuilder {
    sink: Option<Box<dyn Sink>>,
    strategy: Option<Box<dyn Strategy>>,
    correlation_id: Option<Box<dyn CorrelationIdGenerator>>,
    conditions: Vec<Box<Condition>>,
    request_filter: Option<Box<RequestFilter>>,
    response_filter: Option<Box<ResponseFilter>>,
}

impl LogbookBuilder {
    /// Where records go. Defaults to JSON records on `tracing`.
    pub fn sink<S: Sink>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn strategy<S: Strategy>(mut self, strategy: S) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    pub fn correlation_id<G: CorrelationIdGenerator>(mut self, generator: G) -> Self {
        self.correlation_id = Some(Box::new(generator));
        self
    }

    /// Only log requests matching `condition`. Conditions accumulate; a
    /// request must match all of them.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&request::Parts) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Box::new(condition));
        self
    }

    /// Rewrite every captured request before it reaches the sink.
    pub fn request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(CapturedRequest) -> CapturedRequest + Send + Sync + 'static,
    {
        self.request_filter = Some(Box::new(filter));
        self
    }

    /// Rewrite every captured response before it reaches the sink.
    pub fn response_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(CapturedResponse) -> CapturedResponse + Send + Sync + 'static,
    {
        self.response_filter = Some(Box::new(filter));
        self
    }

    /// Apply a [`LogbookConfig`]: its body settings become a
    /// [`DefaultStrategy`] and its excluded paths a condition.
    pub fn config(self, config: LogbookConfig) -> Self {
        let builder = self.strategy(DefaultStrategy::new(&config));
        if config.exclude_paths.is_empty() {
            return builder;
        }
        builder.condition(move |parts| !config.is_excluded(parts.uri.path()))
    }

    pub fn build(self) -> Logbook {
        let sink = self.sink.unwrap_or_else(|| {
            Box::new(DefaultSink::new(
                JsonHttpLogFormatter,
                TracingHttpLogWriter::default(),
            ))
        });
        Logbook {
            inner: Arc::new(Inner {
                sink,
                strategy: self
                    .strategy
                    .unwrap_or_else(|| Box::new(DefaultStrategy::default())),
                correlation_id: self
                    .correlation_id
                    .unwrap_or_else(|| Box::new(RandomCorrelationId)),
                conditions: self.conditions,
                request_filter: self.request_filter,
                response_filter: self.response_filter,
            }),
        }
    }
}

/// Result of [`Logbook::intercept`].
#[derive(Debug)]
pub enum Interception {
    /// Leave the request alone.
    Suppressed(Suppressed),
    /// Capture and log this pass.
    Wrapped(Wrapped),
}

/// Why a pass is not logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppressed {
    /// The sink reported itself inactive.
    Inactive,
    /// Another pass already logged this logical request.
    Duplicate,
    /// A condition rejected the request.
    Excluded,
}

/// A pass that will be logged; its request has not been written yet.
#[derive(Debug)]
pub struct Wrapped {
    logbook: Logbook,
    scope: RequestScope,
    classification: Classification,
    decision: BodyDecision,
}

impl Wrapped {
    /// How to treat the request body. Re-dispatched passes never read it.
    pub fn request_decision(&self) -> BodyDecision {
        self.decision
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// The pre-correlation write.
    ///
    /// Reuses the correlation id of an earlier pass of the same logical
    /// request. When that pass already wrote the request, the sink is not
    /// called again and the response is paired with the request it saw.
    pub fn write_request(self, request: CapturedRequest) -> Result<Precorrelated, Error> {
        let inner = &self.logbook.inner;
        let precorrelation = match self.scope.precorrelation() {
            Some(precorrelation) => precorrelation,
            None => {
                let precorrelation = Precorrelation::new(inner.correlation_id.next());
                self.scope.set_precorrelation(precorrelation.clone());
                precorrelation
            }
        };

        let request = match self.scope.written_request() {
            Some(written) => {
                debug!(correlation_id = %precorrelation.id(), "Request already written by an earlier pass");
                written
            }
            None => {
                let request = match &inner.request_filter {
                    Some(filter) => filter(request),
                    None => request,
                };
                inner
                    .sink
                    .write_request(&precorrelation, &request)
                    .map_err(|source| Error::Sink {
                        correlation_id: precorrelation.id().clone(),
                        phase: Phase::Request,
                        source,
                    })?;
                self.scope.mark_request_written(&request);
                debug!(correlation_id = %precorrelation.id(), "Request written");
                request
            }
        };

        Ok(Precorrelated {
            logbook: self.logbook,
            scope: self.scope,
            precorrelation,
            request,
        })
    }
}

/// A pass whose request was written; waiting for the final response.
#[derive(Debug)]
pub struct Precorrelated {
    logbook: Logbook,
    scope: RequestScope,
    precorrelation: Precorrelation,
    request: CapturedRequest,
}

impl Precorrelated {
    pub fn id(&self) -> &CorrelationId {
        self.precorrelation.id()
    }

    /// The request as the sink saw it.
    pub fn request(&self) -> &CapturedRequest {
        &self.request
    }

    pub fn response_decision(&self, response: &response::Parts) -> BodyDecision {
        self.logbook
            .inner
            .strategy
            .response_body(&self.request, response)
    }

    /// The correlation write. Marks the logical request as logged only once
    /// the sink accepted the response.
    pub fn write_response(self, response: CapturedResponse) -> Result<Correlated, Error> {
        let inner = &self.logbook.inner;
        let response = match &inner.response_filter {
            Some(filter) => filter(response),
            None => response,
        };

        let correlation = self.precorrelation.correlate();
        inner
            .sink
            .write_response(&correlation, &self.request, &response)
            .map_err(|source| Error::Sink {
                correlation_id: correlation.id().clone(),
                phase: Phase::Response,
                source,
            })?;
        self.scope.mark_logged();
        debug!(
            correlation_id = %correlation.id(),
            status = %response.status(),
            "Response written"
        );

        Ok(Correlated { correlation })
    }
}

/// A fully logged pass.
#[derive(Debug)]
pub struct Correlated {
    correlation: Correlation,
}

impl Correlated {
    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }
}

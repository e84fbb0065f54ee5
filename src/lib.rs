//! # Logbook
//!
//! An Axum/Tower middleware that logs every HTTP request together with its
//! response, correlated by a shared id, through a pluggable [`Sink`].
//!
//! ## Features
//!
//! - **Exactly one pair per request**: hosts that re-dispatch a request (error
//!   pages, forwards, async continuations) still log one request/response pair
//!   per logical request
//! - **Stream-aware**: response bodies are captured as they stream to the
//!   client, never buffered in front of it
//! - **Bounded capture**: bodies beyond a size limit are truncated and keep
//!   their original length
//! - **Extensible**: custom sinks, strategies, formatters, writers and id
//!   generators
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{error_handling::HandleErrorLayer, http::StatusCode, routing::get, BoxError, Router};
//! use logbook::{Logbook, LogbookConfig, LogbookLayer};
//! use tower::ServiceBuilder;
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! async fn log_failure(error: BoxError) -> (StatusCode, String) {
//!     (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let logbook = Logbook::builder()
//!         .config(LogbookConfig {
//!             max_body_size: Some(64 * 1024),
//!             exclude_paths: vec!["/health".to_string()],
//!             ..LogbookConfig::default()
//!         })
//!         .build();
//!
//!     let app = Router::new().route("/hello", get(hello)).layer(
//!         ServiceBuilder::new()
//!             .layer(HandleErrorLayer::new(log_failure))
//!             .layer(LogbookLayer::new(logbook)),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Custom Sinks
//!
//! Implement the [`Sink`] trait to send records anywhere:
//!
//! ```rust
//! use logbook::*;
//!
//! #[derive(Debug)]
//! struct StdoutSink;
//!
//! impl Sink for StdoutSink {
//!     fn write_request(&self, p: &Precorrelation, request: &CapturedRequest) -> Result<(), SinkError> {
//!         println!("{} > {} {}", p.id(), request.method(), request.uri());
//!         Ok(())
//!     }
//!
//!     fn write_response(
//!         &self,
//!         c: &Correlation,
//!         _request: &CapturedRequest,
//!         response: &CapturedResponse,
//!     ) -> Result<(), SinkError> {
//!         println!("{} < {} ({}ms)", c.id(), response.status(), c.duration().as_millis());
//!         Ok(())
//!     }
//! }
//!
//! let logbook = Logbook::new(StdoutSink);
//! ```

use axum::{body::Body, extract::Request, response::Response};
use futures::future::BoxFuture;
use http_body::Body as _;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};
use tracing::{debug, error, instrument, Instrument};

pub mod body_wrapper;
use body_wrapper::{buffer_request, CaptureBuffer, CapturingBody};

pub mod config;
pub use config::LogbookConfig;

pub mod correlation;
pub use correlation::{
    Correlation, CorrelationId, CorrelationIdGenerator, Precorrelation, RandomCorrelationId,
    SequentialCorrelationId,
};

pub mod dispatch;
pub use dispatch::{classify, redispatch, Classification, Dispatch, DispatchKind, RequestScope};

pub mod error;
pub use error::{Error, Phase, SinkError};

pub mod format;
pub use format::{DefaultHttpLogFormatter, HttpLogFormatter, JsonHttpLogFormatter};

pub mod multi_sink;
pub use multi_sink::MultiSink;

pub mod pipeline;
pub use pipeline::{
    Correlated, Interception, Logbook, LogbookBuilder, Precorrelated, Suppressed, Wrapped,
};

pub mod sink;
pub use sink::{DefaultSink, Sink};

pub mod strategy;
pub use strategy::{BodyDecision, DefaultStrategy, Strategy};

pub mod types;
pub use types::{CapturedBody, CapturedRequest, CapturedResponse, HttpHeaders, SkipReason};

pub mod writer;
pub use writer::{HttpLogWriter, TracingHttpLogWriter};

/// Tower layer for the logging middleware.
///
/// This is the main entry point for using logbook. It implements the Tower
/// [`Layer`] trait and can be used with Axum's layering system. The service
/// it produces fails with a [`BoxError`] when the sink rejects a write that
/// can still be reported, so put a `HandleErrorLayer` in front of it (or
/// downcast to [`Error`] wherever the host handles service errors).
///
/// # Examples
///
/// ```rust,no_run
/// use axum::{error_handling::HandleErrorLayer, http::StatusCode, routing::get, BoxError, Router};
/// use logbook::{Logbook, LogbookLayer};
/// use tower::ServiceBuilder;
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let app = Router::new().route("/hello", get(hello)).layer(
///     ServiceBuilder::new()
///         .layer(HandleErrorLayer::new(|_: BoxError| async {
///             StatusCode::INTERNAL_SERVER_ERROR
///         }))
///         .layer(LogbookLayer::new(Logbook::default())),
/// );
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LogbookLayer {
    logbook: Logbook,
}

impl LogbookLayer {
    pub fn new(logbook: Logbook) -> Self {
        Self { logbook }
    }
}

impl<S> Layer<S> for LogbookLayer {
    type Service = LogbookService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LogbookService {
            inner,
            logbook: self.logbook.clone(),
        }
    }
}

/// Tower service implementation for the logging middleware.
///
/// The request body is read ahead (up to the capture limit) so the request can
/// be logged before the application runs; the application then receives the
/// same frames again. The response body is captured while it streams, and
/// its record is written when the stream ends.
///
/// Users typically don't interact with this type directly - it's created by
/// [`LogbookLayer`].
#[derive(Clone, Debug)]
pub struct LogbookService<S> {
    inner: S,
    logbook: Logbook,
}

impl<S> Service<Request> for LogbookService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    #[instrument(skip_all)]
    fn call(&mut self, request: Request) -> Self::Future {
        let (mut parts, body) = request.into_parts();
        let stage = match self.logbook.intercept(&mut parts) {
            Interception::Wrapped(stage) => stage,
            Interception::Suppressed(reason) => {
                debug!(?reason, "Passing request through unlogged");
                let future = self.inner.call(Request::from_parts(parts, body));
                return Box::pin(async move { future.await.map_err(Into::into) });
            }
        };

        // The service polled ready is the one that has to handle the call.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(process(inner, stage, parts, body).in_current_span())
    }
}

async fn process<S>(
    mut inner: S,
    stage: Wrapped,
    parts: axum::http::request::Parts,
    body: Body,
) -> Result<Response, BoxError>
where
    S: Service<Request, Response = Response>,
    S::Error: Into<BoxError>,
{
    let (body, captured) = buffer_request(body, stage.request_decision()).await;
    let stage = stage
        .write_request(CapturedRequest::from_parts(&parts, captured))
        .map_err(pipeline_fault)?;

    debug!(correlation_id = %stage.id(), "Awaiting inner service response");
    // An application error leaves the pair open for a re-dispatch to finish.
    let response = inner
        .call(Request::from_parts(parts, Body::new(body)))
        .await
        .map_err(Into::into)?;
    debug!(correlation_id = %stage.id(), status = %response.status(), "Inner service response received");

    respond(stage, response)
}

fn respond(stage: Precorrelated, response: Response) -> Result<Response, BoxError> {
    let (head, body) = response.into_parts();

    let limit = match stage.response_decision(&head) {
        BodyDecision::Capture { limit } => limit,
        BodyDecision::Skip(reason) => {
            stage
                .write_response(CapturedResponse::from_parts(
                    &head,
                    CapturedBody::Skipped(reason),
                ))
                .map_err(pipeline_fault)?;
            return Ok(Response::from_parts(head, body));
        }
    };

    if body.is_end_stream() {
        stage
            .write_response(CapturedResponse::from_parts(
                &head,
                CaptureBuffer::new(limit).finish(),
            ))
            .map_err(pipeline_fault)?;
        return Ok(Response::from_parts(head, body));
    }

    debug!(correlation_id = %stage.id(), "Wrapping response body for capture");
    let pending = CapturedResponse::from_parts(&head, CapturedBody::empty());
    let body = CapturingBody::new(body, CaptureBuffer::new(limit), move |captured| {
        // The response is already on the wire, so the fault is only logged.
        if let Err(error) = stage.write_response(pending.with_body(captured)) {
            pipeline_fault(error);
        }
    });
    Ok(Response::from_parts(head, Body::new(body)))
}

fn pipeline_fault(error: Error) -> Error {
    error!(
        correlation_id = %error.correlation_id(),
        phase = %error.phase(),
        error = %error,
        "Sink write failed"
    );
    error
}

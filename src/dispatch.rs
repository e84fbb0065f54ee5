//! Dispatch metadata, per-request scope, and duplicate detection.
//!
//! Some hosts run one logical request through the interception point more than
//! once: an error handler re-dispatches after a failure, a forward or include
//! hands the request to another route, an async continuation resumes it. The
//! host describes each pass with a [`Dispatch`] in the request extensions and
//! carries the same [`RequestScope`] from pass to pass. [`classify`] uses both
//! to guarantee at most one logged request/response pair per logical request.

use axum::http::{request, Extensions, Request};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::correlation::{CorrelationId, Precorrelation};
use crate::types::CapturedRequest;

/// Why the interception point is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatchKind {
    /// First pass of a client request.
    #[default]
    Original,
    /// The host's error handling re-dispatched the request.
    Error,
    Forward,
    Include,
    /// An asynchronously started request resumed.
    AsyncContinuation,
}

/// Dispatch metadata the host stores in the request extensions.
///
/// A request without a `Dispatch` extension is an original pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dispatch {
    kind: DispatchKind,
    exception_type: Option<String>,
}

impl Dispatch {
    pub fn new(kind: DispatchKind) -> Self {
        Self {
            kind,
            exception_type: None,
        }
    }

    pub fn original() -> Self {
        Self::default()
    }

    /// An error re-dispatch caused by a failure of the given type.
    pub fn error(exception_type: impl Into<String>) -> Self {
        Self::new(DispatchKind::Error).with_exception_type(exception_type)
    }

    /// Attach the type name of the failure that led to this pass.
    pub fn with_exception_type(self, exception_type: impl Into<String>) -> Self {
        Self {
            exception_type: Some(exception_type.into()),
            ..self
        }
    }

    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.exception_type.as_deref()
    }

    /// Whether this pass re-enters a logical request. An attached exception
    /// type marks the pass as error handling even when the kind says original.
    pub fn is_redispatch(&self) -> bool {
        self.kind != DispatchKind::Original || self.exception_type.is_some()
    }

    /// The dispatch recorded in `extensions`, or an original pass.
    pub fn of(extensions: &Extensions) -> Self {
        extensions.get::<Dispatch>().cloned().unwrap_or_default()
    }
}

/// The request record an earlier pass handed to the sink.
#[derive(Debug, Clone)]
struct WrittenRequest(CapturedRequest);

#[derive(Debug, Clone, Copy)]
struct Logged;

/// Typed attribute store shared by every pass of one logical request.
///
/// Clones share the same storage. The host puts one into the request
/// extensions (see [`RequestScope::attach`]) and copies it onto every
/// re-dispatched request; [`redispatch`] does both.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    attributes: Arc<Mutex<Extensions>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scope stored in `extensions`, if any.
    pub fn of(extensions: &Extensions) -> Option<Self> {
        extensions.get::<RequestScope>().cloned()
    }

    /// The scope stored in `extensions`, inserting a fresh one when missing.
    pub fn attach(extensions: &mut Extensions) -> Self {
        if let Some(scope) = Self::of(extensions) {
            return scope;
        }
        let scope = Self::new();
        extensions.insert(scope.clone());
        scope
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.attributes.lock().get::<T>().cloned()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.attributes.lock().insert(value)
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.attributes.lock().remove::<T>()
    }

    pub fn contains<T: Clone + Send + Sync + 'static>(&self) -> bool {
        self.attributes.lock().get::<T>().is_some()
    }

    /// Whether two handles share storage.
    pub fn same_scope(&self, other: &RequestScope) -> bool {
        Arc::ptr_eq(&self.attributes, &other.attributes)
    }

    /// Correlation id assigned to this logical request by an earlier pass.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.precorrelation().map(|precorrelation| precorrelation.id().clone())
    }

    pub(crate) fn precorrelation(&self) -> Option<Precorrelation> {
        self.get::<Precorrelation>()
    }

    pub(crate) fn set_precorrelation(&self, precorrelation: Precorrelation) {
        self.insert(precorrelation);
    }

    /// The request record already written for this logical request.
    pub(crate) fn written_request(&self) -> Option<CapturedRequest> {
        self.get::<WrittenRequest>().map(|WrittenRequest(request)| request)
    }

    pub(crate) fn mark_request_written(&self, request: &CapturedRequest) {
        self.insert(WrittenRequest(request.clone()));
    }

    /// Whether the correlation write already happened for this logical request.
    pub fn is_logged(&self) -> bool {
        self.contains::<Logged>()
    }

    pub(crate) fn mark_logged(&self) {
        self.insert(Logged);
    }
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Start a fresh logging cycle.
    Original,
    /// A re-dispatch that is the only completion of its logical request:
    /// log it, but never read the request body again.
    DeferredOriginal,
    /// The logical request was already logged; emit nothing.
    Duplicate,
}

pub fn classify(dispatch: &Dispatch, scope: Option<&RequestScope>) -> Classification {
    if scope.is_some_and(RequestScope::is_logged) {
        Classification::Duplicate
    } else if dispatch.is_redispatch() {
        Classification::DeferredOriginal
    } else {
        Classification::Original
    }
}

/// Build the request a host feeds back through the interception point for a
/// re-dispatch of `original`: same method, URI, version and headers, the same
/// [`RequestScope`], and the given [`Dispatch`].
pub fn redispatch<B>(original: &request::Parts, dispatch: Dispatch, body: B) -> Request<B> {
    let mut request = Request::new(body);
    *request.method_mut() = original.method.clone();
    *request.uri_mut() = original.uri.clone();
    *request.version_mut() = original.version;
    *request.headers_mut() = original.headers.clone();
    if let Some(scope) = RequestScope::of(&original.extensions) {
        request.extensions_mut().insert(scope);
    }
    request.extensions_mut().insert(dispatch);
    request
}

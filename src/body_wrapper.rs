//! Body streaming and capture utilities.
//!
//! This module lets the logging pipeline see body bytes without taking them
//! away from their real consumer:
//!
//! - [`buffer_request`] reads a request body ahead of the application so it can
//!   be logged before the application runs, and hands back a [`Replay`] body
//!   that yields the identical frames again.
//! - [`CapturingBody`] tees a response body as it streams to the client and
//!   reports the snapshot once the stream is finished, failed or dropped.
//!
//! Both record into a [`CaptureBuffer`], which keeps at most the configured
//! number of bytes but counts everything it sees.

use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project::{pin_project, pinned_drop};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::{debug, warn};

use crate::strategy::BodyDecision;
use crate::types::{CapturedBody, SkipReason};

/// Bounded side buffer for body bytes.
///
/// Snapshot methods take `self`, so a buffer is drained exactly once.
#[derive(Debug)]
pub struct CaptureBuffer {
    mode: Mode,
    bytes: BytesMut,
    seen: u64,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Capture { limit: Option<usize> },
    Skip(SkipReason),
}

impl CaptureBuffer {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            mode: Mode::Capture { limit },
            bytes: BytesMut::new(),
            seen: 0,
        }
    }

    /// A buffer that records nothing and reports the body as not capturable.
    pub fn disabled() -> Self {
        Self::skipping(SkipReason::NotCapturable)
    }

    fn skipping(reason: SkipReason) -> Self {
        Self {
            mode: Mode::Skip(reason),
            bytes: BytesMut::new(),
            seen: 0,
        }
    }

    pub fn record(&mut self, chunk: &[u8]) {
        let Mode::Capture { limit } = self.mode else {
            return;
        };
        self.seen += chunk.len() as u64;
        let room = match limit {
            Some(limit) => limit.saturating_sub(self.bytes.len()),
            None => chunk.len(),
        };
        self.bytes.extend_from_slice(&chunk[..room.min(chunk.len())]);
    }

    /// Bytes seen so far, including those beyond the limit.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Whether the limit has been reached.
    pub fn is_full(&self) -> bool {
        matches!(self.mode, Mode::Capture { limit: Some(limit) } if self.bytes.len() >= limit)
    }

    /// Whether more bytes were seen than the limit keeps.
    pub fn is_overflowing(&self) -> bool {
        matches!(self.mode, Mode::Capture { limit: Some(limit) } if self.seen > limit as u64)
    }

    /// Snapshot of a stream that ended normally.
    pub fn finish(self) -> CapturedBody {
        let original_length = self.seen;
        self.finish_with_length(original_length)
    }

    /// Snapshot of a stream whose true length is known without reading it all.
    pub fn finish_with_length(self, original_length: u64) -> CapturedBody {
        match self.mode {
            Mode::Skip(reason) => CapturedBody::Skipped(reason),
            Mode::Capture { .. } => {
                let bytes = self.bytes.freeze();
                if original_length > bytes.len() as u64 {
                    CapturedBody::Truncated {
                        bytes,
                        original_length,
                    }
                } else {
                    CapturedBody::Captured(bytes)
                }
            }
        }
    }

    /// Snapshot of a stream that failed.
    pub fn fail(self) -> CapturedBody {
        match self.mode {
            Mode::Skip(reason) => CapturedBody::Skipped(reason),
            Mode::Capture { .. } => CapturedBody::Skipped(SkipReason::Error),
        }
    }

    /// Best-effort snapshot of a stream that was dropped before it ended.
    ///
    /// A stream that already delivered its full declared length counts as
    /// finished.
    pub fn abort(self, declared: Option<u64>) -> CapturedBody {
        if matches!(self.mode, Mode::Skip(_)) || declared == Some(self.seen) {
            return self.finish();
        }
        if self.seen == 0 {
            return CapturedBody::Skipped(SkipReason::Aborted);
        }
        let original_length = declared.unwrap_or(self.seen).max(self.seen);
        CapturedBody::Truncated {
            bytes: self.bytes.freeze(),
            original_length,
        }
    }
}

/// A body that first yields frames read ahead of time, then the rest of the
/// original stream.
///
/// `size_hint` accounts for the buffered frames, so a declared content length
/// stays intact. A stream error seen while reading ahead is yielded after the
/// buffered frames, unchanged.
#[pin_project]
pub struct Replay<B: HttpBody> {
    buffered: VecDeque<Frame<Bytes>>,
    buffered_len: u64,
    error: Option<B::Error>,
    #[pin]
    rest: Option<B>,
}

impl<B: HttpBody> Replay<B> {
    fn new(buffered: VecDeque<Frame<Bytes>>, error: Option<B::Error>, rest: Option<B>) -> Self {
        let buffered_len = buffered
            .iter()
            .filter_map(Frame::data_ref)
            .map(|data| data.len() as u64)
            .sum();
        Self {
            buffered,
            buffered_len,
            error,
            rest,
        }
    }

    /// Replay nothing; every frame comes straight from `body`.
    pub fn passthrough(body: B) -> Self {
        Self::new(VecDeque::new(), None, Some(body))
    }
}

impl<B> HttpBody for Replay<B>
where
    B: HttpBody<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if let Some(frame) = this.buffered.pop_front() {
            if let Some(data) = frame.data_ref() {
                *this.buffered_len -= data.len() as u64;
            }
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(error) = this.error.take() {
            return Poll::Ready(Some(Err(error)));
        }
        match this.rest.as_pin_mut() {
            Some(rest) => rest.poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.buffered.is_empty()
            && self.error.is_none()
            && self.rest.as_ref().map_or(true, HttpBody::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        let Some(rest) = self.rest.as_ref() else {
            return SizeHint::with_exact(self.buffered_len);
        };
        let remaining = rest.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(remaining.lower() + self.buffered_len);
        if let Some(upper) = remaining.upper() {
            hint.set_upper(upper + self.buffered_len);
        }
        hint
    }
}

/// Read a request body ahead of the application and capture it.
///
/// Returns the body the application should see in place of the original
/// together with the snapshot for the log record. A [`BodyDecision::Skip`]
/// leaves the body unread. Reading stops as soon as the body is known to
/// exceed the capture limit and the remainder streams through untouched. The
/// snapshot is then truncated to the declared length, or to the bytes read so
/// far when no length was declared. A stream error is logged, replayed to the
/// application, and reported as [`SkipReason::Error`].
pub async fn buffer_request<B>(body: B, decision: BodyDecision) -> (Replay<B>, CapturedBody)
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let mut buffer = match decision {
        BodyDecision::Skip(reason) => {
            return (Replay::passthrough(body), CapturedBody::Skipped(reason))
        }
        BodyDecision::Capture { limit } => CaptureBuffer::new(limit),
    };
    let declared = body.size_hint().exact();
    let mut body = body;
    let mut frames = VecDeque::new();

    loop {
        if body.is_end_stream() {
            return (Replay::new(frames, None, None), buffer.finish());
        }
        if let Some(length) = truncated_length(&buffer, declared) {
            debug!(?declared, seen = buffer.seen(), "Capture limit reached, streaming the rest");
            return (
                Replay::new(frames, None, Some(body)),
                buffer.finish_with_length(length),
            );
        }
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    buffer.record(data);
                }
                frames.push_back(frame);
            }
            Some(Err(error)) => {
                warn!(error = %error, "Stream error during request body capture");
                return (Replay::new(frames, Some(error), None), buffer.fail());
            }
            None => return (Replay::new(frames, None, None), buffer.finish()),
        }
    }
}

fn truncated_length(buffer: &CaptureBuffer, declared: Option<u64>) -> Option<u64> {
    if !buffer.is_full() {
        return None;
    }
    match declared {
        Some(length) if length > buffer.seen() => Some(length),
        _ if buffer.is_overflowing() => Some(buffer.seen()),
        _ => None,
    }
}

type Completion = Box<dyn FnOnce(CapturedBody) + Send>;

struct Pending {
    buffer: CaptureBuffer,
    on_complete: Completion,
}

/// Tee for a body that streams to its consumer.
///
/// Every frame is forwarded unchanged. The completion callback runs exactly
/// once with the snapshot: at end of stream, on the first stream error (which
/// is still forwarded), or when the body is dropped early.
#[pin_project(PinnedDrop)]
pub struct CapturingBody<B> {
    #[pin]
    inner: B,
    pending: Option<Pending>,
    declared: Option<u64>,
}

impl<B> CapturingBody<B>
where
    B: HttpBody<Data = Bytes>,
{
    pub fn new<F>(inner: B, buffer: CaptureBuffer, on_complete: F) -> Self
    where
        F: FnOnce(CapturedBody) + Send + 'static,
    {
        let declared = inner.size_hint().exact();
        Self {
            inner,
            pending: Some(Pending {
                buffer,
                on_complete: Box::new(on_complete),
            }),
            declared,
        }
    }
}

fn complete(pending: &mut Option<Pending>, snapshot: impl FnOnce(CaptureBuffer) -> CapturedBody) {
    if let Some(Pending {
        buffer,
        on_complete,
    }) = pending.take()
    {
        on_complete(snapshot(buffer));
    }
}

impl<B> HttpBody for CapturingBody<B>
where
    B: HttpBody<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = ready!(this.inner.as_mut().poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let (Some(pending), Some(data)) = (this.pending.as_mut(), frame.data_ref()) {
                    pending.buffer.record(data);
                }
                if this.inner.is_end_stream() {
                    complete(this.pending, CaptureBuffer::finish);
                }
            }
            Some(Err(_)) => {
                warn!("Stream error during response body capture");
                complete(this.pending, CaptureBuffer::fail);
            }
            None => complete(this.pending, CaptureBuffer::finish),
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl<B> PinnedDrop for CapturingBody<B> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        let declared = *this.declared;
        complete(this.pending, |buffer| buffer.abort(declared));
    }
}

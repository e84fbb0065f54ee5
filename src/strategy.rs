//! Per-message body capture decisions.
//!
//! A [`Strategy`] looks at a message head before any body bytes are read and
//! returns a [`BodyDecision`]. The decision is `Copy` and is handed to the
//! capture machinery as a value, so it cannot change while the body streams.

use axum::http::{header, request, response, HeaderMap, StatusCode};

use crate::config::LogbookConfig;
use crate::types::{CapturedRequest, SkipReason};

/// What to do with one message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecision {
    /// Capture the body, keeping at most `limit` bytes.
    Capture { limit: Option<usize> },
    /// Leave the body alone and log it as skipped.
    Skip(SkipReason),
}

impl BodyDecision {
    /// Capture everything.
    pub const fn capture_all() -> Self {
        BodyDecision::Capture { limit: None }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, BodyDecision::Skip(_))
    }
}

/// Decides per message whether its body is captured.
pub trait Strategy: Send + Sync + 'static {
    fn request_body(&self, request: &request::Parts) -> BodyDecision;

    fn response_body(&self, request: &CapturedRequest, response: &response::Parts)
        -> BodyDecision;
}

/// [`Strategy`] driven by [`LogbookConfig`].
///
/// Unknown or absent content types are capturable. Bodies larger than
/// `max_body_size` are truncated rather than skipped, so their status and
/// headers are still logged.
#[derive(Debug, Clone)]
pub struct DefaultStrategy {
    capture_request_body: bool,
    capture_response_body: bool,
    max_body_size: Option<usize>,
    content_types: Vec<String>,
    min_response_body_status: Option<StatusCode>,
}

impl DefaultStrategy {
    pub fn new(config: &LogbookConfig) -> Self {
        Self {
            capture_request_body: config.capture_request_body,
            capture_response_body: config.capture_response_body,
            max_body_size: config.max_body_size,
            content_types: config
                .capturable_content_types
                .iter()
                .map(|media_type| media_type.trim().to_ascii_lowercase())
                .collect(),
            min_response_body_status: config
                .min_response_body_status
                .and_then(|status| StatusCode::from_u16(status).ok()),
        }
    }

    fn decide(&self, enabled: bool, headers: &HeaderMap) -> BodyDecision {
        if enabled && self.is_capturable(headers) {
            BodyDecision::Capture {
                limit: self.max_body_size,
            }
        } else {
            BodyDecision::Skip(SkipReason::NotCapturable)
        }
    }

    fn is_capturable(&self, headers: &HeaderMap) -> bool {
        if self.content_types.is_empty() {
            return true;
        }
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        else {
            return true;
        };
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.content_types.iter().any(|accepted| {
            match accepted.strip_suffix("/*") {
                Some(top_level) => media_type
                    .split_once('/')
                    .is_some_and(|(kind, _)| kind == top_level),
                None => *accepted == media_type,
            }
        })
    }
}

impl Default for DefaultStrategy {
    fn default() -> Self {
        Self::new(&LogbookConfig::default())
    }
}

impl Strategy for DefaultStrategy {
    fn request_body(&self, request: &request::Parts) -> BodyDecision {
        self.decide(self.capture_request_body, &request.headers)
    }

    fn response_body(
        &self,
        _request: &CapturedRequest,
        response: &response::Parts,
    ) -> BodyDecision {
        if self
            .min_response_body_status
            .is_some_and(|minimum| response.status < minimum)
        {
            return BodyDecision::Skip(SkipReason::NotCapturable);
        }
        self.decide(self.capture_response_body, &response.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapturedBody;
    use axum::http::{Request, Response};

    fn request_parts(content_type: Option<&str>) -> request::Parts {
        let mut builder = Request::post("/upload");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn response_parts(status: u16) -> response::Parts {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn captured_request() -> CapturedRequest {
        CapturedRequest::from_parts(&request_parts(None), CapturedBody::empty())
    }

    #[test]
    fn test_default_captures_everything() {
        let strategy = DefaultStrategy::default();
        assert_eq!(
            strategy.request_body(&request_parts(Some("application/octet-stream"))),
            BodyDecision::capture_all()
        );
        assert_eq!(
            strategy.response_body(&captured_request(), &response_parts(200)),
            BodyDecision::capture_all()
        );
    }

    #[test]
    fn test_limit_truncates_instead_of_skipping() {
        let strategy = DefaultStrategy::new(&LogbookConfig {
            max_body_size: Some(16),
            ..LogbookConfig::default()
        });
        assert_eq!(
            strategy.request_body(&request_parts(None)),
            BodyDecision::Capture { limit: Some(16) }
        );
    }

    #[test]
    fn test_content_type_filter() {
        let strategy = DefaultStrategy::new(&LogbookConfig {
            capturable_content_types: vec!["application/json".into(), "text/*".into()],
            ..LogbookConfig::default()
        });

        let capture = BodyDecision::capture_all();
        let skip = BodyDecision::Skip(SkipReason::NotCapturable);
        assert_eq!(
            strategy.request_body(&request_parts(Some("Application/JSON; charset=utf-8"))),
            capture
        );
        assert_eq!(strategy.request_body(&request_parts(Some("text/csv"))), capture);
        assert_eq!(strategy.request_body(&request_parts(None)), capture);
        assert_eq!(strategy.request_body(&request_parts(Some("image/png"))), skip);
    }

    #[test]
    fn test_disabled_capture_and_status_floor() {
        let strategy = DefaultStrategy::new(&LogbookConfig {
            capture_request_body: false,
            min_response_body_status: Some(400),
            ..LogbookConfig::default()
        });

        assert!(strategy.request_body(&request_parts(None)).is_skip());
        assert!(strategy
            .response_body(&captured_request(), &response_parts(200))
            .is_skip());
        assert_eq!(
            strategy.response_body(&captured_request(), &response_parts(404)),
            BodyDecision::capture_all()
        );
    }
}

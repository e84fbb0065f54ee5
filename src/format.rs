//! Formatters that render captured messages as text.
//!
//! [`JsonHttpLogFormatter`] produces one JSON object per message;
//! [`DefaultHttpLogFormatter`] produces an HTTP-like plain text block.

use axum::http::{header, Version};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Write as _;

use crate::correlation::{Correlation, Precorrelation};
use crate::error::SinkError;
use crate::types::{CapturedBody, CapturedRequest, CapturedResponse, HttpHeaders};

/// Renders captured messages for an [`HttpLogWriter`](crate::HttpLogWriter).
pub trait HttpLogFormatter: Send + Sync + 'static {
    fn format_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<String, SinkError>;

    fn format_response(
        &self,
        correlation: &Correlation,
        response: &CapturedResponse,
    ) -> Result<String, SinkError>;
}

fn protocol(version: Version) -> String {
    format!("{version:?}")
}

/// JSON object per message.
///
/// Request records carry `origin`, `type`, `correlation`, `protocol`,
/// `remote`, `method`, `uri`, `headers` and `body`; response records carry
/// `duration` (milliseconds) and `status` instead of the request line fields.
/// A captured JSON body is embedded as JSON, anything else as a string. A
/// truncated body adds `original_length`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHttpLogFormatter;

#[derive(Serialize)]
#[serde(untagged)]
enum JsonBody<'a> {
    Json(serde_json::Value),
    Text(Cow<'a, str>),
}

#[derive(Serialize)]
struct JsonRequest<'a> {
    origin: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    correlation: &'a str,
    protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<String>,
    method: &'a str,
    uri: String,
    #[serde(skip_serializing_if = "HttpHeaders::is_empty")]
    headers: &'a HttpHeaders,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<JsonBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_length: Option<u64>,
}

#[derive(Serialize)]
struct JsonResponse<'a> {
    origin: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    correlation: &'a str,
    duration: u128,
    protocol: String,
    status: u16,
    #[serde(skip_serializing_if = "HttpHeaders::is_empty")]
    headers: &'a HttpHeaders,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<JsonBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_length: Option<u64>,
}

fn is_json(headers: &HttpHeaders) -> bool {
    headers
        .get(header::CONTENT_TYPE.as_str())
        .and_then(|value| value.split(';').next())
        .map(|media_type| {
            let media_type = media_type.trim().to_ascii_lowercase();
            media_type == "application/json" || media_type.ends_with("+json")
        })
        .unwrap_or(false)
}

fn json_body<'a>(headers: &HttpHeaders, body: &'a CapturedBody) -> Option<JsonBody<'a>> {
    match body {
        CapturedBody::Captured(bytes) if bytes.is_empty() => None,
        CapturedBody::Captured(bytes) if is_json(headers) => {
            match serde_json::from_slice(bytes) {
                Ok(value) => Some(JsonBody::Json(value)),
                Err(_) => Some(JsonBody::Text(body.as_string())),
            }
        }
        _ => Some(JsonBody::Text(body.as_string())),
    }
}

fn original_length(body: &CapturedBody) -> Option<u64> {
    match body {
        CapturedBody::Truncated {
            original_length, ..
        } => Some(*original_length),
        _ => None,
    }
}

impl HttpLogFormatter for JsonHttpLogFormatter {
    fn format_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<String, SinkError> {
        let record = JsonRequest {
            origin: "remote",
            kind: "request",
            correlation: precorrelation.id().as_str(),
            protocol: protocol(request.version()),
            remote: request.remote().map(|remote| remote.to_string()),
            method: request.method().as_str(),
            uri: request.uri().to_string(),
            headers: request.headers(),
            body: json_body(request.headers(), request.body()),
            original_length: original_length(request.body()),
        };
        serde_json::to_string(&record).map_err(SinkError::format)
    }

    fn format_response(
        &self,
        correlation: &Correlation,
        response: &CapturedResponse,
    ) -> Result<String, SinkError> {
        let record = JsonResponse {
            origin: "local",
            kind: "response",
            correlation: correlation.id().as_str(),
            duration: correlation.duration().as_millis(),
            protocol: protocol(response.version()),
            status: response.status().as_u16(),
            headers: response.headers(),
            body: json_body(response.headers(), response.body()),
            original_length: original_length(response.body()),
        };
        serde_json::to_string(&record).map_err(SinkError::format)
    }
}

/// HTTP-like plain text, one header line per value.
///
/// ```text
/// Incoming Request: 2d66e4bc9a8ed4bd
/// GET /api/orders HTTP/1.1
/// Accept: application/json
///
/// <body>
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHttpLogFormatter;

fn write_headers_and_body(output: &mut String, headers: &HttpHeaders, body: &CapturedBody) {
    for (name, values) in headers.iter() {
        for value in values {
            let _ = writeln!(output, "{name}: {value}");
        }
    }
    let body = body.as_string();
    if !body.is_empty() {
        let _ = write!(output, "\n{body}");
    }
}

impl HttpLogFormatter for DefaultHttpLogFormatter {
    fn format_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<String, SinkError> {
        let mut output = format!("Incoming Request: {}\n", precorrelation.id());
        if let Some(remote) = request.remote() {
            let _ = writeln!(output, "Remote: {remote}");
        }
        let _ = writeln!(
            output,
            "{} {} {}",
            request.method(),
            request.uri(),
            protocol(request.version())
        );
        write_headers_and_body(&mut output, request.headers(), request.body());
        Ok(output)
    }

    fn format_response(
        &self,
        correlation: &Correlation,
        response: &CapturedResponse,
    ) -> Result<String, SinkError> {
        let mut output = format!(
            "Outgoing Response: {}\nDuration: {} ms\n",
            correlation.id(),
            correlation.duration().as_millis()
        );
        let status = response.status();
        let _ = writeln!(
            output,
            "{} {} {}",
            protocol(response.version()),
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        write_headers_and_body(&mut output, response.headers(), response.body());
        Ok(output)
    }
}

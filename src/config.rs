//! Configuration for the logging pipeline.

use serde::{Deserialize, Serialize};

/// Configuration for the request logging middleware.
///
/// Controls which bodies are captured, how much of them is kept, and which
/// paths are logged at all. Every field has a default, so partial documents
/// deserialize cleanly from any serde format.
///
/// # Examples
///
/// ```rust
/// use logbook::LogbookConfig;
///
/// // Default configuration
/// let config = LogbookConfig::default();
///
/// // Custom configuration
/// let config = LogbookConfig {
///     max_body_size: Some(4096),
///     exclude_paths: vec!["/health".to_string(), "/metrics/*".to_string()],
///     ..LogbookConfig::default()
/// };
/// assert!(config.is_excluded("/metrics/process"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogbookConfig {
    /// Whether to capture request bodies
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    pub capture_response_body: bool,
    /// Maximum number of body bytes kept per message; longer bodies are truncated
    pub max_body_size: Option<usize>,
    /// Media types whose bodies are captured (`type/*` wildcards allowed); empty captures all
    pub capturable_content_types: Vec<String>,
    /// Response bodies are only captured at or above this status
    pub min_response_body_status: Option<u16>,
    /// Paths that are never logged; a trailing `*` matches any suffix
    pub exclude_paths: Vec<String>,
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
            max_body_size: None,
            capturable_content_types: Vec::new(),
            min_response_body_status: None,
            exclude_paths: Vec::new(),
        }
    }
}

impl LogbookConfig {
    /// Whether `path` matches one of the excluded paths.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths
            .iter()
            .any(|pattern| match pattern.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => path == pattern,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: LogbookConfig =
            serde_json::from_str(r#"{"max_body_size": 1024, "capture_request_body": false}"#)
                .unwrap();

        assert_eq!(config.max_body_size, Some(1024));
        assert!(!config.capture_request_body);
        assert!(config.capture_response_body);
        assert!(config.exclude_paths.is_empty());
    }

    #[test]
    fn test_exclude_paths() {
        let config = LogbookConfig {
            exclude_paths: vec!["/health".into(), "/internal/*".into()],
            ..LogbookConfig::default()
        };

        assert!(config.is_excluded("/health"));
        assert!(!config.is_excluded("/healthz"));
        assert!(config.is_excluded("/internal/"));
        assert!(config.is_excluded("/internal/jobs/7"));
        assert!(!config.is_excluded("/api/orders"));
    }
}

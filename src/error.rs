/// Error types for fetching, parsing and writing reservoir data.
///
/// `FetchError` covers everything that can go wrong between issuing a GET
/// request and holding a parsed JSON document. Callers decide whether a
/// failure is fatal (the initial reservoir listing) or skippable (a single
/// NID batch, a single district catalog, a single time series).

use thiserror::Error;

/// Maximum number of characters of a response body kept for diagnostics.
pub const PREVIEW_CHARS: usize = 500;

/// Result alias for operations that touch configuration or output files.
pub type Result<T> = std::result::Result<T, AppError>;

/// A failed request against one of the USACE / ArcGIS JSON services.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection failure, timeout, or body read failure
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// 2xx response with nothing in it
    #[error("empty response body from {url}")]
    EmptyBody { url: String },

    /// Body was not JSON, or not the JSON shape we expected
    #[error("malformed payload from {url}: {message} (preview: {preview})")]
    Malformed {
        url: String,
        message: String,
        preview: String,
    },

    /// The service answered with its own error object (ArcGIS `{"error": ...}`)
    #[error("service error from {url}: {message}")]
    Service { url: String, message: String },

    /// The request could not be issued as asked (zero page size, etc.)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Builds a `Malformed` error, keeping only a short preview of the body.
    pub fn malformed(url: &str, message: impl Into<String>, body: &str) -> Self {
        FetchError::Malformed {
            url: url.to_string(),
            message: message.into(),
            preview: preview(body),
        }
    }
}

/// Application-level error for configuration, output, and fatal fetches.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }
}

/// First `PREVIEW_CHARS` characters of a body, on a char boundary.
pub fn preview(body: &str) -> String {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_keeps_short_bodies_intact() {
        assert_eq!(preview("<html>oops</html>"), "<html>oops</html>");
    }

    #[test]
    fn test_preview_truncates_long_bodies() {
        let body = "x".repeat(PREVIEW_CHARS + 50);
        let p = preview(&body);
        assert_eq!(p.len(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_malformed_error_message_includes_preview() {
        let err = FetchError::malformed("http://x", "expected value", "<html>");
        let msg = err.to_string();
        assert!(msg.contains("expected value"));
        assert!(msg.contains("<html>"));
    }
}

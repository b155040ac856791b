/// JSON-over-HTTP transport.
///
/// Everything upstream of parsing goes through `JsonSource`, so the fetchers
/// can be driven by canned pages in tests and by a blocking reqwest client
/// in the binaries.

use std::time::Duration;

use serde_json::Value;

use crate::error::FetchError;

/// A service that answers a GET with a JSON document.
pub trait JsonSource {
    /// Fetches `url` and parses the body as JSON.
    fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

impl<S: JsonSource + ?Sized> JsonSource for &S {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        (**self).get_json(url)
    }
}

/// Blocking reqwest client with a per-request timeout.
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpSource { client })
    }
}

impl JsonSource for HttpSource {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text()?;
        parse_body(url, &body)
    }
}

/// Parses a response body, mapping empty and non-JSON bodies to errors that
/// carry a preview of what came back.
pub fn parse_body(url: &str, body: &str) -> Result<Value, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::EmptyBody { url: url.to_string() });
    }

    serde_json::from_str(body).map_err(|e| {
        let message = if body.to_lowercase().contains("<html") {
            format!("response appears to be HTML, not JSON ({})", e)
        } else {
            format!("JSON deserialization failed: {}", e)
        };
        FetchError::malformed(url, message, body)
    })
}

/// Appends URL-encoded query parameters to `base`.
pub fn build_url(base: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }

    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();

    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, sep, query.join("&"))
}

/// Reads a single query parameter back out of a URL built by `build_url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            urlencoding::decode(v).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_encodes_where_clause() {
        let url = build_url(
            "https://example.test/query",
            &[("where", "NIDID IN ('KS00001')".to_string()), ("f", "json".to_string())],
        );
        assert_eq!(
            url,
            "https://example.test/query?where=NIDID%20IN%20%28%27KS00001%27%29&f=json"
        );
    }

    #[test]
    fn test_build_url_appends_to_existing_query() {
        let url = build_url("https://example.test/q?a=1", &[("b", "2".to_string())]);
        assert_eq!(url, "https://example.test/q?a=1&b=2");
    }

    #[test]
    fn test_query_param_round_trips() {
        let url = build_url(
            "https://example.test/query",
            &[("resultOffset", "2000".to_string()), ("where", "1=1".to_string())],
        );
        assert_eq!(query_param(&url, "resultOffset").as_deref(), Some("2000"));
        assert_eq!(query_param(&url, "where").as_deref(), Some("1=1"));
        assert_eq!(query_param(&url, "missing"), None);
    }

    #[test]
    fn test_parse_body_rejects_empty() {
        let err = parse_body("http://x", "  \n").unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody { .. }));
    }

    #[test]
    fn test_parse_body_flags_html() {
        let err = parse_body("http://x", "<HTML><body>Service Unavailable</body></HTML>")
            .unwrap_err();
        match err {
            FetchError::Malformed { message, preview, .. } => {
                assert!(message.contains("HTML"));
                assert!(preview.contains("Service Unavailable"));
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_body_accepts_json() {
        let value = parse_body("http://x", r#"{"features": []}"#).unwrap();
        assert!(value["features"].is_array());
    }
}

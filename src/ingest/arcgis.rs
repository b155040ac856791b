/// ArcGIS FeatureServer query client.
///
/// Handles the two things every large FeatureServer pull needs:
///
/// * **Offset pagination**: services cap each response (`maxRecordCount`),
///   so `fetch_all` walks `resultOffset` forward until a page comes back
///   shorter than `resultRecordCount`.
/// * **Batched IN-clauses**: thousands of IDs in one `where` clause blow
///   past URL length limits, so `fetch_where_in` splits the value set into
///   fixed-size batches and runs one paginated fetch per batch.
///
/// Response shape:
/// ```text
/// { "features": [ { "attributes": {...}, "centroid": { "x": lon, "y": lat } }, ... ] }
/// { "error": { "code": 400, "message": "..." } }
/// ```

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::ingest::http::{JsonSource, build_url};
use crate::model::{Centroid, EntityRecord};

// ---------------------------------------------------------------------------
// Query description
// ---------------------------------------------------------------------------

/// The non-paging part of a FeatureServer `query` request.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    pub where_clause: String,
    pub out_fields: Vec<String>,
    pub return_centroid: bool,
    pub out_sr: Option<String>,
}

impl FeatureQuery {
    /// Every record (`where=1=1`), attributes only.
    pub fn all(out_fields: &[&str]) -> Self {
        Self::filtered("1=1", out_fields)
    }

    pub fn filtered(where_clause: impl Into<String>, out_fields: &[&str]) -> Self {
        FeatureQuery {
            where_clause: where_clause.into(),
            out_fields: out_fields.iter().map(|f| f.to_string()).collect(),
            return_centroid: false,
            out_sr: None,
        }
    }

    /// Ask the service for a centroid per feature, projected to `out_sr`.
    pub fn with_centroid(mut self, out_sr: &str) -> Self {
        self.return_centroid = true;
        self.out_sr = Some(out_sr.to_string());
        self
    }

    fn params(&self, offset: usize, page_size: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("where", self.where_clause.clone()),
            ("outFields", self.out_fields.join(",")),
            ("returnGeometry", "false".to_string()),
        ];
        if self.return_centroid {
            params.push(("returnCentroid", "true".to_string()));
        }
        if let Some(sr) = &self.out_sr {
            params.push(("outSR", sr.clone()));
        }
        params.push(("f", "json".to_string()));
        params.push(("resultOffset", offset.to_string()));
        params.push(("resultRecordCount", page_size.to_string()));
        params
    }
}

// ---------------------------------------------------------------------------
// Batched fetch report
// ---------------------------------------------------------------------------

/// One batch that could not be fetched.
#[derive(Debug)]
pub struct BatchFailure {
    /// Zero-based batch index
    pub batch: usize,
    /// Number of filter values in the batch
    pub values: usize,
    pub error: FetchError,
}

/// Outcome of `fetch_where_in`: whatever was collected plus what failed.
#[derive(Debug, Default)]
pub struct BatchedFetch {
    pub records: Vec<EntityRecord>,
    pub batches: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchedFetch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A single FeatureServer layer `query` endpoint.
pub struct FeatureService<S> {
    source: S,
    endpoint: String,
    delay: Duration,
}

impl<S: JsonSource> FeatureService<S> {
    pub fn new(source: S, endpoint: impl Into<String>) -> Self {
        FeatureService {
            source,
            endpoint: endpoint.into(),
            delay: Duration::ZERO,
        }
    }

    /// Sleep inserted between consecutive requests and batches.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetches one page starting at `offset`.
    pub fn fetch_page(
        &self,
        query: &FeatureQuery,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<EntityRecord>, FetchError> {
        let url = build_url(&self.endpoint, &query.params(offset, page_size));
        let body = self.source.get_json(&url)?;
        parse_features(&url, &body)
    }

    /// Fetches every record matching `query`, one page at a time.
    ///
    /// Stops at the first page holding fewer than `page_size` records. An
    /// endpoint that always returns a full page is never detected; there is
    /// no iteration cap.
    pub fn fetch_all(
        &self,
        query: &FeatureQuery,
        page_size: usize,
    ) -> Result<Vec<EntityRecord>, FetchError> {
        if page_size == 0 {
            return Err(FetchError::InvalidRequest("page size must be greater than zero".into()));
        }

        let mut out = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.fetch_page(query, offset, page_size)?;
            let count = page.len();
            out.extend(page);

            log::debug!("{}: offset {} returned {} records", self.endpoint, offset, count);

            if count < page_size {
                break;
            }

            offset += page_size;
            self.pause();
        }

        Ok(out)
    }

    /// Fetches records whose `field` is one of `values`, in batches of at
    /// most `batch_size` values per IN-clause.
    ///
    /// Values are trimmed; empty values and duplicates are dropped before
    /// batching. A failed batch is logged and recorded in the report; the
    /// remaining batches still run.
    pub fn fetch_where_in<I, T>(
        &self,
        field: &str,
        values: I,
        out_fields: &[&str],
        batch_size: usize,
        page_size: usize,
    ) -> Result<BatchedFetch, FetchError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        if batch_size == 0 {
            return Err(FetchError::InvalidRequest("batch size must be greater than zero".into()));
        }
        if page_size == 0 {
            return Err(FetchError::InvalidRequest("page size must be greater than zero".into()));
        }

        let values = dedup_values(values);
        let mut report = BatchedFetch::default();

        for (idx, chunk) in values.chunks(batch_size).enumerate() {
            if idx > 0 {
                self.pause();
            }
            report.batches += 1;

            let query = FeatureQuery::filtered(build_in_clause(field, chunk), out_fields);
            match self.fetch_all(&query, page_size) {
                Ok(records) => {
                    log::info!(
                        "Batch {} ({} values): {} records",
                        idx + 1,
                        chunk.len(),
                        records.len()
                    );
                    report.records.extend(records);
                }
                Err(error) => {
                    log::warn!("Batch {} ({} values) skipped: {}", idx + 1, chunk.len(), error);
                    report.failures.push(BatchFailure {
                        batch: idx,
                        values: chunk.len(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trims values and drops empties and repeats, keeping first-seen order.
pub fn dedup_values<I, T>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

/// `FIELD IN ('a','b')`, with embedded single quotes doubled.
pub fn build_in_clause(field: &str, values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect();
    format!("{} IN ({})", field, quoted.join(","))
}

/// Parses a FeatureServer query response into records.
///
/// A body with an `error` object becomes `FetchError::Service`. A body with
/// no `features` array is treated as an empty page.
pub fn parse_features(url: &str, body: &Value) -> Result<Vec<EntityRecord>, FetchError> {
    if let Some(err) = body.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(FetchError::Service { url: url.to_string(), message });
    }

    let Some(features) = body.get("features") else {
        log::warn!("{}: response has no 'features' array, treating as empty", url);
        return Ok(Vec::new());
    };

    let features = features.as_array().ok_or_else(|| {
        FetchError::malformed(url, "'features' is not an array", &body.to_string())
    })?;

    Ok(features.iter().map(parse_feature).collect())
}

fn parse_feature(feature: &Value) -> EntityRecord {
    let attributes = feature
        .get("attributes")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    let centroid = feature.get("centroid").and_then(|c| {
        let x = c.get("x")?.as_f64()?;
        let y = c.get("y")?.as_f64()?;
        Some(Centroid { latitude: y, longitude: x })
    });

    EntityRecord::new(attributes, centroid)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;
    use crate::ingest::http::query_param;
    use serde_json::json;

    const ENDPOINT: &str = "https://example.test/FeatureServer/0/query";

    // --- Pagination ---------------------------------------------------------

    #[test]
    fn test_fetch_all_concatenates_pages_and_stops_at_short_page() {
        let stub = PagedStub::new(7, "NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);

        let records = service.fetch_all(&FeatureQuery::all(&["NIDID"]), 3).unwrap();

        let ids: Vec<String> = records.iter().map(|r| r.key("NIDID").unwrap()).collect();
        assert_eq!(ids, vec!["ID0", "ID1", "ID2", "ID3", "ID4", "ID5", "ID6"]);

        let offsets: Vec<String> = stub
            .requests()
            .iter()
            .map(|u| query_param(u, "resultOffset").unwrap())
            .collect();
        assert_eq!(offsets, vec!["0", "3", "6"], "must not request past the short page");
    }

    #[test]
    fn test_fetch_all_exact_multiple_needs_one_empty_page() {
        let stub = PagedStub::new(4, "NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);

        let records = service.fetch_all(&FeatureQuery::all(&["NIDID"]), 2).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(stub.requests().len(), 3);
    }

    #[test]
    fn test_fetch_all_sends_page_parameters() {
        let stub = PagedStub::new(1, "NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);
        let query = FeatureQuery::all(&["NAME", "NIDID"]).with_centroid("4326");

        service.fetch_all(&query, 1000).unwrap();

        let url = &stub.requests()[0];
        assert!(url.starts_with(ENDPOINT));
        assert_eq!(query_param(url, "where").as_deref(), Some("1=1"));
        assert_eq!(query_param(url, "outFields").as_deref(), Some("NAME,NIDID"));
        assert_eq!(query_param(url, "returnCentroid").as_deref(), Some("true"));
        assert_eq!(query_param(url, "outSR").as_deref(), Some("4326"));
        assert_eq!(query_param(url, "resultRecordCount").as_deref(), Some("1000"));
        assert_eq!(query_param(url, "f").as_deref(), Some("json"));
    }

    #[test]
    fn test_fetch_all_rejects_zero_page_size() {
        let stub = PagedStub::new(1, "NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);
        let err = service.fetch_all(&FeatureQuery::all(&["NIDID"]), 0).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
        assert!(stub.requests().is_empty());
    }

    // --- Batched IN-clause ----------------------------------------------------

    #[test]
    fn test_fetch_where_in_issues_ceil_n_over_b_batches() {
        let stub = InClauseStub::new("NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);
        let values: Vec<String> = (0..10).map(|i| format!("KS{:05}", i)).collect();

        let report = service
            .fetch_where_in("NIDID", &values, &["NIDID"], 4, 2000)
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(stub.requests().len(), 3);
        assert!(report.is_complete());

        let ids: Vec<String> = report.records.iter().map(|r| r.key("NIDID").unwrap()).collect();
        assert_eq!(ids, values, "batched result equals the unbatched set");
    }

    #[test]
    fn test_fetch_where_in_drops_duplicates_and_empties() {
        let stub = InClauseStub::new("NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);
        let values = vec!["A1", " A1 ", "", "A2", "   ", "A1"];

        let report = service
            .fetch_where_in("NIDID", values, &["NIDID"], 900, 2000)
            .unwrap();

        assert_eq!(report.batches, 1);
        let where_clause = query_param(&stub.requests()[0], "where").unwrap();
        assert_eq!(where_clause, "NIDID IN ('A1','A2')");
    }

    #[test]
    fn test_fetch_where_in_with_no_values_issues_no_requests() {
        let stub = InClauseStub::new("NIDID");
        let service = FeatureService::new(&stub, ENDPOINT);

        let report = service
            .fetch_where_in("NIDID", Vec::<String>::new(), &["NIDID"], 900, 2000)
            .unwrap();

        assert_eq!(report.batches, 0);
        assert!(report.records.is_empty());
        assert!(stub.requests().is_empty());
    }

    #[test]
    fn test_failed_batch_is_reported_and_others_continue() {
        let stub = InClauseStub::new("NIDID").failing_on_request(1);
        let service = FeatureService::new(&stub, ENDPOINT);
        let values: Vec<String> = (0..6).map(|i| format!("V{}", i)).collect();

        let report = service
            .fetch_where_in("NIDID", &values, &["NIDID"], 2, 2000)
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch, 1);
        assert_eq!(report.failures[0].values, 2);
        let ids: Vec<String> = report.records.iter().map(|r| r.key("NIDID").unwrap()).collect();
        assert_eq!(ids, vec!["V0", "V1", "V4", "V5"]);
    }

    // --- Helpers and parsing ------------------------------------------------------

    #[test]
    fn test_in_clause_escapes_quotes() {
        let clause = build_in_clause("NAME", &["O'Brien".to_string(), "Plain".to_string()]);
        assert_eq!(clause, "NAME IN ('O''Brien','Plain')");
    }

    #[test]
    fn test_parse_reservoir_features_with_centroids() {
        let body: Value = serde_json::from_str(fixture_reservoir_page_json()).unwrap();
        let records = parse_features("u", &body).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get_str("NAME"), Some("Kanopolis Lake"));
        let c = records[0].centroid.expect("centroid present");
        assert!((c.latitude - 38.61).abs() < 1e-9);
        assert!((c.longitude - -98.0).abs() < 1e-9);
        assert!(records[2].centroid.is_none());
    }

    #[test]
    fn test_parse_service_error_object() {
        let body = json!({"error": {"code": 400, "message": "Invalid query"}});
        let err = parse_features("u", &body).unwrap_err();
        match err {
            FetchError::Service { message, .. } => assert_eq!(message, "Invalid query"),
            other => panic!("expected Service error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_features_is_empty_page() {
        let records = parse_features("u", &json!({"exceededTransferLimit": false})).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_features_not_array_is_malformed() {
        let err = parse_features("u", &json!({"features": {"oops": 1}})).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn test_feature_without_attributes_becomes_empty_record() {
        let records = parse_features("u", &json!({"features": [{}]})).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].attributes.is_empty());
    }
}

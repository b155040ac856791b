/// Test fixtures: representative JSON payloads and in-memory services.
///
/// Payloads are trimmed to the minimum needed to exercise the parsers but
/// keep the real envelopes returned by:
///   usace_rez FeatureServer  : features[].attributes + centroid{x,y}
///   NID FeatureServer        : features[].attributes (LATITUDE/LONGITUDE)
///   CWMS reporting provider  : values[[timestamp, value, quality?]]
///   CWMS catalog             : entries[].name
///
/// Note: the reporting provider mixes ISO-8601 string timestamps and epoch
/// milliseconds depending on district, and some entries carry null values.

use std::cell::RefCell;

use serde_json::{Value, json};

use crate::error::FetchError;
use crate::ingest::http::{JsonSource, query_param};

/// Three reservoirs: two with NIDIDs, one (Twin Lakes) without a centroid.
pub(crate) fn fixture_reservoir_page_json() -> &'static str {
    r#"{
      "objectIdFieldName": "OBJECTID",
      "features": [
        {
          "attributes": {
            "NAME": "Kanopolis Lake", "DISTRICT": "Kansas City District",
            "DIST_SYM": "NWK", "OMBIL_SITE_ID": "H5P0048", "NIDID": "KS00005"
          },
          "centroid": { "x": -98.0, "y": 38.61 }
        },
        {
          "attributes": {
            "NAME": "Wilson Lake", "DISTRICT": "Kansas City District",
            "DIST_SYM": "NWK", "OMBIL_SITE_ID": "H5P0071", "NIDID": " KS00008 "
          },
          "centroid": { "x": -98.53, "y": 38.94 }
        },
        {
          "attributes": {
            "NAME": "Twin Lakes", "DISTRICT": "Omaha District",
            "DIST_SYM": "NWO", "OMBIL_SITE_ID": null, "NIDID": null
          }
        }
      ]
    }"#
}

/// NID rows for the two linked reservoirs, with KS00005 listed twice.
pub(crate) fn fixture_nid_page_json() -> &'static str {
    r#"{
      "features": [
        { "attributes": { "NIDID": "KS00005", "LATITUDE": 38.6142, "LONGITUDE": -97.9531,
                          "SURFACE_AREA": 3550, "NAME": "KANOPOLIS DAM" } },
        { "attributes": { "NIDID": "KS00008", "LATITUDE": 38.9603, "LONGITUDE": -98.4950,
                          "SURFACE_AREA": 9040, "NAME": "WILSON DAM" } },
        { "attributes": { "NIDID": "KS00005", "LATITUDE": 0.0, "LONGITUDE": 0.0,
                          "SURFACE_AREA": 1, "NAME": "DUPLICATE" } }
      ]
    }"#
}

/// Reporting provider response with millisecond timestamps, a null value
/// entry, and entries delivered out of order.
pub(crate) fn fixture_timeseries_ms_json() -> &'static str {
    r#"{
      "key": "KANO.Elev.Inst.1Hour.0.Best-NWK",
      "parameter": "Elev",
      "unit": "ft",
      "values": [
        [1722474000000, 1463.52, 0],
        [1722470400000, 1463.50, 0],
        [1722477600000, null, 0],
        [1722481200000, 1463.55]
      ]
    }"#
}

/// A2W-style export: ISO-8601 string timestamps and no quality column.
pub(crate) fn fixture_timeseries_iso_json() -> &'static str {
    r#"{
      "key": "MILD.Flow-In.Ave.1Day.1Day.Best-NWK",
      "parameter": "Flow-In",
      "unit": "cfs",
      "values": [
        ["2025-07-31T00:00:00Z", 812.0],
        ["2025-08-01T00:00:00+00:00", 790.5],
        [null, 700.0]
      ]
    }"#
}

/// Older envelope with a `timeseries` array.
pub(crate) fn fixture_timeseries_legacy_json() -> &'static str {
    r#"{
      "timeseries": [
        { "name": "TUTC.Elev.Inst.1Hour.0.Best-NWK",
          "values": [[1722470400000, 1075.1, 3], [1722474000000, 1075.2, 3]] },
        { "name": "TUTC.Stor.Inst.1Day.0.Best-NWK",
          "values": [[1722470400000, 250000.0]] }
      ]
    }"#
}

/// Catalog listing for a single office.
pub(crate) fn fixture_catalog_json() -> &'static str {
    r#"{
      "page": "MHx8MjAw", "page-size": 5000, "total": 6,
      "entries": [
        { "name": "KANO.Elev.Inst.1Hour.0.Best-NWK", "office": "NWK" },
        { "name": "KANO.Flow-Out.Ave.1Hour.1Hour.Best-NWK", "office": "NWK" },
        { "name": "WILS-Tailwater.Stage.Inst.15Minutes.0.Ccp-Rev-NWK", "office": "NWK" },
        { "name": "Kansas_River.Stage.Inst.1Hour.0.Raw-NWK", "office": "NWK" },
        { "name": "TUTC.Elev.Inst.1Hour.0.Best-NWK", "office": "NWK" },
        { "office": "NWK" }
      ]
    }"#
}

// ---------------------------------------------------------------------------
// In-memory services
// ---------------------------------------------------------------------------

fn feature_with(field: &str, value: &str) -> Value {
    json!({ "attributes": { field: value } })
}

fn page_bounds(url: &str, total: usize) -> (usize, usize) {
    let offset: usize = query_param(url, "resultOffset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let count: usize = query_param(url, "resultRecordCount")
        .and_then(|v| v.parse().ok())
        .unwrap_or(total);
    let start = offset.min(total);
    let end = (offset + count).min(total);
    (start, end)
}

/// Serves `total` records `ID0..IDn` honoring resultOffset/resultRecordCount.
pub(crate) struct PagedStub {
    total: usize,
    field: String,
    requests: RefCell<Vec<String>>,
}

impl PagedStub {
    pub(crate) fn new(total: usize, field: &str) -> Self {
        PagedStub {
            total,
            field: field.to_string(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl JsonSource for PagedStub {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        let (start, end) = page_bounds(url, self.total);
        let features: Vec<Value> = (start..end)
            .map(|i| feature_with(&self.field, &format!("ID{}", i)))
            .collect();
        Ok(json!({ "features": features }))
    }
}

/// Echoes one feature per value in a `FIELD IN ('a','b')` where-clause.
pub(crate) struct InClauseStub {
    field: String,
    fail_on: Option<usize>,
    requests: RefCell<Vec<String>>,
}

impl InClauseStub {
    pub(crate) fn new(field: &str) -> Self {
        InClauseStub {
            field: field.to_string(),
            fail_on: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Answer the n-th (zero-based) request with HTTP 503.
    pub(crate) fn failing_on_request(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

/// Pulls the quoted values back out of an IN-clause.
pub(crate) fn in_clause_values(where_clause: &str) -> Vec<String> {
    let Some(open) = where_clause.find('(') else { return Vec::new() };
    let inner = where_clause[open + 1..].trim_end_matches(')');
    inner
        .split("','")
        .map(|v| v.trim_matches('\'').replace("''", "'"))
        .filter(|v| !v.is_empty())
        .collect()
}

impl JsonSource for InClauseStub {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let n = {
            let mut requests = self.requests.borrow_mut();
            requests.push(url.to_string());
            requests.len() - 1
        };
        if self.fail_on == Some(n) {
            return Err(FetchError::Status { url: url.to_string(), status: 503 });
        }

        let values = in_clause_values(&query_param(url, "where").unwrap_or_default());
        let (start, end) = page_bounds(url, values.len());
        let features: Vec<Value> = values[start..end]
            .iter()
            .map(|v| feature_with(&self.field, v))
            .collect();
        Ok(json!({ "features": features }))
    }
}

/// Answers every request with a fixed body (or a fixed error status).
pub(crate) struct StaticStub {
    body: Result<Value, u16>,
    requests: RefCell<Vec<String>>,
}

impl StaticStub {
    pub(crate) fn json(text: &str) -> Self {
        StaticStub {
            body: Ok(serde_json::from_str(text).expect("fixture should be valid JSON")),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        StaticStub { body: Err(status), requests: RefCell::new(Vec::new()) }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl JsonSource for StaticStub {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        match &self.body {
            Ok(v) => Ok(v.clone()),
            Err(status) => Err(FetchError::Status { url: url.to_string(), status: *status }),
        }
    }
}

/// Reporting provider that has data for exactly one time-series name.
/// Every other name answers with an empty `values` list.
pub(crate) struct SeriesStub {
    hit: String,
    requests: RefCell<Vec<String>>,
}

impl SeriesStub {
    pub(crate) fn answering(name: &str) -> Self {
        SeriesStub { hit: name.to_string(), requests: RefCell::new(Vec::new()) }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// The `name` parameter of every request, in order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|u| query_param(u, "name"))
            .collect()
    }
}

impl JsonSource for SeriesStub {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        if query_param(url, "name").as_deref() == Some(self.hit.as_str()) {
            Ok(serde_json::from_str(fixture_timeseries_ms_json()).expect("fixture should be valid JSON"))
        } else {
            Ok(json!({ "values": [] }))
        }
    }
}

#[test]
fn test_in_clause_values_round_trip() {
    let values = in_clause_values("NIDID IN ('A1','O''Neil','B2')");
    assert_eq!(values, vec!["A1", "O'Neil", "B2"]);
}

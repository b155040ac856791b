/// USACE CWMS Data API Client
///
/// Retrieves reporting time series and catalog listings from the Corps Water
/// Management System (CWMS) public endpoints.
///
/// Catalog:   https://water.usace.army.mil/cda/catalog/timeseries
/// Reporting: https://water.usace.army.mil/cda/reporting/providers/{district}/timeseries
///
/// Time-series names follow:
/// ```text
/// {LOCATION}.{Parameter}.{Type}.{Interval}.{Duration}.{Version}-{OFFICE}
/// KANO.Elev.Inst.1Hour.0.Best-NWK
/// MILD.Flow-In.Ave.1Day.1Day.Best-NWK
/// ```

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::error::FetchError;
use crate::ingest::http::{JsonSource, build_url};

// ============================================================================
// Time-series identifiers
// ============================================================================

/// A fully-qualified CWMS time-series name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeseriesId {
    pub location: String,
    pub parameter: String,
    /// "Inst", "Ave", "Total"
    pub measurement_type: String,
    /// "15Minutes", "1Hour", "1Day"
    pub interval: String,
    /// "0" for Inst, matches the interval for Ave
    pub duration: String,
    pub version: String,
    pub office: String,
}

impl TimeseriesId {
    /// Instantaneous hourly `Best` series, the most common reservoir pattern.
    pub fn hourly_inst(location: &str, parameter: &str, office: &str) -> Self {
        TimeseriesId {
            location: location.to_string(),
            parameter: parameter.to_string(),
            measurement_type: "Inst".to_string(),
            interval: "1Hour".to_string(),
            duration: "0".to_string(),
            version: "Best".to_string(),
            office: office.to_uppercase(),
        }
    }

    /// Parses `LOC.Param.Type.Interval.Duration.Version-OFFICE`.
    ///
    /// The office is whatever follows the last `-` of the version segment;
    /// versions such as `Ccp-Rev-MVS` keep their inner dashes.
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 6 {
            return None;
        }
        let (version, office) = parts[5].rsplit_once('-')?;
        if parts.iter().take(5).any(|p| p.is_empty()) || version.is_empty() || office.is_empty() {
            return None;
        }

        Some(TimeseriesId {
            location: parts[0].to_string(),
            parameter: parts[1].to_string(),
            measurement_type: parts[2].to_string(),
            interval: parts[3].to_string(),
            duration: parts[4].to_string(),
            version: version.to_string(),
            office: office.to_string(),
        })
    }
}

impl fmt::Display for TimeseriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}-{}",
            self.location,
            self.parameter,
            self.measurement_type,
            self.interval,
            self.duration,
            self.version,
            self.office.to_uppercase()
        )
    }
}

/// Reporting endpoint for a district: `{district}` → lowercase office.
pub fn reporting_url(template: &str, office: &str) -> String {
    template.replace("{district}", &office.to_lowercase())
}

/// Midnight UTC of `date` in the reporting API's format.
pub fn format_cwms_time(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

// ============================================================================
// Parsed data
// ============================================================================

/// One observation from a reporting response.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesPoint {
    /// UTC, timezone stripped
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub quality: Option<i64>,
    pub timeseries_id: String,
    pub parameter: Option<String>,
    pub unit: Option<String>,
}

/// Count, time range, and value statistics for a downloaded series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub count: usize,
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SeriesSummary {
    /// `None` for an empty series.
    pub fn from_points(points: &[TimeseriesPoint]) -> Option<Self> {
        let first = points.iter().map(|p| p.timestamp).min()?;
        let last = points.iter().map(|p| p.timestamp).max()?;
        let min = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
        let mean = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;

        Some(SeriesSummary { count: points.len(), first, last, min, max, mean })
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Accepts ISO-8601 strings (with or without offset) and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.naive_utc())
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok())
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
        }
        _ => None,
    }
}

fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_entries(
    entries: &[Value],
    timeseries_id: &str,
    parameter: Option<&str>,
    unit: Option<&str>,
    out: &mut Vec<TimeseriesPoint>,
) {
    for entry in entries {
        let Some(fields) = entry.as_array() else { continue };
        if fields.len() < 2 {
            continue;
        }

        let (Some(timestamp), Some(value)) = (parse_timestamp(&fields[0]), parse_value(&fields[1]))
        else {
            continue;
        };

        out.push(TimeseriesPoint {
            timestamp,
            value,
            quality: fields.get(2).and_then(Value::as_i64),
            timeseries_id: timeseries_id.to_string(),
            parameter: parameter.map(str::to_string),
            unit: unit.map(str::to_string),
        });
    }
}

/// Parses a reporting response into points sorted by timestamp.
///
/// Handles the current `{"values": [...], "key", "parameter", "unit"}`
/// envelope and the older `{"timeseries": [{"name", "values"}]}` one.
/// Entries with a null or unparseable timestamp or value are skipped.
///
/// # Errors
/// `FetchError::Malformed` when neither envelope is present.
pub fn parse_timeseries(url: &str, body: &Value) -> Result<Vec<TimeseriesPoint>, FetchError> {
    let mut points = Vec::new();

    if let Some(values) = body.get("values") {
        let key = body.get("key").and_then(Value::as_str).unwrap_or("Unknown");
        let parameter = body.get("parameter").and_then(Value::as_str);
        let unit = body.get("unit").and_then(Value::as_str);
        let entries = values.as_array().map(Vec::as_slice).unwrap_or(&[]);
        parse_entries(entries, key, parameter, unit, &mut points);
    } else if let Some(series) = body.get("timeseries").and_then(Value::as_array) {
        for ts in series {
            let name = ts.get("name").and_then(Value::as_str).unwrap_or("Unknown");
            let entries = ts.get("values").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            parse_entries(entries, name, None, None, &mut points);
        }
    } else {
        let keys: Vec<String> = body
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        return Err(FetchError::malformed(
            url,
            format!("no 'values' or 'timeseries' in response (keys: {:?})", keys),
            &body.to_string(),
        ));
    }

    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

/// Extracts `entries[].name` from a catalog listing. Entries without a name
/// are skipped; a body without `entries` yields an empty list.
pub fn parse_catalog(body: &Value) -> Vec<String> {
    body.get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("name").and_then(Value::as_str))
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Distinct parameters among well-formed time-series names, sorted.
pub fn parameters_in(names: &[String]) -> Vec<String> {
    let mut params: Vec<String> = names
        .iter()
        .filter_map(|n| TimeseriesId::parse(n))
        .map(|id| id.parameter)
        .collect();
    params.sort();
    params.dedup();
    params
}

// ============================================================================
// API Client
// ============================================================================

/// Fetch a time series from the district reporting provider.
///
/// # Parameters
/// - `template`: reporting endpoint with a `{district}` placeholder
/// - `id`: full time-series name; its office selects the provider
/// - `begin`, `end`: dates, sent as midnight UTC
pub fn fetch_timeseries<S: JsonSource>(
    source: &S,
    template: &str,
    id: &TimeseriesId,
    begin: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<TimeseriesPoint>, FetchError> {
    let url = build_url(
        &reporting_url(template, &id.office),
        &[
            ("name", id.to_string()),
            ("begin", format_cwms_time(begin)),
            ("end", format_cwms_time(end)),
        ],
    );

    log::info!("Fetching {}", id);
    let body = source.get_json(&url)?;
    let points = parse_timeseries(&url, &body)?;
    log::debug!("{}: {} values", id, points.len());
    Ok(points)
}

/// Fetch the catalog of time-series names, optionally filtered by office and
/// a `like` pattern (e.g. `"KANO.*"`).
pub fn fetch_catalog<S: JsonSource>(
    source: &S,
    endpoint: &str,
    office: Option<&str>,
    like: Option<&str>,
    page_size: Option<usize>,
) -> Result<Vec<String>, FetchError> {
    let mut params = Vec::new();
    if let Some(pattern) = like {
        params.push(("like", pattern.to_string()));
    }
    if let Some(office) = office {
        params.push(("office", office.to_uppercase()));
    }
    if let Some(size) = page_size {
        params.push(("pageSize", size.to_string()));
    }

    let url = build_url(endpoint, &params);
    let body = source.get_json(&url)?;
    let names = parse_catalog(&body);
    if body.get("entries").is_none() {
        log::warn!("{}: catalog response has no 'entries'", url);
    }
    Ok(names)
}

/// Catalog names gathered across several offices.
#[derive(Debug, Default)]
pub struct CatalogSweep {
    pub names: Vec<String>,
    pub failures: Vec<(String, FetchError)>,
}

/// Fetch the catalog for every office in `districts`, one request each.
///
/// A failed office is logged and recorded; the sweep continues.
pub fn sweep_catalogs<S: JsonSource>(
    source: &S,
    endpoint: &str,
    districts: &[String],
    page_size: usize,
    delay: Duration,
) -> CatalogSweep {
    let mut sweep = CatalogSweep::default();

    for (idx, district) in districts.iter().enumerate() {
        if idx > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }

        match fetch_catalog(source, endpoint, Some(district), None, Some(page_size)) {
            Ok(names) => {
                log::info!("{}: {} time series", district, names.len());
                sweep.names.extend(names);
            }
            Err(e) => {
                log::warn!("{}: catalog fetch failed: {}", district, e);
                sweep.failures.push((district.clone(), e));
            }
        }
    }

    sweep
}

// ============================================================================
// Tests
// ============================================================================

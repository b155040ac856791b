/// Time-series download orchestration.
///
/// For every (site, parameter) pair a CWMS time-series name is built, fetched
/// from the site's district reporting provider, and written out:
///   csv  : one file per series: `{code}_{param}_{start}_to_{end}.csv`
///   excel: one workbook for the run: `USACE_Reservoir_Data_{start}_to_{end}.xlsx`,
///           one sheet per series keyed `{name}_{param}` (31-char limit applies)
///
/// Requests are sequential with a courtesy pause between them. A failed or
/// empty series is logged and reported; it never stops the run.
///
/// `discover_series` searches for a series that actually reports data when
/// the right code or parameter name for a reservoir is unknown.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::NaiveDate;
use serde_json::Value;

use crate::config::{AppConfig, DiscoveryConfig, MatchingConfig};
use crate::error::{FetchError, Result};
use crate::ingest::cwms::{self, SeriesSummary, TimeseriesId, TimeseriesPoint};
use crate::ingest::http::{JsonSource, build_url};
use crate::linkage::code_match::name_variations;
use crate::output::csv::write_csv;
use crate::output::xlsx::SheetBook;
use crate::output::{Cell, Table};

pub const SERIES_COLUMNS: [&str; 6] = ["datetime", "value", "quality", "timeseries_id", "parameter", "unit"];

/// A reservoir to download, addressed by CWMS location code and office.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub code: String,
    /// Display name used for sheet keys; defaults to the code
    pub name: String,
    pub district: String,
}

impl Site {
    pub fn new(code: &str, district: &str) -> Self {
        Site {
            code: code.to_string(),
            name: code.to_string(),
            district: district.to_string(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

/// The non-location segments of a time-series name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSpec {
    pub measurement_type: String,
    pub interval: String,
    pub duration: String,
    pub version: String,
}

impl Default for SeriesSpec {
    fn default() -> Self {
        SeriesSpec {
            measurement_type: "Inst".to_string(),
            interval: "1Hour".to_string(),
            duration: "0".to_string(),
            version: "Best".to_string(),
        }
    }
}

impl SeriesSpec {
    pub fn id_for(&self, site: &Site, parameter: &str) -> TimeseriesId {
        TimeseriesId {
            location: site.code.clone(),
            parameter: parameter.to_string(),
            measurement_type: self.measurement_type.clone(),
            interval: self.interval.clone(),
            duration: self.duration.clone(),
            version: self.version.clone(),
            office: site.district.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Excel,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub sites: Vec<Site>,
    pub parameters: Vec<String>,
    pub spec: SeriesSpec,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
}

pub fn csv_filename(code: &str, parameter: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!("{}_{}_{}_to_{}.csv", code, parameter, start, end)
}

pub fn workbook_filename(start: NaiveDate, end: NaiveDate) -> String {
    format!("USACE_Reservoir_Data_{}_to_{}.xlsx", start, end)
}

/// One row per point, indexed by timestamp.
pub fn series_table(points: &[TimeseriesPoint]) -> Table {
    let mut table = Table::new(SERIES_COLUMNS);
    for p in points {
        table.push_row(vec![
            Cell::Timestamp(p.timestamp),
            Cell::Number(p.value),
            p.quality.map_or(Cell::Null, Cell::Integer),
            Cell::from(p.timeseries_id.as_str()),
            Cell::from(p.parameter.clone()),
            Cell::from(p.unit.clone()),
        ]);
    }
    table
}

/// One series to fetch, with the display name used for its sheet key.
#[derive(Debug, Clone)]
pub struct SeriesJob {
    pub name: String,
    pub id: TimeseriesId,
}

/// A series that came back with data.
#[derive(Debug)]
pub struct SeriesOutcome {
    /// `{name}_{param}`
    pub key: String,
    pub id: TimeseriesId,
    pub summary: SeriesSummary,
    pub csv_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<SeriesOutcome>,
    /// Series that answered with no values
    pub empty: Vec<TimeseriesId>,
    pub failed: Vec<(TimeseriesId, FetchError)>,
    pub workbook: Option<PathBuf>,
}

impl DownloadReport {
    pub fn attempted(&self) -> usize {
        self.downloaded.len() + self.empty.len() + self.failed.len()
    }
}

/// Downloads every (site, parameter) pair in `request`.
///
/// Only output errors (unwritable files) abort; fetch failures are recorded.
pub fn download<S: JsonSource>(
    source: &S,
    config: &AppConfig,
    request: &DownloadRequest,
) -> Result<DownloadReport> {
    let jobs: Vec<SeriesJob> = request
        .sites
        .iter()
        .flat_map(|site| {
            request.parameters.iter().map(move |parameter| SeriesJob {
                name: site.name.clone(),
                id: request.spec.id_for(site, parameter),
            })
        })
        .collect();

    download_jobs(
        source,
        config,
        &jobs,
        request.start,
        request.end,
        request.format,
        &request.output_dir,
    )
}

/// Fetches each job in order and writes the results.
///
/// CSV files are named after the series' own location code, so a series
/// found under an alternate code is saved under that code.
pub fn download_jobs<S: JsonSource>(
    source: &S,
    config: &AppConfig,
    jobs: &[SeriesJob],
    start: NaiveDate,
    end: NaiveDate,
    format: OutputFormat,
    output_dir: &Path,
) -> Result<DownloadReport> {
    let delay = config.fetch.timeseries_delay();
    let mut report = DownloadReport::default();
    let mut book = SheetBook::new();

    for (i, job) in jobs.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }

        let id = &job.id;
        let points = match cwms::fetch_timeseries(source, &config.endpoints.reporting, id, start, end) {
            Ok(points) => points,
            Err(e) => {
                log::warn!("Failed to download {} - {}: {}", job.name, id.parameter, e);
                report.failed.push((id.clone(), e));
                continue;
            }
        };

        let Some(summary) = SeriesSummary::from_points(&points) else {
            log::warn!("No data available for {} - {}", job.name, id.parameter);
            report.empty.push(id.clone());
            continue;
        };

        let key = format!("{}_{}", job.name, id.parameter);
        let table = series_table(&points);
        let csv_path = match format {
            OutputFormat::Csv => {
                let path = output_dir.join(csv_filename(&id.location, &id.parameter, start, end));
                write_csv(&table, &path)?;
                Some(path)
            }
            OutputFormat::Excel => {
                book.add(&key, table);
                None
            }
        };

        log::info!("Downloaded {} records for {} - {}", summary.count, job.name, id.parameter);
        report.downloaded.push(SeriesOutcome { key, id: id.clone(), summary, csv_path });
    }

    if format == OutputFormat::Excel && !book.is_empty() {
        let path = output_dir.join(workbook_filename(start, end));
        book.save(&path)?;
        report.workbook = Some(path);
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Series discovery
// ---------------------------------------------------------------------------

/// Parameter tried in the fallback offices.
pub const FALLBACK_PARAMETER: &str = "Elev";

/// Inst series carry duration 0; Ave series never do. Other types are
/// not constrained.
pub fn is_valid_pairing(measurement_type: &str, duration: &str) -> bool {
    if measurement_type.eq_ignore_ascii_case("Inst") {
        duration == "0"
    } else if measurement_type.eq_ignore_ascii_case("Ave") {
        duration != "0"
    } else {
        true
    }
}

/// Every (parameter, spec) combination in search order: parameter, then
/// type, interval, duration. Invalid type/duration pairings are skipped.
pub fn search_order(discovery: &DiscoveryConfig) -> Vec<(String, SeriesSpec)> {
    let mut out = Vec::new();
    for parameter in &discovery.parameters {
        for measurement_type in &discovery.measurement_types {
            for interval in &discovery.intervals {
                for duration in &discovery.durations {
                    if !is_valid_pairing(measurement_type, duration) {
                        continue;
                    }
                    out.push((
                        parameter.clone(),
                        SeriesSpec {
                            measurement_type: measurement_type.clone(),
                            interval: interval.clone(),
                            duration: duration.clone(),
                            version: discovery.version.clone(),
                        },
                    ));
                }
            }
        }
    }
    out
}

/// Codes to try for `site`: its own code, then configured alternates, then
/// codes derived from its display name. Uppercased, first occurrence kept.
pub fn candidate_codes(site: &Site, alternates: &[String], matching: &MatchingConfig) -> Vec<String> {
    let derived = if site.name.eq_ignore_ascii_case(&site.code) {
        Vec::new()
    } else {
        name_variations(&site.name, &matching.generic_terms, matching.max_strip_depth)
    };

    let mut seen = HashSet::new();
    std::iter::once(site.code.clone())
        .chain(alternates.iter().cloned())
        .chain(derived)
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

/// A series that returned data during discovery.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub name: String,
    pub id: TimeseriesId,
    /// Values in the test window
    pub records: usize,
    /// Found only by the fallback-office retry
    pub fallback: bool,
    /// Requests made before and including the hit
    pub attempts: usize,
}

impl Discovered {
    pub fn job(&self) -> SeriesJob {
        SeriesJob { name: self.name.clone(), id: self.id.clone() }
    }
}

/// Searches for the first series of `site` that returns values.
///
/// Candidates are tried in order, each against the full `search_order` in
/// the site's office. When nothing answers, hourly elevation under the
/// site's own code is retried in each fallback office. Request errors
/// count as misses.
pub fn discover_series<S: JsonSource>(
    source: &S,
    config: &AppConfig,
    site: &Site,
    candidates: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Option<Discovered> {
    let order = search_order(&config.discovery);
    let mut attempts = 0;

    for code in candidates {
        let candidate = Site { code: code.clone(), ..site.clone() };
        for (parameter, spec) in &order {
            let id = spec.id_for(&candidate, parameter);
            attempts += 1;
            if let Some(records) = series_has_values(source, config, &id, start, end) {
                log::info!("Found data for {}: {}", site.name, id);
                return Some(Discovered { name: site.name.clone(), id, records, fallback: false, attempts });
            }
        }
    }

    log::warn!("No series found for {} in {}; trying other districts", site.name, site.district);
    for district in &config.discovery.fallback_districts {
        if district.eq_ignore_ascii_case(&site.district) {
            continue;
        }
        let id = TimeseriesId::hourly_inst(&site.code, FALLBACK_PARAMETER, district);
        attempts += 1;
        if let Some(records) = series_has_values(source, config, &id, start, end) {
            log::info!("Found {} in {} district", site.name, id.office);
            return Some(Discovered { name: site.name.clone(), id, records, fallback: true, attempts });
        }
    }

    None
}

fn series_has_values<S: JsonSource>(
    source: &S,
    config: &AppConfig,
    id: &TimeseriesId,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<usize> {
    match cwms::fetch_timeseries(source, &config.endpoints.reporting, id, start, end) {
        Ok(points) if !points.is_empty() => Some(points.len()),
        Ok(_) => {
            log::debug!("{}: empty response", id);
            None
        }
        Err(e) => {
            log::debug!("{}: {}", id, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity probe
// ---------------------------------------------------------------------------

/// Outcome of one probe request.
#[derive(Debug)]
pub struct ProbeResult {
    pub url: String,
    pub outcome: std::result::Result<String, FetchError>,
}

impl ProbeResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One-line description of a response body.
pub fn describe_body(body: &Value) -> String {
    if let Some(values) = body.get("values").and_then(Value::as_array) {
        let param = body.get("parameter").and_then(Value::as_str).unwrap_or("N/A");
        let unit = body.get("unit").and_then(Value::as_str).unwrap_or("N/A");
        return format!("{} values ({}, {})", values.len(), param, unit);
    }
    if let Some(series) = body.get("timeseries").and_then(Value::as_array) {
        return format!("{} timeseries", series.len());
    }
    if let Some(entries) = body.get("entries").and_then(Value::as_array) {
        return format!("{} catalog entries", entries.len());
    }
    match body.as_object() {
        Some(obj) => {
            let keys: Vec<&str> = obj.keys().take(10).map(String::as_str).collect();
            format!("keys: {}", keys.join(", "))
        }
        None => "non-object JSON".to_string(),
    }
}

/// Checks the catalog and reporting endpoints for `district`, using `code`'s
/// hourly elevation over the week before `today` as the reporting sample.
pub fn probe<S: JsonSource>(
    source: &S,
    config: &AppConfig,
    district: &str,
    code: &str,
    today: NaiveDate,
) -> Vec<ProbeResult> {
    let catalog = build_url(
        &config.endpoints.catalog,
        &[("office", district.to_uppercase()), ("pageSize", "10".to_string())],
    );

    let id = TimeseriesId::hourly_inst(code, "Elev", district);
    let begin = today - chrono::Duration::days(7);
    let reporting = build_url(
        &cwms::reporting_url(&config.endpoints.reporting, district),
        &[
            ("name", id.to_string()),
            ("begin", cwms::format_cwms_time(begin)),
            ("end", cwms::format_cwms_time(today)),
        ],
    );

    [catalog, reporting]
        .into_iter()
        .map(|url| {
            log::debug!("Probing {}", url);
            let outcome = source.get_json(&url).map(|body| describe_body(&body));
            ProbeResult { url, outcome }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Saved responses
// ---------------------------------------------------------------------------

pub const SAVED_COLUMNS: [&str; 2] = ["datetime", "value"];
const SAVED_SHEET: &str = "Sheet1";

/// A saved response converted to a workbook.
#[derive(Debug)]
pub struct Conversion {
    pub output: PathBuf,
    /// `None` when the file held no usable values
    pub summary: Option<SeriesSummary>,
}

/// Converts a saved reporting response (`values` pairs) into an `.xlsx`
/// next to it with `datetime,value` columns.
pub fn convert_saved_response(path: &Path) -> Result<Conversion> {
    let text = fs::read_to_string(path)?;
    let body: Value = serde_json::from_str(&text)?;
    let points = cwms::parse_timeseries(&path.display().to_string(), &body)?;

    let mut table = Table::new(SAVED_COLUMNS);
    for p in &points {
        table.push_row(vec![Cell::Timestamp(p.timestamp), Cell::Number(p.value)]);
    }

    let output = path.with_extension("xlsx");
    let mut book = SheetBook::new();
    book.add(SAVED_SHEET, table);
    book.save(&output)?;

    Ok(Conversion { output, summary: SeriesSummary::from_points(&points) })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// End-to-end tests for the reservoir inventory pipeline against an
/// in-memory FeatureServer.
///
/// The fake service serves 2,500 reservoirs (every fifth without a NIDID)
/// through offset pagination, and answers NID `NIDID IN (...)` queries with
/// one dam row per requested ID. No network access is needed.
///
/// Run with: cargo test --test reservoir_pipeline

use std::cell::RefCell;

use serde_json::{Value, json};

use usace_reservoirs::config::AppConfig;
use usace_reservoirs::error::FetchError;
use usace_reservoirs::ingest::arcgis::FeatureService;
use usace_reservoirs::ingest::http::{JsonSource, query_param};
use usace_reservoirs::linkage::code_match::{CandidatePool, CodeMatcher, CodeTable};
use usace_reservoirs::output::csv::write_csv;
use usace_reservoirs::reservoirs::{self, OUTPUT_COLUMNS};

const RESERVOIRS: usize = 2500;
const REZ_URL: &str = "https://fake.test/usace_rez/FeatureServer/0/query";
const NID_URL: &str = "https://fake.test/NID/FeatureServer/0/query";

fn nidid(i: usize) -> Option<String> {
    (i % 5 != 0).then(|| format!("KS{:05}", i))
}

fn dam_lat(id: &str) -> f64 {
    let n: f64 = id.trim_start_matches("KS").parse().unwrap_or(0.0);
    30.0 + n / 1000.0
}

struct FakeServer {
    requests: RefCell<Vec<String>>,
}

impl FakeServer {
    fn new() -> Self {
        FakeServer { requests: RefCell::new(Vec::new()) }
    }

    fn requests_to(&self, fragment: &str) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|u| u.contains(fragment))
            .cloned()
            .collect()
    }
}

fn page(url: &str, total: usize) -> std::ops::Range<usize> {
    let offset: usize = query_param(url, "resultOffset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let count: usize = query_param(url, "resultRecordCount").and_then(|v| v.parse().ok()).unwrap_or(total);
    offset.min(total)..(offset + count).min(total)
}

fn in_values(url: &str) -> Vec<String> {
    let clause = query_param(url, "where").unwrap_or_default();
    let Some(open) = clause.find('(') else { return Vec::new() };
    clause[open + 1..]
        .trim_end_matches(')')
        .split(',')
        .map(|v| v.trim_matches('\'').to_string())
        .collect()
}

impl JsonSource for FakeServer {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        self.requests.borrow_mut().push(url.to_string());

        let features: Vec<Value> = if url.starts_with(REZ_URL) {
            page(url, RESERVOIRS)
                .map(|i| {
                    json!({
                        "attributes": {
                            "NAME": format!("Reservoir {}", i),
                            "DISTRICT": "Kansas City District",
                            "DIST_SYM": "NWK",
                            "OMBIL_SITE_ID": null,
                            "NIDID": nidid(i),
                        },
                        "centroid": { "x": -98.0 - i as f64 / 10000.0, "y": 38.0 }
                    })
                })
                .collect()
        } else if url.starts_with(NID_URL) {
            let ids = in_values(url);
            ids[page(url, ids.len())]
                .iter()
                .map(|id| {
                    json!({ "attributes": {
                        "NIDID": id, "LATITUDE": dam_lat(id), "LONGITUDE": -97.5,
                        "SURFACE_AREA": 1000, "NAME": format!("DAM {}", id)
                    }})
                })
                .collect()
        } else {
            return Err(FetchError::Status { url: url.to_string(), status: 404 });
        };

        Ok(json!({ "features": features }))
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.endpoints.reservoirs = REZ_URL.to_string();
    config.endpoints.nid = NID_URL.to_string();
    config.fetch.arcgis_delay_ms = 0;
    config
}

#[test]
fn test_inventory_pages_and_batches() {
    let server = FakeServer::new();
    let inventory = reservoirs::fetch_inventory(&server, &config()).unwrap();

    assert_eq!(inventory.reservoirs.len(), RESERVOIRS);
    // 1000 + 1000 + 500: the short page ends pagination
    assert_eq!(server.requests_to("/usace_rez/").len(), 3);

    // 2000 distinct NIDIDs in batches of 900 → 3 IN-clause queries
    let nid_requests = server.requests_to("/NID/");
    assert_eq!(nid_requests.len(), 3);
    let sizes: Vec<usize> = nid_requests.iter().map(|u| in_values(u).len()).collect();
    assert_eq!(sizes, vec![900, 900, 200]);
    assert_eq!(inventory.dams.len(), 2000);
    assert!(inventory.dam_failures.is_empty());
}

#[test]
fn test_inventory_csv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join(reservoirs::DEFAULT_OUTPUT);

    let server = FakeServer::new();
    let config = config();
    let inventory = reservoirs::fetch_inventory(&server, &config).unwrap();

    let codes: CodeTable = [("Reservoir 1".to_string(), "RES1".to_string())].into_iter().collect();
    let report = reservoirs::process_inventory(&inventory, &codes, None);
    write_csv(&report.table, &output).unwrap();

    assert_eq!(report.coverage.total, RESERVOIRS);
    assert_eq!(report.coverage.with_dam, 2000);
    assert_eq!(report.coverage.mapped, 1);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(headers, OUTPUT_COLUMNS);

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), RESERVOIRS);

    // primary order preserved
    for (i, row) in rows.iter().enumerate().step_by(97) {
        assert_eq!(&row[0], format!("Reservoir {}", i));
    }

    // no NIDID → blank dam columns and blank nidid
    assert_eq!(&rows[0][6], "");
    assert_eq!(&rows[0][8], "");
    assert_eq!(&rows[0][9], "");

    let one = &rows[1];
    assert_eq!(&one[3], "RES1");
    assert_eq!(&one[9], "KS00001");
    assert_eq!(one[6].parse::<f64>().unwrap(), dam_lat("KS00001"));
    assert_eq!(&one[8], "1000");
    assert_eq!(&one[10], "mapped");
}

#[test]
fn test_inferred_codes_are_labelled() {
    let server = FakeServer::new();
    let config = config();
    let inventory = reservoirs::fetch_inventory(&server, &config).unwrap();

    // every "Reservoir N" name yields variation RESE first
    let mut pool = CandidatePool::new();
    pool.push("RESE", Some("NWK"));
    let matcher = CodeMatcher::new(&pool, &config.matching);

    let report = reservoirs::process_inventory(&inventory, &CodeTable::default(), Some(&matcher));

    assert_eq!(report.coverage.inferred, RESERVOIRS);
    assert_eq!(report.coverage.unmapped(), 0);
}

#[test]
fn test_batched_fetch_matches_single_batch() {
    let server = FakeServer::new();
    let ids: Vec<String> = (0..RESERVOIRS).filter_map(nidid).collect();
    let fields = ["NIDID", "LATITUDE"];

    let service = FeatureService::new(&server, NID_URL);
    let batched = service.fetch_where_in("NIDID", &ids, &fields, 900, 2000).unwrap();
    let single = service.fetch_where_in("NIDID", &ids, &fields, 10_000, 2000).unwrap();

    assert_eq!(batched.batches, 3);
    assert_eq!(single.batches, 1);
    assert_eq!(batched.records, single.records);
}

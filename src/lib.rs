/// usace_reservoirs: USACE reservoir inventory and CWMS time-series tooling.
///
/// # Module structure
///
/// ```text
/// usace_reservoirs
/// ├── error       : FetchError / AppError
/// ├── config      : usace_reservoirs.toml loader (endpoints, fetch tuning, code table)
/// ├── model       : EntityRecord, Centroid, key normalization
/// ├── ingest
/// │   ├── http    : JsonSource seam + blocking reqwest client
/// │   ├── arcgis  : FeatureServer pagination and batched IN-clause queries
/// │   ├── cwms    : CWMS catalog + reporting time series
/// │   └── fixtures (test only): representative API response payloads
/// ├── linkage
/// │   ├── join       : left-outer join on a linking key
/// │   └── code_match : reservoir name → CWMS code matching
/// ├── output
/// │   ├── csv     : Table → CSV
/// │   └── xlsx    : named sheets → XLSX workbook
/// ├── reservoirs  : reservoir + NID inventory pipeline, code suggestions
/// └── download    : time-series download orchestration, connectivity probe
/// ```

pub mod config;
pub mod download;
pub mod error;
pub mod ingest;
pub mod linkage;
pub mod model;
pub mod output;
pub mod reservoirs;

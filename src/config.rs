/// Pipeline configuration loader - parses usace_reservoirs.toml
///
/// Keeps service endpoints, paging constants, matcher settings and the
/// reservoir name → CWMS code table out of the code, so codes can be added
/// after a manual review of `match-codes` output without recompiling.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "usace_reservoirs.toml";

/// Environment variable that overrides `DEFAULT_CONFIG_PATH`.
pub const CONFIG_PATH_ENV: &str = "USACE_RESERVOIRS_CONFIG";

const RESERVOIRS_URL: &str =
    "https://services7.arcgis.com/n1YM8pTrFmm7L4hs/ArcGIS/rest/services/usace_rez/FeatureServer/0/query";
const NID_URL: &str = "https://geospatial.sec.usace.army.mil/dls/rest/services/NID/National_Inventory_of_Dams_Public_Service/FeatureServer/0/query";
const CATALOG_URL: &str = "https://water.usace.army.mil/cda/catalog/timeseries";
const REPORTING_URL: &str =
    "https://water.usace.army.mil/cda/reporting/providers/{district}/timeseries";

const DISTRICTS: [&str; 27] = [
    "NWK", "SWT", "MVS", "MVR", "MVK", "LRL", "LRN", "LRH", "LRP", "NAB", "NAE", "NAO", "NAP",
    "NWO", "NWP", "NWS", "NWW", "SAJ", "SAM", "SAS", "SAW", "SPK", "SPL", "SPN", "SPA", "SWF",
    "SWL",
];

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoints: EndpointConfig,
    pub fetch: FetchConfig,
    pub matching: MatchingConfig,
    pub discovery: DiscoveryConfig,
    /// Reservoir display name → CWMS location code
    pub reservoir_codes: HashMap<String, String>,
}

/// Service endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// usace_rez FeatureServer query endpoint
    pub reservoirs: String,
    /// National Inventory of Dams FeatureServer query endpoint
    pub nid: String,
    /// CWMS time-series catalog
    pub catalog: String,
    /// CWMS reporting provider; `{district}` is replaced by the lowercase office
    pub reporting: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            reservoirs: RESERVOIRS_URL.to_string(),
            nid: NID_URL.to_string(),
            catalog: CATALOG_URL.to_string(),
            reporting: REPORTING_URL.to_string(),
        }
    }
}

/// Paging, batching and courtesy delays
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: usize,
    pub nid_page_size: usize,
    pub nid_batch_size: usize,
    pub catalog_page_size: usize,
    pub arcgis_delay_ms: u64,
    pub catalog_delay_ms: u64,
    pub timeseries_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            page_size: 1000,
            nid_page_size: 2000,
            nid_batch_size: 900,
            catalog_page_size: 5000,
            arcgis_delay_ms: 100,
            catalog_delay_ms: 500,
            timeseries_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    pub fn arcgis_delay(&self) -> Duration {
        Duration::from_millis(self.arcgis_delay_ms)
    }

    pub fn catalog_delay(&self) -> Duration {
        Duration::from_millis(self.catalog_delay_ms)
    }

    pub fn timeseries_delay(&self) -> Duration {
        Duration::from_millis(self.timeseries_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Code matcher settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Whole words stripped from a name before re-deriving variations
    pub generic_terms: Vec<String>,
    /// How many times stripping may recurse
    pub max_strip_depth: usize,
    /// CWMS offices swept when building the candidate pool
    pub districts: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            generic_terms: vec!["LAKE".to_string(), "RESERVOIR".to_string()],
            max_strip_depth: 2,
            districts: DISTRICTS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Series discovery search space, tried in the order listed
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub parameters: Vec<String>,
    pub measurement_types: Vec<String>,
    pub intervals: Vec<String>,
    pub durations: Vec<String>,
    pub version: String,
    /// Offices retried for hourly elevation when the home office has nothing
    pub fallback_districts: Vec<String>,
    /// Length of the test window, ending today
    pub window_days: i64,
    /// Reservoir code → other codes the same project may be filed under
    pub alternate_codes: HashMap<String, Vec<String>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        DiscoveryConfig {
            parameters: strings(&[
                "Elev", "Flow-In", "Flow-Out", "Stor", "Stage", "Elevation", "Pool", "Release",
                "Precip", "Temp-Water", "Gate",
            ]),
            measurement_types: strings(&["Inst", "Ave"]),
            intervals: strings(&["1Hour", "1Day", "15Minutes"]),
            durations: strings(&["0", "1Hour", "1Day"]),
            version: "Best".to_string(),
            fallback_districts: strings(&["SWT", "NWO", "MVS"]),
            window_days: 7,
            alternate_codes: HashMap::new(),
        }
    }
}

/// Resolves the configuration path: `USACE_RESERVOIRS_CONFIG` if set,
/// otherwise `usace_reservoirs.toml` in the working directory.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Parses configuration from TOML text and validates it.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

/// Loads configuration from `path`.
///
/// A missing file is not an error: the built-in defaults are used and the
/// code table is empty. A file that exists but fails to parse is an error.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        log::warn!(
            "{} not found, using built-in defaults (no reservoir code table)",
            path.display()
        );
        return Ok(AppConfig::default());
    }

    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)
        .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?;

    log::info!(
        "Loaded {} ({} reservoir codes)",
        path.display(),
        config.reservoir_codes.len()
    );
    Ok(config)
}

/// Loads configuration from the resolved default path.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path())
}

fn validate(config: &AppConfig) -> Result<()> {
    let fetch = &config.fetch;
    for (name, value) in [
        ("page_size", fetch.page_size),
        ("nid_page_size", fetch.nid_page_size),
        ("nid_batch_size", fetch.nid_batch_size),
        ("catalog_page_size", fetch.catalog_page_size),
    ] {
        if value == 0 {
            return Err(AppError::config(format!("fetch.{} must be greater than zero", name)));
        }
    }

    if config.discovery.window_days <= 0 {
        return Err(AppError::config("discovery.window_days must be greater than zero"));
    }

    if !config.endpoints.reporting.contains("{district}") {
        return Err(AppError::config(
            "endpoints.reporting must contain a {district} placeholder",
        ));
    }

    for (name, code) in &config.reservoir_codes {
        if code.trim().is_empty() {
            return Err(AppError::config(format!("empty CWMS code for '{}'", name)));
        }
    }

    Ok(())
}

//! USACE Reservoir Data Tool
//!
//! Builds the USACE reservoir inventory (usace_rez reservoirs joined to NID
//! dam coordinates), suggests CWMS location codes for reservoirs missing
//! from the code table, and downloads reservoir time series from the CWMS
//! district reporting providers.
//!
//! Usage:
//!   cargo run --release -- reservoirs                        # inventory CSV
//!   cargo run --release -- reservoirs --infer-codes          # ...with inferred codes
//!   cargo run --release -- match-codes                       # code suggestions for review
//!   cargo run --release -- list -r KANO -d NWK               # catalog listing
//!   cargo run --release -- download -r KANO -r WILS -d NWK -p Elev -s 2025-08-01 -e 2025-08-07
//!   cargo run --release -- download -r MILD -d NWK -p Flow-In -t Ave -i 1Day --duration 1Day
//!   cargo run --release -- discover -r KANO -n Kanopolis -r WILS -n Wilson -d NWK
//!   cargo run --release -- probe -d NWK                      # connectivity check
//!
//! Environment:
//!   USACE_RESERVOIRS_CONFIG - configuration file (default: usace_reservoirs.toml)
//!   RUST_LOG                - log filter (default: info, debug with --verbose)

use std::path::{Path, PathBuf};
use std::process;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};

use usace_reservoirs::config::{self, AppConfig};
use usace_reservoirs::download::{
    self, Discovered, DownloadReport, DownloadRequest, OutputFormat, SeriesJob, SeriesSpec, Site,
};
use usace_reservoirs::error::Result;
use usace_reservoirs::ingest::cwms;
use usace_reservoirs::ingest::http::HttpSource;
use usace_reservoirs::linkage::code_match::{CandidatePool, CodeMatcher, CodeTable};
use usace_reservoirs::output::csv::write_csv;
use usace_reservoirs::reservoirs::{self, ListedReservoir};

/// Catalog entries printed by `list` before eliding the rest.
const LIST_LIMIT: usize = 20;
const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Parser, Debug)]
#[command(name = "usace_reservoirs", version, about = "USACE reservoir inventory and CWMS data tool")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the reservoir inventory CSV with dam coordinates and CWMS codes
    Reservoirs {
        #[arg(short, long, default_value = reservoirs::DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Fill codes missing from the table with catalog-inferred guesses
        #[arg(long)]
        infer_codes: bool,
    },

    /// Suggest CWMS codes for every reservoir name, for manual review
    MatchCodes {
        /// Read names from an existing inventory CSV instead of fetching
        #[arg(long)]
        reservoirs_csv: Option<PathBuf>,

        #[arg(short, long, default_value = reservoirs::DEFAULT_MATCH_OUTPUT)]
        output: PathBuf,

        /// TOML `[reservoir_codes]` fragment with the suggestions
        #[arg(long, default_value = reservoirs::DEFAULT_MAPPING_OUTPUT)]
        mapping: PathBuf,
    },

    /// List catalog time series for a reservoir code
    List {
        #[arg(short, long)]
        reservoir: String,

        #[arg(short, long)]
        district: Option<String>,
    },

    /// Download reservoir time series
    Download {
        /// Reservoir code(s), e.g. KANO
        #[arg(short, long = "reservoir", required = true)]
        reservoirs: Vec<String>,

        /// USACE district code, e.g. NWK
        #[arg(short, long)]
        district: String,

        /// Parameter(s), e.g. Elev, Flow-In, Stor
        #[arg(short, long = "parameter", default_value = "Elev")]
        parameters: Vec<String>,

        /// Measurement type: Inst or Ave
        #[arg(short = 't', long = "type", default_value = "Inst")]
        measurement_type: String,

        #[arg(short, long, default_value = "1Hour")]
        interval: String,

        /// 0 for Inst; matches the interval for Ave
        #[arg(long, default_value = "0")]
        duration: String,

        #[arg(long, default_value = "Best")]
        version: String,

        /// Start date YYYY-MM-DD (default: 30 days ago)
        #[arg(short, long)]
        start: Option<NaiveDate>,

        /// End date YYYY-MM-DD (default: today)
        #[arg(short, long)]
        end: Option<NaiveDate>,

        /// Display name for sheet keys (single reservoir only)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Search code, parameter and interval combinations until a series
    /// reports data, then download what was found
    Discover {
        /// Reservoir code(s) to search for
        #[arg(short, long = "reservoir", required = true)]
        reservoirs: Vec<String>,

        /// Display names, paired with reservoirs by position; also used to
        /// derive extra candidate codes
        #[arg(short, long = "name")]
        names: Vec<String>,

        #[arg(short, long, default_value = "NWK")]
        district: String,

        /// Extra candidate codes tried for every reservoir
        #[arg(short, long = "alt")]
        alternates: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Check connectivity to the catalog and reporting endpoints
    Probe {
        #[arg(short, long, default_value = "NWK")]
        district: String,

        /// Reservoir code used for the sample reporting request
        #[arg(short, long, default_value = "KANO")]
        reservoir: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Csv,
    Excel,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => OutputFormat::Csv,
            Format::Excel => OutputFormat::Excel,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    println!("🌊 USACE Reservoir Data Tool");
    println!("============================\n");

    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Failed to load configuration: {}\n", e);
            process::exit(1);
        }
    };

    let source = match HttpSource::new(config.fetch.timeout()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("\n❌ Failed to build HTTP client: {}\n", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Reservoirs { output, infer_codes } => {
            run_reservoirs(&source, &config, &output, infer_codes)
        }
        Command::MatchCodes { reservoirs_csv, output, mapping } => {
            run_match_codes(&source, &config, reservoirs_csv, &output, &mapping)
        }
        Command::List { reservoir, district } => run_list(&source, &config, &reservoir, district),
        Command::Download {
            reservoirs,
            district,
            parameters,
            measurement_type,
            interval,
            duration,
            version,
            start,
            end,
            name,
            format,
            output_dir,
        } => {
            let today = Local::now().date_naive();
            let mut sites: Vec<Site> = reservoirs.iter().map(|r| Site::new(r, &district)).collect();
            match (name, sites.as_mut_slice()) {
                (Some(name), [only]) => *only = only.clone().named(&name),
                (Some(_), _) => log::warn!("--name ignored: more than one reservoir given"),
                _ => {}
            }

            let request = DownloadRequest {
                sites,
                parameters,
                spec: SeriesSpec { measurement_type, interval, duration, version },
                start: start.unwrap_or(today - chrono::Duration::days(DEFAULT_WINDOW_DAYS)),
                end: end.unwrap_or(today),
                format: format.into(),
                output_dir,
            };
            run_download(&source, &config, &request)
        }
        Command::Discover { reservoirs, names, district, alternates, format, output_dir } => {
            if names.len() > reservoirs.len() {
                log::warn!("{} names given for {} reservoirs; extras ignored", names.len(), reservoirs.len());
            }
            let sites: Vec<Site> = reservoirs
                .iter()
                .enumerate()
                .map(|(i, code)| {
                    let site = Site::new(code, &district);
                    match names.get(i) {
                        Some(name) => site.named(name),
                        None => site,
                    }
                })
                .collect();
            run_discover(&source, &config, &sites, &alternates, format.into(), &output_dir)
        }
        Command::Probe { district, reservoir } => run_probe(&source, &config, &district, &reservoir),
    };

    if let Err(e) = result {
        eprintln!("\n❌ {}\n", e);
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Sweeps the configured district catalogs into a candidate pool.
fn build_pool(source: &HttpSource, config: &AppConfig) -> CandidatePool {
    println!("📋 Fetching CWMS catalogs for {} districts...", config.matching.districts.len());
    let sweep = cwms::sweep_catalogs(
        source,
        &config.endpoints.catalog,
        &config.matching.districts,
        config.fetch.catalog_page_size,
        config.fetch.catalog_delay(),
    );
    let pool = CandidatePool::from_timeseries_names(&sweep.names);
    println!(
        "✓ {} time series, {} candidate codes ({} districts failed)\n",
        sweep.names.len(),
        pool.len(),
        sweep.failures.len()
    );
    pool
}

fn run_reservoirs(
    source: &HttpSource,
    config: &AppConfig,
    output: &Path,
    infer_codes: bool,
) -> Result<()> {
    println!("📊 Fetching USACE reservoir data...");
    let inventory = reservoirs::fetch_inventory(source, config)?;
    println!(
        "✓ {} reservoirs, {} dam records ({} NID batches failed)\n",
        inventory.reservoirs.len(),
        inventory.dams.len(),
        inventory.dam_failures.len()
    );

    let codes = CodeTable::new(config.reservoir_codes.clone());
    let pool = if infer_codes { Some(build_pool(source, config)) } else { None };
    let matcher = pool.as_ref().map(|p| CodeMatcher::new(p, &config.matching));

    let report = reservoirs::process_inventory(&inventory, &codes, matcher.as_ref());
    write_csv(&report.table, output)?;

    let c = report.coverage;
    println!("✓ Wrote {} ({} reservoir records)", output.display(), c.total);
    println!("   Dam coordinates: {}/{}", c.with_dam, c.total);
    if report.duplicate_dams > 0 || report.unkeyed_dams > 0 {
        println!(
            "   NID records skipped: {} duplicate NIDIDs, {} without a NIDID",
            report.duplicate_dams, report.unkeyed_dams
        );
    }
    println!(
        "   CWMS code mapping: {}/{} reservoirs from the code table ({} without a table code)",
        c.mapped,
        c.total,
        c.without_table_code()
    );
    if infer_codes {
        println!("   Inferred codes: {} (review before use)", c.inferred);
    }
    if c.unmapped() > 0 {
        println!("\nNote: {} reservoirs have no CWMS code; their cwms_code column is blank.", c.unmapped());
        println!("Add codes under [reservoir_codes] in {}.", config::config_path().display());
    }
    Ok(())
}

fn run_match_codes(
    source: &HttpSource,
    config: &AppConfig,
    reservoirs_csv: Option<PathBuf>,
    output: &Path,
    mapping: &Path,
) -> Result<()> {
    let codes = CodeTable::new(config.reservoir_codes.clone());
    let listed = match reservoirs_csv {
        Some(path) => {
            println!("📋 Loading reservoir names from {}...", path.display());
            reservoirs::read_reservoir_csv(&path)?
        }
        None => {
            println!("📊 Fetching USACE reservoir names...");
            let inventory = reservoirs::fetch_inventory(source, config)?;
            inventory
                .reservoirs
                .iter()
                .filter_map(|r| {
                    let name = r.get_str("NAME")?.trim();
                    (!name.is_empty()).then(|| ListedReservoir {
                        name: name.to_string(),
                        district_code: r.get_str("DIST_SYM").map(str::to_string),
                        cwms_code: codes.lookup(name).map(str::to_string),
                    })
                })
                .collect()
        }
    };
    println!("✓ {} reservoir names\n", listed.len());

    let pool = build_pool(source, config);
    let mut by_namespace: Vec<(String, usize)> = pool
        .namespace_counts()
        .into_iter()
        .map(|(ns, n)| (ns.unwrap_or_else(|| "(none)".to_string()), n))
        .collect();
    by_namespace.sort();
    for (ns, n) in &by_namespace {
        println!("   {}: {} codes", ns, n);
    }

    let matcher = CodeMatcher::new(&pool, &config.matching);
    let report = reservoirs::suggest_codes(&listed, &matcher);

    write_csv(&report.table, output)?;
    std::fs::write(mapping, reservoirs::mapping_toml(&report.suggestions)?)?;

    println!("\n============================================================");
    println!("MATCHING RESULTS");
    println!("============================================================");
    println!("Found matches for {}/{} reservoirs", report.suggestions.len(), listed.len());
    if !report.unmatched.is_empty() {
        println!("\nUnmatched reservoirs:");
        for name in &report.unmatched {
            println!("  {}", name);
        }
    }
    println!("\n✓ Wrote {}", output.display());
    println!("✓ Wrote {} (review before merging into the code table)", mapping.display());
    Ok(())
}

fn run_list(
    source: &HttpSource,
    config: &AppConfig,
    reservoir: &str,
    district: Option<String>,
) -> Result<()> {
    println!("🔍 Searching for time series matching '{}'...", reservoir);
    let pattern = format!("{}.*", reservoir.to_uppercase());
    let mut names = cwms::fetch_catalog(
        source,
        &config.endpoints.catalog,
        district.as_deref(),
        Some(&pattern),
        Some(config.fetch.catalog_page_size),
    )?;

    if names.is_empty() {
        println!("No time series found. Try a different reservoir code.");
        return Ok(());
    }

    names.sort();
    let parameters = cwms::parameters_in(&names);
    if !parameters.is_empty() {
        println!("\nParameters: {}", parameters.join(", "));
    }
    println!("\nFound {} time series:", names.len());
    for name in names.iter().take(LIST_LIMIT) {
        println!("  {}", name);
    }
    if names.len() > LIST_LIMIT {
        println!("  ... and {} more", names.len() - LIST_LIMIT);
    }
    Ok(())
}

fn run_download(source: &HttpSource, config: &AppConfig, request: &DownloadRequest) -> Result<()> {
    println!(
        "📅 Period: {} to {} ({} reservoirs × {} parameters)\n",
        request.start,
        request.end,
        request.sites.len(),
        request.parameters.len()
    );

    let report = download::download(source, config, request)?;
    print_report(&report);

    if report.downloaded.is_empty() && report.attempted() > 0 {
        println!("Try `list -r CODE -d DISTRICT` or `discover -r CODE -d DISTRICT`.");
    }
    Ok(())
}

fn print_report(report: &DownloadReport) {
    for outcome in &report.downloaded {
        let s = &outcome.summary;
        println!("📍 {} ({})", outcome.key, outcome.id);
        println!("   Records: {}", s.count);
        println!("   Date Range: {} to {}", s.first, s.last);
        println!("   Min Value: {:.2}", s.min);
        println!("   Max Value: {:.2}", s.max);
        println!("   Mean Value: {:.2}", s.mean);
        if let Some(path) = &outcome.csv_path {
            println!("   ✓ Saved {}", path.display());
        }
    }
    for id in &report.empty {
        println!("⚠️  No data available for {}", id);
    }
    for (id, e) in &report.failed {
        println!("❌ Failed to download {}: {}", id, e);
    }
    if let Some(path) = &report.workbook {
        println!("\n✓ Saved all data to {}", path.display());
    }

    println!(
        "\n{} of {} series downloaded",
        report.downloaded.len(),
        report.attempted()
    );
}

fn run_discover(
    source: &HttpSource,
    config: &AppConfig,
    sites: &[Site],
    alternates: &[String],
    format: OutputFormat,
    output_dir: &Path,
) -> Result<()> {
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(config.discovery.window_days);
    println!("📅 Searching {} to {} for {} reservoirs", start, end, sites.len());

    let mut found = Vec::new();
    let mut missing = Vec::new();
    for site in sites {
        println!("\n{}", "=".repeat(50));
        println!("Searching for data: {} ({})", site.name, site.code);
        println!("{}", "=".repeat(50));

        let mut extra: Vec<String> = config
            .discovery
            .alternate_codes
            .get(&site.code.to_uppercase())
            .cloned()
            .unwrap_or_default();
        extra.extend(alternates.iter().cloned());
        let candidates = download::candidate_codes(site, &extra, &config.matching);
        println!("   Candidate codes: {}", candidates.join(", "));

        match download::discover_series(source, config, site, &candidates, start, end) {
            Some(d) => {
                let note = if d.fallback { " (other district)" } else { "" };
                println!("✓ {} after {} attempts: {} values{}", d.id, d.attempts, d.records, note);
                found.push(d);
            }
            None => {
                println!("✗ No data found for {} in {} or fallback districts", site.name, site.district);
                missing.push(site.name.clone());
            }
        }
    }

    if !found.is_empty() {
        println!("\n{}", "=".repeat(70));
        println!("DOWNLOAD SUMMARY");
        println!("{}", "=".repeat(70));
        let jobs: Vec<SeriesJob> = found.iter().map(Discovered::job).collect();
        let report = download::download_jobs(source, config, &jobs, start, end, format, output_dir)?;
        print_report(&report);
    }

    println!("\nFound data for {} out of {} reservoirs", found.len(), sites.len());
    if !missing.is_empty() {
        println!("No data: {}", missing.join(", "));
    }
    Ok(())
}

fn run_probe(source: &HttpSource, config: &AppConfig, district: &str, reservoir: &str) -> Result<()> {
    println!("🔌 Testing CWMS API connectivity...");
    let today = Local::now().date_naive();
    let results = download::probe(source, config, district, reservoir, today);

    for r in &results {
        println!("\nTesting: {}", r.url);
        match &r.outcome {
            Ok(description) => println!("   ✓ {}", description),
            Err(e) => println!("   ✗ {}", e),
        }
    }

    let ok = results.iter().filter(|r| r.is_ok()).count();
    println!("\n{} out of {} URLs returned valid data", ok, results.len());
    if ok == results.len() {
        println!("✓ API connectivity confirmed!");
    }
    Ok(())
}

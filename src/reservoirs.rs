/// Reservoir inventory pipeline.
///
/// 1. Fetch every reservoir from the usace_rez FeatureServer (name, district,
///    NIDID, centroid). This is the only mandatory fetch; its failure aborts.
/// 2. Fetch NID dam rows for the reservoirs' NIDIDs in batched IN-clauses.
/// 3. Left-join reservoirs to dams on NIDID.
/// 4. Attach CWMS codes from the configured table, optionally filling gaps
///    with inferred codes from the code matcher.
/// 5. Flatten to a table for CSV output.
///
/// The `match-codes` workflow (name → code suggestions for review) also
/// lives here since it consumes the same reservoir names.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::ingest::arcgis::{BatchFailure, FeatureQuery, FeatureService};
use crate::ingest::http::JsonSource;
use crate::linkage::code_match::{CodeMatcher, CodeTable, MatchTier};
use crate::linkage::join::{CodeSource, JoinedRecord, KeyIndex, join_with_index};
use crate::model::EntityRecord;
use crate::output::{Cell, Table};

pub const LINK_FIELD: &str = "NIDID";
pub const RESERVOIR_FIELDS: [&str; 5] = ["NAME", "DISTRICT", "DIST_SYM", "OMBIL_SITE_ID", "NIDID"];
pub const DAM_FIELDS: [&str; 5] = ["NIDID", "LATITUDE", "LONGITUDE", "SURFACE_AREA", "NAME"];
pub const WGS84: &str = "4326";

pub const DEFAULT_OUTPUT: &str = "usace_reservoirs_with_dam_coords.csv";
pub const DEFAULT_MATCH_OUTPUT: &str = "cwms_code_matches.csv";
pub const DEFAULT_MAPPING_OUTPUT: &str = "cwms_code_mapping.toml";

pub const OUTPUT_COLUMNS: [&str; 11] = [
    "reservoir_name",
    "district_name",
    "district_code",
    "cwms_code",
    "res_centroid_lat",
    "res_centroid_lon",
    "dam_lat",
    "dam_lon",
    "surface_area_acres",
    "nidid",
    "code_source",
];

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Everything fetched for one run.
#[derive(Debug, Default)]
pub struct Inventory {
    pub reservoirs: Vec<EntityRecord>,
    pub dams: Vec<EntityRecord>,
    /// NID batches that failed; their reservoirs come out without dam data
    pub dam_failures: Vec<BatchFailure>,
}

/// Fetches the reservoir listing and the linked NID dam rows.
pub fn fetch_inventory<S: JsonSource>(source: &S, config: &AppConfig) -> Result<Inventory> {
    let fetch = &config.fetch;

    let reservoirs = FeatureService::new(source, config.endpoints.reservoirs.as_str())
        .with_delay(fetch.arcgis_delay())
        .fetch_all(&FeatureQuery::all(&RESERVOIR_FIELDS).with_centroid(WGS84), fetch.page_size)
        .map_err(|e| {
            log::error!("Reservoir listing fetch failed: {}", e);
            AppError::Fetch(e)
        })?;
    log::info!("Retrieved {} reservoir records", reservoirs.len());

    let nidids: Vec<String> = reservoirs.iter().filter_map(|r| r.key(LINK_FIELD)).collect();
    log::info!("{} reservoirs carry a {} link", nidids.len(), LINK_FIELD);

    let dams = FeatureService::new(source, config.endpoints.nid.as_str())
        .with_delay(fetch.arcgis_delay())
        .fetch_where_in(LINK_FIELD, &nidids, &DAM_FIELDS, fetch.nid_batch_size, fetch.nid_page_size)?;
    log::info!(
        "Retrieved {} dam records in {} batches ({} failed)",
        dams.records.len(),
        dams.batches,
        dams.failures.len()
    );

    Ok(Inventory {
        reservoirs,
        dams: dams.records,
        dam_failures: dams.failures,
    })
}

// ---------------------------------------------------------------------------
// Codes
// ---------------------------------------------------------------------------

/// Attaches a code to each row: the configured table first, then (if a
/// matcher is given) the best inferred match.
pub fn assign_codes<'a>(
    rows: Vec<JoinedRecord<'a>>,
    table: &CodeTable,
    matcher: Option<&CodeMatcher<'_>>,
) -> Vec<JoinedRecord<'a>> {
    rows.into_iter()
        .map(|row| {
            let Some(name) = row.primary.get_str("NAME") else { return row };

            if let Some(code) = table.lookup(name) {
                return row.with_code(code.to_string(), CodeSource::Table);
            }
            match matcher.and_then(|m| m.best_match(name)) {
                Some(m) => {
                    let source = match m.tier {
                        MatchTier::Exact => CodeSource::InferredExact,
                        MatchTier::Prefix => CodeSource::InferredPrefix,
                    };
                    row.with_code(m.code, source)
                }
                None => row,
            }
        })
        .collect()
}

/// Code assignment counts for the run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub total: usize,
    pub mapped: usize,
    pub inferred: usize,
    pub with_dam: usize,
}

impl Coverage {
    pub fn from_rows(rows: &[JoinedRecord<'_>]) -> Self {
        let mut coverage = Coverage { total: rows.len(), ..Default::default() };
        for row in rows {
            match row.code.as_ref().map(|(_, source)| source) {
                Some(CodeSource::Table) => coverage.mapped += 1,
                Some(_) => coverage.inferred += 1,
                None => {}
            }
            if row.is_matched() {
                coverage.with_dam += 1;
            }
        }
        coverage
    }

    /// Reservoirs left with no code at all, inferred codes counted as codes.
    pub fn unmapped(&self) -> usize {
        self.total - self.mapped - self.inferred
    }

    /// Reservoirs the code table does not cover, whether or not a code was inferred.
    pub fn without_table_code(&self) -> usize {
        self.total - self.mapped
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn field(value: Option<&serde_json::Value>) -> Cell {
    value.map_or(Cell::Null, Cell::from)
}

/// Flattens joined rows into the output table, one row per reservoir.
pub fn build_table(rows: &[JoinedRecord<'_>]) -> Table {
    let mut table = Table::new(OUTPUT_COLUMNS);
    for row in rows {
        let centroid = row.primary.centroid;
        let (code, source) = match &row.code {
            Some((code, source)) => (Cell::from(code.as_str()), Cell::from(source.as_str())),
            None => (Cell::Null, Cell::Null),
        };

        table.push_row(vec![
            field(row.primary_field("NAME")),
            field(row.primary_field("DISTRICT")),
            field(row.primary_field("DIST_SYM")),
            code,
            Cell::from(centroid.map(|c| c.latitude)),
            Cell::from(centroid.map(|c| c.longitude)),
            field(row.secondary_field("LATITUDE")),
            field(row.secondary_field("LONGITUDE")),
            field(row.secondary_field("SURFACE_AREA")),
            Cell::from(row.key.clone()),
            source,
        ]);
    }
    table
}

/// Result of a reservoir run.
#[derive(Debug)]
pub struct ReservoirReport {
    pub table: Table,
    pub coverage: Coverage,
    pub dam_failures: usize,
    /// Dam records dropped because an earlier record had the same NIDID
    pub duplicate_dams: usize,
    /// Dam records with a blank NIDID
    pub unkeyed_dams: usize,
}

/// Joins, codes, and flattens an inventory.
pub fn process_inventory(
    inventory: &Inventory,
    codes: &CodeTable,
    matcher: Option<&CodeMatcher<'_>>,
) -> ReservoirReport {
    let index = KeyIndex::build(&inventory.dams, LINK_FIELD);
    let joined = join_with_index(&inventory.reservoirs, LINK_FIELD, &index);
    let coded = assign_codes(joined, codes, matcher);

    ReservoirReport {
        table: build_table(&coded),
        coverage: Coverage::from_rows(&coded),
        dam_failures: inventory.dam_failures.len(),
        duplicate_dams: index.duplicates(),
        unkeyed_dams: index.unkeyed(),
    }
}

// ---------------------------------------------------------------------------
// Code suggestions
// ---------------------------------------------------------------------------

/// A reservoir listed in a previously written inventory CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedReservoir {
    pub name: String,
    pub district_code: Option<String>,
    pub cwms_code: Option<String>,
}

/// Reads reservoir names (and existing codes) from an inventory CSV. Rows
/// without a name are skipped.
pub fn read_reservoir_csv(path: &Path) -> Result<Vec<ListedReservoir>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h == name);

    let name_col = col("reservoir_name").ok_or_else(|| {
        AppError::config(format!("{}: no reservoir_name column", path.display()))
    })?;
    let district_col = col("district_code");
    let code_col = col("cwms_code");

    let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(name) = non_empty(record.get(name_col)) else { continue };
        out.push(ListedReservoir {
            name,
            district_code: non_empty(district_col.and_then(|c| record.get(c))),
            cwms_code: non_empty(code_col.and_then(|c| record.get(c))),
        });
    }
    Ok(out)
}

pub const MATCH_COLUMNS: [&str; 7] = [
    "reservoir_name",
    "district_code",
    "current_code",
    "suggested_code",
    "namespace",
    "tier",
    "variation",
];

/// Suggestions for a set of reservoirs.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub table: Table,
    /// name → suggested code, sorted by name
    pub suggestions: BTreeMap<String, String>,
    pub unmatched: Vec<String>,
}

/// Runs the matcher over every reservoir name.
pub fn suggest_codes(reservoirs: &[ListedReservoir], matcher: &CodeMatcher<'_>) -> MatchReport {
    let mut report = MatchReport { table: Table::new(MATCH_COLUMNS), ..Default::default() };

    for r in reservoirs {
        let found = matcher.best_match(&r.name);
        let mut row = vec![
            Cell::from(r.name.as_str()),
            Cell::from(r.district_code.clone()),
            Cell::from(r.cwms_code.clone()),
        ];
        match found {
            Some(m) => {
                report.suggestions.insert(r.name.clone(), m.code.clone());
                row.extend([
                    Cell::from(m.code),
                    Cell::from(m.namespace),
                    Cell::from(m.tier.as_str()),
                    Cell::from(m.variation),
                ]);
            }
            None => report.unmatched.push(r.name.clone()),
        }
        report.table.push_row(row);
    }

    report.unmatched.sort();
    report
}

/// Renders suggestions as a `[reservoir_codes]` TOML section for review.
pub fn mapping_toml(suggestions: &BTreeMap<String, String>) -> Result<String> {
    #[derive(serde::Serialize)]
    struct Fragment<'a> {
        reservoir_codes: &'a BTreeMap<String, String>,
    }

    let body = toml::to_string(&Fragment { reservoir_codes: suggestions })?;
    Ok(format!(
        "# CWMS code suggestions generated from the district catalogs.\n\
         # Review before merging into usace_reservoirs.toml.\n\n{}",
        body
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

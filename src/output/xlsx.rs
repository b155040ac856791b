/// XLSX output: a book of named sheets, one `Table` per sheet.
///
/// Excel limits sheet names to 31 characters. Names are truncated to fit
/// and are NOT made unique: a sheet whose truncated name equals an earlier
/// one (Excel compares case-insensitively) replaces it in place. Each
/// replacement is logged at warn level so lost sheets are visible.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::error::Result;
use crate::output::{Cell, Table};

pub const MAX_SHEET_NAME_CHARS: usize = 31;

const DATETIME_NUM_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const TIMESTAMP_COLUMN_WIDTH: f64 = 20.0;

/// Characters Excel rejects in sheet names.
const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Name Excel keeps for its change-tracking sheet.
const RESERVED: &str = "History";

/// Truncates a sheet name to 31 characters and replaces characters Excel
/// does not allow with `_`, including an apostrophe at either end. An empty
/// name becomes `Sheet`; the reserved `History` becomes `History_`.
pub fn sheet_name(name: &str) -> String {
    let mut chars: Vec<char> = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    if let Some(first) = chars.first_mut().filter(|c| **c == '\'') {
        *first = '_';
    }
    if let Some(last) = chars.last_mut().filter(|c| **c == '\'') {
        *last = '_';
    }

    let cleaned: String = chars.into_iter().collect();
    if cleaned.trim().is_empty() {
        "Sheet".to_string()
    } else if cleaned.eq_ignore_ascii_case(RESERVED) {
        format!("{}_", cleaned)
    } else {
        cleaned
    }
}

/// Days since 1899-12-30, the Excel 1900 date system.
pub fn excel_serial(ts: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (*ts - epoch).num_milliseconds() as f64 / 86_400_000.0
}

#[derive(Debug, Default)]
pub struct SheetBook {
    sheets: Vec<(String, Table)>,
}

impl SheetBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sheet. Returns `true` if it replaced an existing sheet.
    pub fn add(&mut self, name: &str, table: Table) -> bool {
        let name = sheet_name(name);
        let existing = self
            .sheets
            .iter_mut()
            .find(|(n, _)| n.to_lowercase() == name.to_lowercase());

        match existing {
            Some(slot) => {
                log::warn!(
                    "Sheet name '{}' collides with an earlier sheet after truncation; earlier data replaced",
                    name
                );
                *slot = (name, table);
                true
            }
            None => {
                self.sheets.push((name, table));
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Writes every sheet to an `.xlsx` file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let datetime = Format::new().set_num_format(DATETIME_NUM_FORMAT);

        for (name, table) in &self.sheets {
            let worksheet = workbook.add_worksheet().set_name(name)?;
            write_table(worksheet, table, &header, &datetime)?;
        }

        workbook.save(path)?;
        log::info!("Wrote {} sheets to {}", self.sheets.len(), path.display());
        Ok(())
    }
}

fn write_table(
    worksheet: &mut Worksheet,
    table: &Table,
    header: &Format,
    datetime: &Format,
) -> Result<()> {
    for (col, title) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, title, header)?;
    }

    let mut has_timestamps = vec![false; table.columns.len()];
    for (r, row) in table.aligned_rows().enumerate() {
        let r = r as u32 + 1;
        for (c, cell) in row.into_iter().enumerate() {
            let col = c as u16;
            match cell {
                Cell::Null => {}
                Cell::Text(s) => {
                    worksheet.write_string(r, col, s)?;
                }
                Cell::Integer(i) => {
                    worksheet.write_number(r, col, *i as f64)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(r, col, *n)?;
                }
                Cell::Timestamp(ts) => {
                    worksheet.write_number_with_format(r, col, excel_serial(ts), datetime)?;
                    has_timestamps[c] = true;
                }
            }
        }
    }

    for (c, _) in has_timestamps.iter().enumerate().filter(|(_, has)| **has) {
        worksheet.set_column_width(c as u16, TIMESTAMP_COLUMN_WIDTH)?;
    }
    Ok(())
}

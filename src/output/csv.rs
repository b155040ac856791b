use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::output::Table;

/// Writes `table` as CSV to `writer`: header row, then one row per record.
/// Null cells are empty fields.
pub fn write_csv_to<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut csv = ::csv::WriterBuilder::new().from_writer(writer);

    csv.write_record(&table.columns)?;
    for row in table.aligned_rows() {
        csv.write_record(row.iter().map(|cell| cell.render()))?;
    }

    csv.flush()?;
    Ok(())
}

/// Writes `table` to `path`, creating parent directories as needed.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    write_csv_to(table, file)?;
    log::info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

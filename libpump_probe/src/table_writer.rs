use std::path::Path;

use super::error::TableWriterError;
use super::moments::{MomentRow, MomentTable};

/// Write the moment table as CSV, one row per scan step
pub fn write_moment_table(path: &Path, table: &MomentTable) -> Result<(), TableWriterError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in table.rows.iter() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Wrote {} rows to {}", table.rows.len(), path.display());
    Ok(())
}

/// Read a moment table written by [`write_moment_table`]
pub fn read_moment_table(path: &Path) -> Result<MomentTable, TableWriterError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<MomentRow>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MomentTable { rows })
}

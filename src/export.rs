//! Export of the sample table.
//!
//! Export is a pure read of a snapshot: rows are converted to the display unit
//! and written out. Nothing in the engine changes.

use std::path::Path;

use crate::calibration::physical_to_display;
use crate::samples::Sample;
use crate::units::DisplayUnit;

/// One exported row, in display units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExportRow {
    /// Measured height.
    pub measured: f64,
    /// Deviation from the trend line.
    pub flattened: f64,
    /// Shim correction.
    pub shim: f64,
    /// Scrape correction.
    pub scrape: f64,
}

impl ExportRow {
    fn of(sample: &Sample, unit: DisplayUnit) -> Self {
        Self {
            measured: physical_to_display(sample.y, unit),
            flattened: physical_to_display(sample.lin_y_error, unit),
            shim: physical_to_display(sample.shim, unit),
            scrape: physical_to_display(sample.scrape, unit),
        }
    }

    /// Cells formatted to the unit's precision.
    pub fn cells(&self, unit: DisplayUnit) -> [String; 4] {
        let d = unit.decimals();
        [
            format!("{:.*}", d, self.measured),
            format!("{:.*}", d, self.flattened),
            format!("{:.*}", d, self.shim),
            format!("{:.*}", d, self.scrape),
        ]
    }
}

/// Rows for `samples` in path order.
pub fn export_rows(samples: &[Sample], unit: DisplayUnit) -> Vec<ExportRow> {
    samples.iter().map(|s| ExportRow::of(s, unit)).collect()
}

/// Column headers labelled with the unit symbol.
pub fn headers(unit: DisplayUnit) -> [String; 4] {
    let symbol = unit.symbol();
    [
        format!("Measured ({})", symbol),
        format!("Flattened ({})", symbol),
        format!("Shim ({})", symbol),
        format!("Scrape ({})", symbol),
    ]
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use crate::error::AppResult;
    use std::fs::File;
    use std::io::Write;
    use tracing::info;

    // Spreadsheets on some platforms mangle the micro sign.
    fn ascii(cell: &str) -> String {
        cell.replace('\u{3bc}', "u")
    }

    /// Write a header row and one row per sample.
    pub fn write_csv<W: Write>(writer: W, samples: &[Sample], unit: DisplayUnit) -> AppResult<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(headers(unit).iter().map(|h| ascii(h)))?;
        for row in export_rows(samples, unit) {
            writer.write_record(row.cells(unit))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file at `path`.
    pub fn export_csv(path: &Path, samples: &[Sample], unit: DisplayUnit) -> AppResult<()> {
        let file = File::create(path)?;
        write_csv(file, samples, unit)?;
        info!("Exported {} samples to {}", samples.len(), path.display());
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::{AppResult, LevelError};

    pub fn export_csv(_path: &Path, _samples: &[Sample], _unit: DisplayUnit) -> AppResult<()> {
        Err(LevelError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{export_csv, write_csv};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::export_csv;

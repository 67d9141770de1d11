//! CSV/JSON export adapter.

use crate::domain::analytics::{EventRow, build_event_table, summarize};
use crate::domain::engine::BacktestSummary;
use crate::domain::error::LaggardError;
use crate::domain::grid::{GridResult, PivotTable};
use crate::ports::report_port::{EventExport, ExtremesExport, GridExport, ReportPort};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// `outputs/run` + `_events.csv` -> `outputs/run_events.csv`.
pub fn artifact_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn export_err(path: &Path, reason: impl ToString) -> LaggardError {
    LaggardError::Export {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn ensure_parent(path: &Path) -> Result<(), LaggardError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| export_err(dir, e))
        }
        _ => Ok(()),
    }
}

fn write_rows<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<(), LaggardError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| export_err(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| export_err(path, e))?;
    }
    writer.flush().map_err(|e| export_err(path, e))
}

fn write_pivot(path: &Path, table: &PivotTable) -> Result<(), LaggardError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| export_err(path, e))?;

    let mut header = vec!["trigger".to_string()];
    header.extend(table.laggards.iter().map(|l| l.to_string()));
    writer
        .write_record(&header)
        .map_err(|e| export_err(path, e))?;

    for (trigger, row) in table.triggers.iter().zip(&table.values) {
        let mut record = vec![trigger.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer
            .write_record(&record)
            .map_err(|e| export_err(path, e))?;
    }
    writer.flush().map_err(|e| export_err(path, e))
}

impl ReportPort for CsvReportAdapter {
    fn write_events(
        &self,
        summary: &BacktestSummary,
        prefix: &Path,
    ) -> Result<EventExport, LaggardError> {
        let events_csv = artifact_path(prefix, "_events.csv");
        let summary_json = artifact_path(prefix, "_summary.json");
        ensure_parent(&events_csv)?;

        let rows = build_event_table(&summary.events);
        let analytics = summarize(&rows);

        write_rows(&events_csv, &rows)?;
        let json =
            serde_json::to_string_pretty(&analytics).map_err(|e| export_err(&summary_json, e))?;
        fs::write(&summary_json, json).map_err(|e| export_err(&summary_json, e))?;

        info!(
            events = rows.len(),
            path = %events_csv.display(),
            "exported event table"
        );
        Ok(EventExport {
            events_csv,
            summary_json,
            analytics,
        })
    }

    fn write_extremes(
        &self,
        top: &[EventRow],
        bottom: &[EventRow],
        prefix: &Path,
    ) -> Result<ExtremesExport, LaggardError> {
        let top_csv = artifact_path(prefix, "_top_events.csv");
        let bottom_csv = artifact_path(prefix, "_bottom_events.csv");
        ensure_parent(&top_csv)?;

        write_rows(&top_csv, top)?;
        write_rows(&bottom_csv, bottom)?;

        info!(n = top.len(), path = %top_csv.display(), "exported top and bottom events");
        Ok(ExtremesExport {
            top_csv,
            bottom_csv,
        })
    }

    fn write_grid(&self, grid: &GridResult, prefix: &Path) -> Result<GridExport, LaggardError> {
        let returns_csv = artifact_path(prefix, "_returns.csv");
        let winrates_csv = artifact_path(prefix, "_winrates.csv");
        let raw_csv = artifact_path(prefix, "_raw.csv");
        ensure_parent(&returns_csv)?;

        write_pivot(&returns_csv, &grid.return_table)?;
        write_pivot(&winrates_csv, &grid.win_table)?;
        write_rows(&raw_csv, &grid.cells)?;

        info!(cells = grid.cells.len(), path = %raw_csv.display(), "exported grid");
        Ok(GridExport {
            returns_csv,
            winrates_csv,
            raw_csv,
        })
    }
}

//! Export port trait for backtest artifacts.

use std::path::{Path, PathBuf};

use crate::domain::analytics::{AnalyticsSummary, EventRow};
use crate::domain::engine::BacktestSummary;
use crate::domain::error::LaggardError;
use crate::domain::grid::GridResult;

/// Files produced by [`ReportPort::write_events`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventExport {
    pub events_csv: PathBuf,
    pub summary_json: PathBuf,
    pub analytics: AnalyticsSummary,
}

/// Files produced by [`ReportPort::write_grid`].
#[derive(Debug, Clone, PartialEq)]
pub struct GridExport {
    pub returns_csv: PathBuf,
    pub winrates_csv: PathBuf,
    pub raw_csv: PathBuf,
}

/// Files produced by [`ReportPort::write_extremes`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtremesExport {
    pub top_csv: PathBuf,
    pub bottom_csv: PathBuf,
}

pub trait ReportPort {
    /// Write `<prefix>_events.csv` and `<prefix>_summary.json`.
    fn write_events(
        &self,
        summary: &BacktestSummary,
        prefix: &Path,
    ) -> Result<EventExport, LaggardError>;

    /// Write `<prefix>_top_events.csv` and `<prefix>_bottom_events.csv`.
    fn write_extremes(
        &self,
        top: &[EventRow],
        bottom: &[EventRow],
        prefix: &Path,
    ) -> Result<ExtremesExport, LaggardError>;

    /// Write `<prefix>_returns.csv`, `<prefix>_winrates.csv` and `<prefix>_raw.csv`.
    fn write_grid(&self, grid: &GridResult, prefix: &Path) -> Result<GridExport, LaggardError>;
}

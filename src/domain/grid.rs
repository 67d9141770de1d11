//! Trigger × laggard sensitivity grid.
//!
//! Cells share one read-only [`SignalTables`] and run in parallel; results
//! come back in input order, so the output matches a sequential run.

use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use tracing::info;

use super::engine::{EventEngine, SignalTables, StrategyConfig, load_signal_tables};
use super::error::LaggardError;
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    pub trigger: f64,
    pub laggard: f64,
    pub avg_return: f64,
    pub win_rate: f64,
    pub events: usize,
}

/// Values indexed by (trigger, laggard); both axes ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub triggers: Vec<f64>,
    pub laggards: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl PivotTable {
    fn from_cells(cells: &[GridCell], value: impl Fn(&GridCell) -> f64) -> Self {
        let triggers = sorted_axis(cells.iter().map(|c| c.trigger));
        let laggards = sorted_axis(cells.iter().map(|c| c.laggard));
        let mut values = vec![vec![f64::NAN; laggards.len()]; triggers.len()];
        for cell in cells {
            let row = triggers.iter().position(|t| *t == cell.trigger);
            let col = laggards.iter().position(|l| *l == cell.laggard);
            if let (Some(r), Some(c)) = (row, col) {
                values[r][c] = value(cell);
            }
        }
        Self {
            triggers,
            laggards,
            values,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.triggers.len(), self.laggards.len())
    }

    pub fn get(&self, trigger: f64, laggard: f64) -> Option<f64> {
        let r = self.triggers.iter().position(|t| *t == trigger)?;
        let c = self.laggards.iter().position(|l| *l == laggard)?;
        Some(self.values[r][c])
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().flatten().all(|v| !v.is_nan())
    }
}

impl fmt::Display for PivotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "trigger")?;
        for l in &self.laggards {
            write!(f, " {:>10}", l)?;
        }
        writeln!(f)?;
        for (t, row) in self.triggers.iter().zip(&self.values) {
            write!(f, "{:>10}", t)?;
            for v in row {
                write!(f, " {:>10.4}", v)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn sorted_axis(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut axis: Vec<f64> = values.collect();
    axis.sort_by(|a, b| a.total_cmp(b));
    axis.dedup();
    axis
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridResult {
    pub cells: Vec<GridCell>,
    pub return_table: PivotTable,
    pub win_table: PivotTable,
}

/// Run the engine once per (trigger, laggard) pair. Empty lists fall back
/// to the grid defaults in `base`.
pub fn run_parameter_grid(
    tables: &SignalTables,
    base: &StrategyConfig,
    triggers: &[f64],
    laggards: &[f64],
) -> GridResult {
    let triggers = if triggers.is_empty() {
        base.grid_trigger_thresholds.as_slice()
    } else {
        triggers
    };
    let laggards = if laggards.is_empty() {
        base.grid_laggard_pcts.as_slice()
    } else {
        laggards
    };

    let combos: Vec<(f64, f64)> = triggers
        .iter()
        .flat_map(|&t| laggards.iter().map(move |&l| (t, l)))
        .collect();

    let cells: Vec<GridCell> = combos
        .par_iter()
        .map(|&(trigger, laggard)| {
            let config = StrategyConfig {
                trigger_threshold: trigger,
                laggard_pct: laggard,
                ..base.clone()
            };
            let summary = EventEngine::new(&config).run_on(tables);
            GridCell {
                trigger,
                laggard,
                avg_return: summary.avg_return(),
                win_rate: summary.win_rate(),
                events: summary.event_count(),
            }
        })
        .collect();

    for cell in &cells {
        info!(
            trigger = cell.trigger,
            laggard = cell.laggard,
            events = cell.events,
            avg_return = cell.avg_return,
            win_rate = cell.win_rate,
            "grid cell"
        );
    }

    GridResult {
        return_table: PivotTable::from_cells(&cells, |c| c.avg_return),
        win_table: PivotTable::from_cells(&cells, |c| c.win_rate),
        cells,
    }
}

/// Load data once through `port`, then run the grid.
pub fn run_parameter_grid_from_port(
    port: &dyn DataPort,
    base: &StrategyConfig,
    triggers: &[f64],
    laggards: &[f64],
) -> Result<GridResult, LaggardError> {
    let tables = load_signal_tables(port, base)?;
    Ok(run_parameter_grid(&tables, base, triggers, laggards))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(trigger: f64, laggard: f64, avg_return: f64) -> GridCell {
        GridCell {
            trigger,
            laggard,
            avg_return,
            win_rate: 0.5,
            events: 2,
        }
    }

    #[test]
    fn pivot_sorts_axes_and_places_values() {
        let cells = vec![
            cell(0.5, 0.3, 1.0),
            cell(0.5, 0.1, 2.0),
            cell(0.0, 0.3, 3.0),
            cell(0.0, 0.1, 4.0),
        ];
        let table = PivotTable::from_cells(&cells, |c| c.avg_return);
        assert_eq!(table.triggers, vec![0.0, 0.5]);
        assert_eq!(table.laggards, vec![0.1, 0.3]);
        assert_eq!(table.values, vec![vec![4.0, 3.0], vec![2.0, 1.0]]);
        assert_eq!(table.shape(), (2, 2));
        assert_eq!(table.get(0.5, 0.1), Some(2.0));
        assert_eq!(table.get(0.7, 0.1), None);
        assert!(table.is_complete());
    }

    #[test]
    fn pivot_marks_missing_cells() {
        let cells = vec![cell(0.0, 0.1, 1.0), cell(0.5, 0.3, 2.0)];
        let table = PivotTable::from_cells(&cells, |c| c.avg_return);
        assert_eq!(table.shape(), (2, 2));
        assert!(!table.is_complete());
    }

    #[test]
    fn pivot_display_has_header_and_rows() {
        let cells = vec![cell(0.0, 0.3, 0.12345)];
        let rendered = PivotTable::from_cells(&cells, |c| c.avg_return).to_string();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("trigger"));
        assert!(lines[1].contains("0.1235") || lines[1].contains("0.1234"));
    }
}

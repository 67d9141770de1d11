//! Per-event statistics and aggregate summaries for export.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use super::engine::{PathPoint, TradeEvent};

const DEFAULT_PERCENTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

/// One flattened row per event, as written to the events CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub event_id: usize,
    pub signal_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub holding_days: usize,
    pub industries: String,
    pub ticker_count: usize,
    pub tickers: String,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub events: usize,
    pub avg_return: f64,
    pub median_return: f64,
    pub win_rate: f64,
    pub avg_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub event_count: usize,
    pub avg_return: f64,
    pub win_rate: f64,
    pub quantiles: BTreeMap<String, f64>,
    pub yearly: Vec<YearSummary>,
}

/// Worst peak-to-trough move of the compounded path, as a value <= 0.
pub fn max_drawdown(path: &[PathPoint]) -> f64 {
    let mut equity = 1.0_f64;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for point in path {
        equity *= 1.0 + point.ret;
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = worst.min(equity / peak - 1.0);
        }
    }
    worst
}

/// Event rows sorted by entry date; `event_id` is the engine order.
pub fn build_event_table(events: &[TradeEvent]) -> Vec<EventRow> {
    let mut rows: Vec<EventRow> = events
        .iter()
        .enumerate()
        .map(|(i, e)| EventRow {
            event_id: i,
            signal_date: e.signal_date,
            entry_date: e.entry_date,
            exit_date: e.exit_date,
            holding_days: e.path.len(),
            industries: e.industries.join(","),
            ticker_count: e.tickers.len(),
            tickers: e.tickers.join(","),
            total_return: e.total_return,
            max_drawdown: max_drawdown(&e.path),
            win: e.is_win(),
        })
        .collect();
    rows.sort_by_key(|r| r.entry_date);
    rows
}

/// Linearly interpolated quantile of an ascending slice.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn percentile_key(p: f64) -> String {
    format!("p{}", (p * 100.0).round() as i64)
}

pub fn summarize_quantiles(rows: &[EventRow], percentiles: &[f64]) -> BTreeMap<String, f64> {
    let mut returns: Vec<f64> = rows.iter().map(|r| r.total_return).collect();
    returns.sort_by(|a, b| a.total_cmp(b));
    percentiles
        .iter()
        .map(|&p| (percentile_key(p), quantile_sorted(&returns, p)))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn summarize_by_year(rows: &[EventRow]) -> Vec<YearSummary> {
    let mut by_year: BTreeMap<i32, Vec<&EventRow>> = BTreeMap::new();
    for row in rows {
        by_year.entry(row.entry_date.year()).or_default().push(row);
    }

    by_year
        .into_iter()
        .map(|(year, group)| {
            let mut returns: Vec<f64> = group.iter().map(|r| r.total_return).collect();
            let drawdowns: Vec<f64> = group.iter().map(|r| r.max_drawdown).collect();
            let wins = group.iter().filter(|r| r.win).count();
            let avg_return = mean(&returns);
            returns.sort_by(|a, b| a.total_cmp(b));
            YearSummary {
                year,
                events: group.len(),
                avg_return,
                median_return: quantile_sorted(&returns, 0.5),
                win_rate: wins as f64 / group.len() as f64,
                avg_drawdown: mean(&drawdowns),
            }
        })
        .collect()
}

/// The `n` best and `n` worst events by total return. Ties keep table
/// order; an `n` past the table length returns every event.
pub fn top_bottom_events(rows: &[EventRow], n: usize) -> (Vec<EventRow>, Vec<EventRow>) {
    let mut best: Vec<&EventRow> = rows.iter().collect();
    best.sort_by(|a, b| b.total_return.total_cmp(&a.total_return));
    let mut worst: Vec<&EventRow> = rows.iter().collect();
    worst.sort_by(|a, b| a.total_return.total_cmp(&b.total_return));

    (
        best.into_iter().take(n).cloned().collect(),
        worst.into_iter().take(n).cloned().collect(),
    )
}

pub fn summarize(rows: &[EventRow]) -> AnalyticsSummary {
    let returns: Vec<f64> = rows.iter().map(|r| r.total_return).collect();
    let win_rate = if rows.is_empty() {
        0.0
    } else {
        rows.iter().filter(|r| r.win).count() as f64 / rows.len() as f64
    };
    AnalyticsSummary {
        event_count: rows.len(),
        avg_return: mean(&returns),
        win_rate,
        quantiles: summarize_quantiles(rows, &DEFAULT_PERCENTILES),
        yearly: summarize_by_year(rows),
    }
}

//! Laggard selection inside the strongest industries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::industry::IndustryMap;
use super::returns::WeeklyReturn;

/// A stock picked as a laggard, with the weekly return it was picked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaggardPick {
    pub ticker: String,
    pub industry: String,
    pub weekly_ret: f64,
}

/// Number of laggards taken from a bucket of `n`: `floor(n * pct)`, at least one.
///
/// Deliberately floors where [`top_bucket_size`](super::concentration::top_bucket_size)
/// ceils.
pub fn laggard_count(n: usize, pct: f64) -> usize {
    let raw = (n as f64 * pct).floor();
    let size = if raw.is_finite() && raw > 0.0 { raw as usize } else { 0 };
    size.max(1).min(n.max(1))
}

/// Bottom `laggard_count` tickers by weekly return in each target industry
/// for `week`, concatenated in target order.
///
/// Ties keep ticker order. Empty when no industries are given or the week
/// has no rows.
pub fn pick_laggards(
    weekly: &[WeeklyReturn],
    industries: &IndustryMap,
    week: NaiveDate,
    targets: &[String],
    laggard_pct: f64,
) -> Vec<LaggardPick> {
    if targets.is_empty() {
        return Vec::new();
    }
    let mut week_rows: Vec<&WeeklyReturn> = weekly.iter().filter(|r| r.week == week).collect();
    if week_rows.is_empty() {
        return Vec::new();
    }
    week_rows.sort_by(|a, b| a.ticker.cmp(&b.ticker));

    let mut picks = Vec::new();
    for target in targets {
        let mut bucket: Vec<&WeeklyReturn> = week_rows
            .iter()
            .copied()
            .filter(|r| {
                industries
                    .industries_for(&r.ticker, week)
                    .any(|name| name == target)
            })
            .collect();
        if bucket.is_empty() {
            continue;
        }
        bucket.sort_by(|a, b| a.weekly_ret.total_cmp(&b.weekly_ret));
        let cut = laggard_count(bucket.len(), laggard_pct);
        picks.extend(bucket.into_iter().take(cut).map(|r| LaggardPick {
            ticker: r.ticker.clone(),
            industry: target.clone(),
            weekly_ret: r.weekly_ret,
        }));
    }
    picks
}

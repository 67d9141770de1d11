//! Market-wide and per-industry return concentration.
//!
//! Concentration of a cohort is the mean of its top bucket minus its
//! median. The market series also carries the week-over-week change, which
//! is what fires trade events.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::industry::IndustryMap;
use super::returns::WeeklyReturn;

/// Size of the top bucket: `ceil(n * quantile)`, never below one nor above `n`.
pub fn top_bucket_size(n: usize, quantile: f64) -> usize {
    let raw = (n as f64 * quantile).ceil();
    let size = if raw.is_finite() && raw > 0.0 { raw as usize } else { 0 };
    size.max(1).min(n.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConcentrationStats {
    pub top_mean: f64,
    pub median: f64,
    pub concentration: f64,
}

impl ConcentrationStats {
    /// `None` for an empty cohort.
    pub fn compute(values: &[f64], top_quantile: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        let k = top_bucket_size(n, top_quantile);
        let top_mean = sorted[n - k..].iter().sum::<f64>() / k as f64;

        Some(Self {
            top_mean,
            median,
            concentration: top_mean - median,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketConcentration {
    pub week: NaiveDate,
    pub top_mean: f64,
    pub median: f64,
    pub concentration: f64,
    /// Change from the previous week; undefined for the first week.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndustryConcentration {
    pub week: NaiveDate,
    pub industry: String,
    pub top_mean: f64,
    pub median: f64,
    pub concentration: f64,
}

/// Industry concentration rows grouped by week, industries in name order.
#[derive(Debug, Clone, Default)]
pub struct IndustryConcentrationTable {
    by_week: BTreeMap<NaiveDate, Vec<IndustryConcentration>>,
}

impl IndustryConcentrationTable {
    pub fn week(&self, week: NaiveDate) -> &[IndustryConcentration] {
        self.by_week.get(&week).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_week.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_week.is_empty()
    }
}

pub fn compute_market_concentration(
    weekly: &[WeeklyReturn],
    top_quantile: f64,
) -> Vec<MarketConcentration> {
    let mut by_week: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for row in weekly {
        by_week.entry(row.week).or_default().push(row.weekly_ret);
    }

    let mut out = Vec::with_capacity(by_week.len());
    let mut prev: Option<f64> = None;
    for (week, values) in by_week {
        let Some(stats) = ConcentrationStats::compute(&values, top_quantile) else {
            continue;
        };
        out.push(MarketConcentration {
            week,
            top_mean: stats.top_mean,
            median: stats.median,
            concentration: stats.concentration,
            delta: prev.map(|p| stats.concentration - p),
        });
        prev = Some(stats.concentration);
    }
    out
}

/// Inner join of weekly returns with industry membership, grouped by
/// (week, industry). Unmapped tickers are dropped.
pub fn compute_industry_concentration(
    weekly: &[WeeklyReturn],
    industries: &IndustryMap,
    top_quantile: f64,
) -> IndustryConcentrationTable {
    let mut groups: BTreeMap<(NaiveDate, &str), Vec<f64>> = BTreeMap::new();
    for row in weekly {
        for industry in industries.industries_for(&row.ticker, row.week) {
            groups
                .entry((row.week, industry))
                .or_default()
                .push(row.weekly_ret);
        }
    }

    let mut by_week: BTreeMap<NaiveDate, Vec<IndustryConcentration>> = BTreeMap::new();
    for ((week, industry), values) in groups {
        if let Some(stats) = ConcentrationStats::compute(&values, top_quantile) {
            by_week.entry(week).or_default().push(IndustryConcentration {
                week,
                industry: industry.to_string(),
                top_mean: stats.top_mean,
                median: stats.median,
                concentration: stats.concentration,
            });
        }
    }
    IndustryConcentrationTable { by_week }
}

/// The `top_n` most concentrated industries in `week`, strongest first.
///
/// Ties keep name order. A week with no rows yields an empty list, which
/// callers treat as "no signal".
pub fn rank_industries(
    table: &IndustryConcentrationTable,
    week: NaiveDate,
    top_n: usize,
) -> Vec<String> {
    let mut rows: Vec<&IndustryConcentration> = table.week(week).iter().collect();
    rows.sort_by(|a, b| b.concentration.total_cmp(&a.concentration));
    rows.into_iter()
        .take(top_n)
        .map(|r| r.industry.clone())
        .collect()
}

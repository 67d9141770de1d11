//! Daily return construction and weekly resampling.
//!
//! Daily returns come from an adjusted close series rebased on each
//! ticker's first usable adjustment factor, so a return between two bars is
//! `close_t * f_t / (close_{t-1} * f_{t-1}) - 1`. Weekly returns compound
//! daily returns into calendar weeks that end on a configurable weekday.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::bar::DailyBar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReturn {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub ret: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReturn {
    pub ticker: String,
    /// Label of the week: the configured week-ending weekday on or after
    /// every trade date inside the week.
    pub week: NaiveDate,
    pub weekly_ret: f64,
}

/// Build sorted daily returns from raw bars.
///
/// Input may be unsorted. Duplicate (ticker, date) rows keep the last one
/// seen. Bars whose close or factor is unusable inherit the previous
/// adjusted close (a zero return); leading unusable bars produce nothing.
pub fn build_daily_returns(bars: &[DailyBar]) -> Vec<DailyReturn> {
    let mut sorted: Vec<&DailyBar> = bars.iter().collect();
    sorted.sort_by(|a, b| {
        a.ticker
            .cmp(&b.ticker)
            .then_with(|| a.trade_date.cmp(&b.trade_date))
    });
    // Stable sort keeps input order among duplicates; keep the last one.
    let mut deduped: Vec<&DailyBar> = Vec::with_capacity(sorted.len());
    for bar in sorted {
        match deduped.last_mut() {
            Some(last) if last.ticker == bar.ticker && last.trade_date == bar.trade_date => {
                *last = bar;
            }
            _ => deduped.push(bar),
        }
    }

    let mut out = Vec::with_capacity(deduped.len());
    let mut current: Option<&str> = None;
    let mut base_factor: Option<f64> = None;
    let mut prev_adj: Option<f64> = None;

    for bar in deduped {
        if current != Some(bar.ticker.as_str()) {
            current = Some(bar.ticker.as_str());
            base_factor = None;
            prev_adj = None;
        }

        let adjusted = if bar.is_adjustable() {
            let base = *base_factor.get_or_insert(bar.adj_factor);
            Some(bar.close * bar.adj_factor / base)
        } else {
            None
        };
        let filled = adjusted.or(prev_adj);

        if let (Some(prev), Some(cur)) = (prev_adj, filled) {
            out.push(DailyReturn {
                ticker: bar.ticker.clone(),
                trade_date: bar.trade_date,
                ret: cur / prev - 1.0,
            });
        }
        prev_adj = filled;
    }

    out
}

/// Weekly bucketing rule, e.g. `W-FRI` for weeks ending Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekEnding(pub Weekday);

impl Default for WeekEnding {
    fn default() -> Self {
        WeekEnding(Weekday::Fri)
    }
}

impl WeekEnding {
    /// The week-ending date of the bucket containing `date`.
    pub fn week_of(&self, date: NaiveDate) -> NaiveDate {
        let today = date.weekday().num_days_from_monday();
        let target = self.0.num_days_from_monday();
        let ahead = (target + 7 - today) % 7;
        date.checked_add_days(Days::new(u64::from(ahead)))
            .unwrap_or(date)
    }
}

impl FromStr for WeekEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let day = upper.strip_prefix("W-").unwrap_or(&upper);
        let weekday = match day {
            "MON" => Weekday::Mon,
            "TUE" => Weekday::Tue,
            "WED" => Weekday::Wed,
            "THU" => Weekday::Thu,
            "FRI" | "W" => Weekday::Fri,
            "SAT" => Weekday::Sat,
            "SUN" => Weekday::Sun,
            _ => return Err(format!("unknown week rule '{}', expected W-MON..W-SUN", s)),
        };
        Ok(WeekEnding(weekday))
    }
}

impl fmt::Display for WeekEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = match self.0 {
            Weekday::Mon => "MON",
            Weekday::Tue => "TUE",
            Weekday::Wed => "WED",
            Weekday::Thu => "THU",
            Weekday::Fri => "FRI",
            Weekday::Sat => "SAT",
            Weekday::Sun => "SUN",
        };
        write!(f, "W-{}", day)
    }
}

/// Compound `(1 + r)` over the slice, minus one.
pub fn compound(returns: impl IntoIterator<Item = f64>) -> f64 {
    returns.into_iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Compound daily returns into weekly returns per ticker.
///
/// Input order does not matter; output is sorted by (ticker, week) with one
/// row per pair. Weeks without observations are omitted, so the output
/// panel is sparse.
pub fn resample_weekly_returns(daily: &[DailyReturn], rule: WeekEnding) -> Vec<WeeklyReturn> {
    let mut growth: BTreeMap<(&str, NaiveDate), f64> = BTreeMap::new();
    for row in daily {
        *growth
            .entry((row.ticker.as_str(), rule.week_of(row.trade_date)))
            .or_insert(1.0) *= 1.0 + row.ret;
    }

    growth
        .into_iter()
        .map(|((ticker, week), g)| WeeklyReturn {
            ticker: ticker.to_string(),
            week,
            weekly_ret: g - 1.0,
        })
        .collect()
}

//! Trading calendar: sorted, deduplicated trade dates with offset lookups.

use chrono::NaiveDate;
use std::collections::BTreeSet;

use super::returns::DailyReturn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: unique.into_iter().collect(),
        }
    }

    /// Union of all dates carrying a daily return.
    pub fn from_returns(returns: &[DailyReturn]) -> Self {
        Self::new(returns.iter().map(|r| r.trade_date))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// First trading day strictly after `date`.
    pub fn next_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d <= date);
        self.dates.get(idx).copied()
    }

    /// The trading day `offset` positions after `date`, clamped to the last
    /// known day. `date` must be a trading day.
    pub fn forward(&self, date: NaiveDate, offset: usize) -> Option<NaiveDate> {
        let idx = self.dates.binary_search(&date).ok()?;
        let target = idx.saturating_add(offset).min(self.dates.len() - 1);
        self.dates.get(target).copied()
    }

    /// Trading days in `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> &[NaiveDate] {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        if lo >= hi { &[] } else { &self.dates[lo..hi] }
    }
}

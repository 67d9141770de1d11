//! Market data access port trait.
//!
//! Implementations fail with `DataUnavailable` when nothing can be
//! produced; retries, if any, belong to the implementation.

use crate::domain::bar::{DailyBar, IndustryMember};
use crate::domain::error::LaggardError;
use chrono::NaiveDate;

pub trait DataPort {
    /// Bars for every ticker with `start_date <= trade_date <= end_date`.
    fn get_daily_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyBar>, LaggardError>;

    fn get_industry_mapping(&self, level: u8) -> Result<Vec<IndustryMember>, LaggardError>;
}

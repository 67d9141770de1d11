//! Raw market data rows: daily bars and industry membership.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub close: f64,
    pub prev_close: f64,
    pub adj_factor: f64,
}

impl DailyBar {
    /// Close and adjustment factor are both usable for building an adjusted price.
    pub fn is_adjustable(&self) -> bool {
        self.close.is_finite()
            && self.close > 0.0
            && self.adj_factor.is_finite()
            && self.adj_factor > 0.0
    }
}

/// One ticker's membership in an industry, optionally bounded in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryMember {
    pub ticker: String,
    pub industry: String,
    pub in_date: Option<NaiveDate>,
    pub out_date: Option<NaiveDate>,
}

impl IndustryMember {
    pub fn new(ticker: &str, industry: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            industry: industry.to_string(),
            in_date: None,
            out_date: None,
        }
    }

    /// Missing bounds are open-ended.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.in_date.is_none_or(|d| d <= date) && self.out_date.is_none_or(|d| date <= d)
    }
}

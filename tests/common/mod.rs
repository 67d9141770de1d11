#![allow(dead_code)]

use chrono::{Datelike, NaiveDate};
use laggard::domain::bar::{DailyBar, IndustryMember};
use laggard::domain::engine::StrategyConfig;
use laggard::domain::error::LaggardError;
use laggard::ports::data_port::DataPort;
use std::fmt::Write as _;

#[derive(Default)]
pub struct MockDataPort {
    pub bars: Vec<DailyBar>,
    pub members: Vec<IndustryMember>,
    pub bar_error: Option<String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, bars: Vec<DailyBar>) -> Self {
        self.bars.extend(bars);
        self
    }

    pub fn with_member(mut self, member: IndustryMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_bar_error(mut self, reason: &str) -> Self {
        self.bar_error = Some(reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn get_daily_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyBar>, LaggardError> {
        if let Some(reason) = &self.bar_error {
            return Err(LaggardError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .iter()
            .filter(|b| b.trade_date >= start_date && b.trade_date <= end_date)
            .cloned()
            .collect())
    }

    fn get_industry_mapping(&self, _level: u8) -> Result<Vec<IndustryMember>, LaggardError> {
        Ok(self.members.clone())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `days` weekday bars starting at `start`, compounding by `drift` each day.
pub fn drift_bars(ticker: &str, start: NaiveDate, days: usize, drift: f64) -> Vec<DailyBar> {
    let mut bars = Vec::with_capacity(days);
    let mut d = start;
    let mut price = 10.0;
    while bars.len() < days {
        if d.weekday().num_days_from_monday() < 5 {
            price *= drift;
            bars.push(DailyBar {
                ticker: ticker.to_string(),
                trade_date: d,
                close: price,
                prev_close: price / drift,
                adj_factor: 1.0,
            });
        }
        d = d.succ_opt().unwrap();
    }
    bars
}

/// Three tickers over 60 business days from 2020-01-01: AAA and BBB in
/// "X" drifting up, CCC in "Y" drifting down.
pub fn scenario_bars() -> Vec<DailyBar> {
    let start = date(2020, 1, 1);
    let mut bars = drift_bars("AAA", start, 60, 1.0020);
    bars.extend(drift_bars("BBB", start, 60, 1.0005));
    bars.extend(drift_bars("CCC", start, 60, 0.9990));
    bars
}

pub fn scenario_members() -> Vec<IndustryMember> {
    vec![
        IndustryMember::new("AAA", "X"),
        IndustryMember::new("BBB", "X"),
        IndustryMember::new("CCC", "Y"),
    ]
}

pub fn scenario_port() -> MockDataPort {
    scenario_members()
        .into_iter()
        .fold(MockDataPort::new().with_bars(scenario_bars()), |port, m| {
            port.with_member(m)
        })
}

pub fn scenario_config() -> StrategyConfig {
    StrategyConfig {
        start_date: date(2020, 1, 1),
        end_date: date(2020, 12, 31),
        trigger_threshold: -1.0,
        laggard_pct: 0.5,
        hold_days: 5,
        top_industry_n: 1,
        ..StrategyConfig::default()
    }
}

/// The scenario as `daily_bars.csv` contents, dates in compact form.
pub fn scenario_bars_csv() -> String {
    let mut out = String::from("ts_code,trade_date,close,pre_close,adj_factor\n");
    for b in scenario_bars() {
        writeln!(
            out,
            "{},{},{},{},{}",
            b.ticker,
            b.trade_date.format("%Y%m%d"),
            b.close,
            b.prev_close,
            b.adj_factor
        )
        .unwrap();
    }
    out
}

pub fn scenario_industry_csv() -> String {
    let mut out = String::from("ts_code,industry_name\n");
    for m in scenario_members() {
        writeln!(out, "{},{}", m.ticker, m.industry).unwrap();
    }
    out
}

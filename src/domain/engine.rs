//! Event engine: concentration-spike triggers to evaluated trade events.
//!
//! Each week of the market concentration series is either idle or
//! triggered (`delta > trigger_threshold`). A triggered week ranks
//! industries, picks laggards, enters on the next trading day and holds the
//! equal-weighted basket for `hold_days` trading days. Any missing piece
//! along the way skips the week; events never share state.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use super::bar::{DailyBar, IndustryMember};
use super::calendar::TradingCalendar;
use super::concentration::{
    IndustryConcentrationTable, MarketConcentration, compute_industry_concentration,
    compute_market_concentration, rank_industries,
};
use super::error::LaggardError;
use super::industry::IndustryMap;
use super::returns::{
    WeekEnding, WeeklyReturn, build_daily_returns, compound, resample_weekly_returns,
};
use super::selector::{LaggardPick, pick_laggards};
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub market_top_pct: f64,
    pub industry_top_pct: f64,
    pub laggard_pct: f64,
    pub trigger_threshold: f64,
    pub hold_days: usize,
    pub top_industry_n: usize,
    pub week_ending: WeekEnding,
    pub industry_level: u8,
    pub grid_trigger_thresholds: Vec<f64>,
    pub grid_laggard_pcts: Vec<f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap_or_default(),
            market_top_pct: 0.3,
            industry_top_pct: 0.3,
            laggard_pct: 0.3,
            trigger_threshold: 0.3,
            hold_days: 60,
            top_industry_n: 3,
            week_ending: WeekEnding::default(),
            industry_level: 2,
            grid_trigger_thresholds: vec![0.0, 0.1, 0.3, 0.5],
            grid_laggard_pcts: vec![0.3, 0.5, 0.7],
        }
    }
}

/// Every derived table the engine reads. Depends on the data and on the
/// top-pct and week settings only, so one instance serves a whole grid.
#[derive(Debug, Clone)]
pub struct SignalTables {
    pub market: Vec<MarketConcentration>,
    pub industry: IndustryConcentrationTable,
    pub industries: IndustryMap,
    pub calendar: TradingCalendar,
    weekly_by_week: BTreeMap<NaiveDate, Vec<WeeklyReturn>>,
    returns_by_ticker: HashMap<String, BTreeMap<NaiveDate, f64>>,
}

impl SignalTables {
    pub fn build(bars: &[DailyBar], members: &[IndustryMember], config: &StrategyConfig) -> Self {
        let daily = build_daily_returns(bars);
        let weekly = resample_weekly_returns(&daily, config.week_ending);
        let industries = IndustryMap::new(members);
        let market = compute_market_concentration(&weekly, config.market_top_pct);
        let industry =
            compute_industry_concentration(&weekly, &industries, config.industry_top_pct);
        let calendar = TradingCalendar::from_returns(&daily);

        let mut returns_by_ticker: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();
        for row in &daily {
            returns_by_ticker
                .entry(row.ticker.clone())
                .or_default()
                .insert(row.trade_date, row.ret);
        }

        debug!(
            daily = daily.len(),
            weekly = weekly.len(),
            market_weeks = market.len(),
            industry_rows = industry.len(),
            trading_days = calendar.len(),
            "signal tables built"
        );

        let mut weekly_by_week: BTreeMap<NaiveDate, Vec<WeeklyReturn>> = BTreeMap::new();
        for row in weekly {
            weekly_by_week.entry(row.week).or_default().push(row);
        }

        SignalTables {
            market,
            industry,
            industries,
            calendar,
            weekly_by_week,
            returns_by_ticker,
        }
    }

    pub fn weekly_for(&self, week: NaiveDate) -> &[WeeklyReturn] {
        self.weekly_by_week
            .get(&week)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn daily_return(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        self.returns_by_ticker.get(ticker)?.get(&date).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathPoint {
    pub date: NaiveDate,
    pub ret: f64,
}

/// A fully evaluated trade. Only ever built complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub signal_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub industries: Vec<String>,
    pub tickers: Vec<String>,
    pub stock_returns: BTreeMap<String, f64>,
    pub path: Vec<PathPoint>,
    pub total_return: f64,
    pub laggard_snapshot: Vec<LaggardPick>,
}

impl TradeEvent {
    pub fn is_win(&self) -> bool {
        self.total_return > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub events: Vec<TradeEvent>,
}

impl BacktestSummary {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn avg_return(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        self.events.iter().map(|e| e.total_return).sum::<f64>() / self.events.len() as f64
    }

    pub fn win_rate(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let wins = self.events.iter().filter(|e| e.is_win()).count();
        wins as f64 / self.events.len() as f64
    }
}

pub struct EventEngine<'a> {
    config: &'a StrategyConfig,
}

impl<'a> EventEngine<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        Self { config }
    }

    /// Load data through `port`, build the signal tables and run.
    pub fn run(&self, port: &dyn DataPort) -> Result<BacktestSummary, LaggardError> {
        let tables = load_signal_tables(port, self.config)?;
        Ok(self.run_on(&tables))
    }

    /// Scan every market week in order; one event per accepted trigger.
    pub fn run_on(&self, tables: &SignalTables) -> BacktestSummary {
        let events: Vec<TradeEvent> = tables
            .market
            .iter()
            .filter_map(|record| self.evaluate_week(tables, record))
            .collect();
        debug!(
            trigger = self.config.trigger_threshold,
            laggard_pct = self.config.laggard_pct,
            events = events.len(),
            "backtest complete"
        );
        BacktestSummary { events }
    }

    /// `None` when the week is idle or any stage finds nothing to trade.
    pub fn evaluate_week(
        &self,
        tables: &SignalTables,
        record: &MarketConcentration,
    ) -> Option<TradeEvent> {
        let delta = record.delta.filter(|d| !d.is_nan())?;
        if delta <= self.config.trigger_threshold {
            return None;
        }
        let week = record.week;

        let ranked = rank_industries(&tables.industry, week, self.config.top_industry_n);
        let laggards = pick_laggards(
            tables.weekly_for(week),
            &tables.industries,
            week,
            &ranked,
            self.config.laggard_pct,
        );
        if laggards.is_empty() {
            debug!(%week, "skipped: no laggards");
            return None;
        }

        let Some(entry_date) = tables.calendar.next_after(week) else {
            debug!(%week, "skipped: no trading day after signal");
            return None;
        };
        let exit_date = tables
            .calendar
            .forward(entry_date, self.config.hold_days)
            .unwrap_or(entry_date);

        let mut seen = BTreeSet::new();
        let tickers: Vec<String> = laggards
            .iter()
            .filter(|p| seen.insert(p.ticker.as_str()))
            .map(|p| p.ticker.clone())
            .collect();

        let Some((path, stock_returns)) =
            evaluate_portfolio(tables, &tickers, entry_date, exit_date)
        else {
            debug!(%week, %entry_date, %exit_date, "skipped: empty return path");
            return None;
        };
        let total_return = compound(path.iter().map(|p| p.ret));

        let industries: Vec<String> = laggards
            .iter()
            .map(|p| p.industry.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(%week, %entry_date, %exit_date, tickers = tickers.len(), total_return, "event");

        Some(TradeEvent {
            signal_date: week,
            entry_date,
            exit_date,
            industries,
            tickers,
            stock_returns,
            path,
            total_return,
            laggard_snapshot: laggards,
        })
    }
}

/// Fetch bars and membership and derive the signal tables.
pub fn load_signal_tables(
    port: &dyn DataPort,
    config: &StrategyConfig,
) -> Result<SignalTables, LaggardError> {
    info!(
        start = %config.start_date,
        end = %config.end_date,
        "loading daily bars"
    );
    let bars = port.get_daily_bars(config.start_date, config.end_date)?;
    if bars.is_empty() {
        return Err(LaggardError::DataUnavailable {
            what: format!("daily bars {}..{}", config.start_date, config.end_date),
        });
    }
    let members = port.get_industry_mapping(config.industry_level)?;
    if members.is_empty() {
        return Err(LaggardError::DataUnavailable {
            what: format!("industry mapping level {}", config.industry_level),
        });
    }
    info!(
        bars = bars.len(),
        members = members.len(),
        "market data loaded"
    );
    Ok(SignalTables::build(&bars, &members, config))
}

/// Equal-weighted daily path over `[entry, exit]` plus each ticker's
/// compounded return. Tickers without a return on a day sit that day out.
pub fn evaluate_portfolio(
    tables: &SignalTables,
    tickers: &[String],
    entry: NaiveDate,
    exit: NaiveDate,
) -> Option<(Vec<PathPoint>, BTreeMap<String, f64>)> {
    let mut path = Vec::new();
    let mut per_ticker: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for &date in tables.calendar.between(entry, exit) {
        let mut sum = 0.0;
        let mut count = 0usize;
        for ticker in tickers {
            if let Some(r) = tables.daily_return(ticker, date) {
                sum += r;
                count += 1;
                per_ticker.entry(ticker.clone()).or_default().push(r);
            }
        }
        if count > 0 {
            path.push(PathPoint {
                date,
                ret: sum / count as f64,
            });
        }
    }

    if path.is_empty() {
        return None;
    }
    let stock_returns = per_ticker
        .into_iter()
        .map(|(ticker, rets)| (ticker, compound(rets)))
        .collect();
    Some((path, stock_returns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Weekday closes compounding at a fixed daily drift.
    fn drift_bars(ticker: &str, start: NaiveDate, days: usize, drift: f64) -> Vec<DailyBar> {
        let mut bars = Vec::new();
        let mut d = start;
        let mut price = 10.0;
        while bars.len() < days {
            if chrono::Datelike::weekday(&d).num_days_from_monday() < 5 {
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

    fn sample_tables(config: &StrategyConfig) -> SignalTables {
        let start = date(2020, 1, 1);
        let mut bars = drift_bars("AAA", start, 30, 1.002);
        bars.extend(drift_bars("BBB", start, 30, 1.0005));
        bars.extend(drift_bars("CCC", start, 30, 0.999));
        let members = vec![
            IndustryMember::new("AAA", "X"),
            IndustryMember::new("BBB", "X"),
            IndustryMember::new("CCC", "Y"),
        ];
        SignalTables::build(&bars, &members, config)
    }

    fn always_trigger() -> StrategyConfig {
        StrategyConfig {
            trigger_threshold: -1.0,
            laggard_pct: 0.5,
            hold_days: 5,
            top_industry_n: 1,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn default_config_matches_documented_values() {
        let c = StrategyConfig::default();
        assert_eq!(c.start_date, date(2020, 1, 1));
        assert_eq!(c.end_date, date(2025, 8, 31));
        assert_eq!(c.hold_days, 60);
        assert_eq!(c.top_industry_n, 3);
        assert_eq!(c.industry_level, 2);
        assert_eq!(c.week_ending.to_string(), "W-FRI");
        assert_eq!(c.grid_trigger_thresholds, vec![0.0, 0.1, 0.3, 0.5]);
        assert_eq!(c.grid_laggard_pcts, vec![0.3, 0.5, 0.7]);
    }

    #[test]
    fn summary_of_no_events_is_zero() {
        let s = BacktestSummary::default();
        assert_eq!(s.event_count(), 0);
        assert_relative_eq!(s.avg_return(), 0.0);
        assert_relative_eq!(s.win_rate(), 0.0);
    }

    #[test]
    fn first_week_never_triggers() {
        let config = always_trigger();
        let tables = sample_tables(&config);
        let engine = EventEngine::new(&config);
        assert!(tables.market[0].delta.is_none());
        assert!(engine.evaluate_week(&tables, &tables.market[0]).is_none());
    }

    #[test]
    fn triggered_week_buys_laggard_of_strongest_industry() {
        let config = always_trigger();
        let tables = sample_tables(&config);
        let engine = EventEngine::new(&config);

        let event = engine
            .evaluate_week(&tables, &tables.market[1])
            .expect("second week should trigger");
        assert_eq!(event.signal_date, date(2020, 1, 10));
        assert_eq!(event.entry_date, date(2020, 1, 13));
        assert_eq!(event.exit_date, date(2020, 1, 20));
        assert_eq!(event.industries, vec!["X"]);
        assert_eq!(event.tickers, vec!["BBB"]);
        assert_eq!(event.path.len(), 6);
        assert_eq!(event.laggard_snapshot.len(), 1);
        assert_eq!(event.laggard_snapshot[0].industry, "X");
        assert_relative_eq!(
            event.total_return,
            1.0005_f64.powi(6) - 1.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(event.stock_returns["BBB"], event.total_return, epsilon = 1e-12);
    }

    #[test]
    fn high_threshold_keeps_engine_idle() {
        let config = StrategyConfig {
            trigger_threshold: 0.5,
            ..always_trigger()
        };
        let tables = sample_tables(&config);
        let summary = EventEngine::new(&config).run_on(&tables);
        assert_eq!(summary.event_count(), 0);
    }

    #[test]
    fn trigger_without_next_trading_day_is_skipped() {
        let config = always_trigger();
        let tables = sample_tables(&config);
        // Data ends Tuesday 2020-02-11; the final week is labelled Friday 02-14.
        let record = MarketConcentration {
            delta: Some(1.0),
            ..tables.market.last().unwrap().clone()
        };
        assert_eq!(record.week, date(2020, 2, 14));
        assert!(!tables.weekly_for(record.week).is_empty());
        assert_eq!(tables.calendar.next_after(record.week), None);

        let engine = EventEngine::new(&config);
        assert!(engine.evaluate_week(&tables, &record).is_none());
    }

    #[test]
    fn exit_clamps_to_last_trading_day() {
        let config = StrategyConfig {
            hold_days: 500,
            ..always_trigger()
        };
        let tables = sample_tables(&config);
        let summary = EventEngine::new(&config).run_on(&tables);
        assert!(summary.event_count() > 0);
        let last = tables.calendar.last().unwrap();
        assert!(summary.events.iter().all(|e| e.exit_date == last));
    }

    #[test]
    fn portfolio_excludes_missing_tickers_per_day() {
        let config = always_trigger();
        let tables = sample_tables(&config);
        let tickers = vec!["AAA".to_string(), "NOPE".to_string()];
        let (path, stock) =
            evaluate_portfolio(&tables, &tickers, date(2020, 1, 13), date(2020, 1, 14)).unwrap();
        assert_eq!(path.len(), 2);
        assert_relative_eq!(path[0].ret, 0.002, epsilon = 1e-9);
        assert_eq!(stock.len(), 1);
        assert!(stock.contains_key("AAA"));
    }

    #[test]
    fn portfolio_without_data_is_none() {
        let config = always_trigger();
        let tables = sample_tables(&config);
        let tickers = vec!["NOPE".to_string()];
        assert!(evaluate_portfolio(&tables, &tickers, date(2020, 1, 13), date(2020, 1, 17)).is_none());
    }

    #[test]
    fn win_rate_counts_positive_events() {
        let make = |r: f64| TradeEvent {
            signal_date: date(2020, 1, 3),
            entry_date: date(2020, 1, 6),
            exit_date: date(2020, 1, 10),
            industries: vec!["X".into()],
            tickers: vec!["AAA".into()],
            stock_returns: BTreeMap::new(),
            path: vec![],
            total_return: r,
            laggard_snapshot: vec![],
        };
        let summary = BacktestSummary {
            events: vec![make(0.1), make(-0.05), make(0.0), make(0.03)],
        };
        assert_eq!(summary.event_count(), 4);
        assert_relative_eq!(summary.win_rate(), 0.5);
        assert_relative_eq!(summary.avg_return(), 0.02, epsilon = 1e-12);
    }
}

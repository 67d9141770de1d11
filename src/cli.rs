//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::analytics::{build_event_table, summarize, top_bottom_events};
use crate::domain::config_validation::{
    check_grid_values, parse_date, parse_grid_list, validate_config,
};
use crate::domain::engine::{EventEngine, StrategyConfig};
use crate::domain::error::LaggardError;
use crate::domain::grid::{GridResult, run_parameter_grid_from_port};
use crate::domain::industry::IndustryMap;
use crate::domain::returns::WeekEnding;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

pub const DEFAULT_OUTPUT_PREFIX: &str = "outputs/backtest";

#[derive(Parser, Debug)]
#[command(
    name = "laggard",
    about = "Industry concentration laggard backtester"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the event backtest
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
        /// Export prefix; files are written as `<prefix>_events.csv` etc.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip writing export files
        #[arg(long)]
        no_export: bool,
        /// Also report the N best and N worst events
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Sweep trigger thresholds against laggard fractions
    Grid {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        triggers: Vec<f64>,
        #[arg(long, value_delimiter = ',')]
        laggards: Vec<f64>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write pivot and raw CSVs
        #[arg(long)]
        export: bool,
    },
    /// Load bars and industry mapping and report coverage
    VerifyData {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Validate a configuration file without loading data
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Command-line values that take precedence over the INI file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    #[arg(long)]
    pub start_date: Option<NaiveDate>,
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub industry_level: Option<u8>,
    #[arg(long)]
    pub market_top_pct: Option<f64>,
    #[arg(long)]
    pub industry_top_pct: Option<f64>,
    #[arg(long)]
    pub laggard_pct: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub trigger_threshold: Option<f64>,
    #[arg(long)]
    pub hold_days: Option<u32>,
    #[arg(long)]
    pub top_industry_n: Option<u32>,
    #[arg(long)]
    pub week_ending: Option<String>,
    /// Bypass the SQLite cache even when one is configured
    #[arg(long)]
    pub no_cache: bool,
}

impl Overrides {
    pub fn layer<'a>(&self, base: &'a dyn ConfigPort) -> LayeredConfig<'a> {
        let mut layered = LayeredConfig::new(base);
        if let Some(v) = self.start_date {
            layered.set("data", "start_date", v);
        }
        if let Some(v) = self.end_date {
            layered.set("data", "end_date", v);
        }
        if let Some(v) = &self.data_dir {
            layered.set("data", "data_dir", v.display());
        }
        if let Some(v) = self.industry_level {
            layered.set("data", "industry_level", v);
        }
        let strategy: [(&str, Option<f64>); 4] = [
            ("market_top_pct", self.market_top_pct),
            ("industry_top_pct", self.industry_top_pct),
            ("laggard_pct", self.laggard_pct),
            ("trigger_threshold", self.trigger_threshold),
        ];
        for (key, value) in strategy {
            if let Some(v) = value {
                layered.set("strategy", key, v);
            }
        }
        if let Some(v) = self.hold_days {
            layered.set("strategy", "hold_days", v);
        }
        if let Some(v) = self.top_industry_n {
            layered.set("strategy", "top_industry_n", v);
        }
        if let Some(v) = &self.week_ending {
            layered.set("strategy", "week_ending", v);
        }
        if self.no_cache {
            layered.set("cache", "enabled", false);
        }
        layered
    }
}

/// A [`ConfigPort`] with in-memory values shadowing a base config.
pub struct LayeredConfig<'a> {
    base: &'a dyn ConfigPort,
    overrides: HashMap<(String, String), String>,
}

impl<'a> LayeredConfig<'a> {
    pub fn new(base: &'a dyn ConfigPort) -> Self {
        Self {
            base,
            overrides: HashMap::new(),
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl ToString) {
        self.overrides
            .insert((section.to_string(), key.to_string()), value.to_string());
    }

    fn lookup(&self, section: &str, key: &str) -> Option<&str> {
        self.overrides
            .get(&(section.to_string(), key.to_string()))
            .map(String::as_str)
    }
}

impl ConfigPort for LayeredConfig<'_> {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        match self.lookup(section, key) {
            Some(v) => Some(v.to_string()),
            None => self.base.get_string(section, key),
        }
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.lookup(section, key) {
            Some(v) => v.trim().parse().unwrap_or(default),
            None => self.base.get_int(section, key, default),
        }
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        match self.lookup(section, key) {
            Some(v) => v.trim().parse().unwrap_or(default),
            None => self.base.get_double(section, key, default),
        }
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.lookup(section, key) {
            Some(v) => v.trim().parse().unwrap_or(default),
            None => self.base.get_bool(section, key, default),
        }
    }
}

/// Where market data comes from; handed to the adapters at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceConfig {
    pub data_dir: PathBuf,
    pub cache_path: Option<PathBuf>,
    pub pool_size: u32,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run {
            config,
            overrides,
            output,
            no_export,
            top_n,
        } => run_backtest(&config, &overrides, output.as_deref(), no_export, top_n),
        Command::Grid {
            config,
            overrides,
            triggers,
            laggards,
            output,
            export,
        } => run_grid(
            &config,
            &overrides,
            &triggers,
            &laggards,
            output.as_deref(),
            export,
        ),
        Command::VerifyData { config, overrides } => run_verify_data(&config, &overrides),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: LaggardError) -> ExitCode {
    error!("{err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path).map_err(fail)
}

pub fn build_strategy_config(config: &dyn ConfigPort) -> Result<StrategyConfig, LaggardError> {
    let defaults = StrategyConfig::default();

    let date_or = |key: &str, default: NaiveDate| -> Result<NaiveDate, LaggardError> {
        match config.get_string("data", key) {
            Some(raw) => parse_date(&raw, "data", key),
            None => Ok(default),
        }
    };
    let count = |key: &str, default: usize| -> Result<usize, LaggardError> {
        let raw = config.get_int("strategy", key, default as i64);
        usize::try_from(raw)
            .ok()
            .filter(|v| *v >= 1)
            .ok_or_else(|| {
                LaggardError::config_invalid("strategy", key, format!("{} must be at least 1", key))
            })
    };

    let week_ending = match config.get_string("strategy", "week_ending") {
        Some(rule) => rule
            .parse::<WeekEnding>()
            .map_err(|reason| LaggardError::config_invalid("strategy", "week_ending", reason))?,
        None => defaults.week_ending,
    };
    let industry_level = u8::try_from(config.get_int(
        "data",
        "industry_level",
        i64::from(defaults.industry_level),
    ))
    .map_err(|_| LaggardError::config_invalid("data", "industry_level", "out of range"))?;

    Ok(StrategyConfig {
        start_date: date_or("start_date", defaults.start_date)?,
        end_date: date_or("end_date", defaults.end_date)?,
        market_top_pct: config.get_double("strategy", "market_top_pct", defaults.market_top_pct),
        industry_top_pct: config.get_double(
            "strategy",
            "industry_top_pct",
            defaults.industry_top_pct,
        ),
        laggard_pct: config.get_double("strategy", "laggard_pct", defaults.laggard_pct),
        trigger_threshold: config.get_double(
            "strategy",
            "trigger_threshold",
            defaults.trigger_threshold,
        ),
        hold_days: count("hold_days", defaults.hold_days)?,
        top_industry_n: count("top_industry_n", defaults.top_industry_n)?,
        week_ending,
        industry_level,
        grid_trigger_thresholds: parse_grid_list(config, "trigger_thresholds")?
            .unwrap_or(defaults.grid_trigger_thresholds),
        grid_laggard_pcts: parse_grid_list(config, "laggard_pcts")?
            .unwrap_or(defaults.grid_laggard_pcts),
    })
}

pub fn build_data_source_config(config: &dyn ConfigPort) -> Result<DataSourceConfig, LaggardError> {
    let data_dir = config
        .get_string("data", "data_dir")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| LaggardError::ConfigMissing {
            section: "data".into(),
            key: "data_dir".into(),
        })?;

    let cache_path = config
        .get_string("cache", "path")
        .filter(|s| !s.trim().is_empty())
        .filter(|_| config.get_bool("cache", "enabled", true))
        .map(PathBuf::from);
    let pool_size = u32::try_from(config.get_int("cache", "pool_size", 4))
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| LaggardError::config_invalid("cache", "pool_size", "must be at least 1"))?;

    Ok(DataSourceConfig {
        data_dir: PathBuf::from(data_dir),
        cache_path,
        pool_size,
    })
}

/// CSV store, wrapped in the SQLite cache when one is configured.
pub fn open_data_port(source: &DataSourceConfig) -> Result<Box<dyn DataPort>, LaggardError> {
    let csv = CsvAdapter::new(source.data_dir.clone());

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::{CachedDataPort, SqliteCache};

        if let Some(path) = &source.cache_path {
            let cache = SqliteCache::open(&path.display().to_string(), source.pool_size)?;
            info!(path = %path.display(), "using sqlite cache");
            return Ok(Box::new(CachedDataPort::new(csv, cache)));
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        if source.cache_path.is_some() {
            warn!("sqlite feature disabled, ignoring [cache] path");
        }
    }

    Ok(Box::new(csv))
}

fn output_prefix(config: &dyn ConfigPort, output: Option<&Path>) -> PathBuf {
    output
        .map(Path::to_path_buf)
        .or_else(|| config.get_string("output", "prefix").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PREFIX))
}

/// Everything a data-loading command needs, validated.
struct Prepared {
    strategy: StrategyConfig,
    port: Box<dyn DataPort>,
    prefix: PathBuf,
}

fn prepare(
    config_path: &Path,
    overrides: &Overrides,
    output: Option<&Path>,
) -> Result<Prepared, ExitCode> {
    let file = load_config(config_path)?;
    let config = overrides.layer(&file);

    validate_config(&config).map_err(fail)?;
    let strategy = build_strategy_config(&config).map_err(fail)?;
    let source = build_data_source_config(&config).map_err(fail)?;
    let port = open_data_port(&source).map_err(fail)?;

    Ok(Prepared {
        strategy,
        port,
        prefix: output_prefix(&config, output),
    })
}

/// Backtest, optional export, and the JSON report printed by `run`.
///
/// With `top_n`, the report also carries the best and worst events, and an
/// export writes them next to the event table.
pub fn run_backtest_pipeline(
    port: &dyn DataPort,
    strategy: &StrategyConfig,
    export: Option<(&dyn ReportPort, &Path)>,
    top_n: Option<usize>,
) -> Result<serde_json::Value, LaggardError> {
    let summary = EventEngine::new(strategy).run(port)?;
    info!(
        events = summary.event_count(),
        avg_return = summary.avg_return(),
        win_rate = summary.win_rate(),
        "backtest finished"
    );

    let rows = build_event_table(&summary.events);
    let extremes = top_n.map(|n| top_bottom_events(&rows, n));

    let (analytics, exports) = match export {
        Some((report, prefix)) => {
            let written = report.write_events(&summary, prefix)?;
            let mut paths = json!({
                "events_csv": written.events_csv.display().to_string(),
                "summary_json": written.summary_json.display().to_string(),
            });
            if let Some((top, bottom)) = &extremes {
                let files = report.write_extremes(top, bottom, prefix)?;
                paths["top_events_csv"] = json!(files.top_csv.display().to_string());
                paths["bottom_events_csv"] = json!(files.bottom_csv.display().to_string());
            }
            (written.analytics, paths)
        }
        None => (summarize(&rows), json!(null)),
    };

    let mut report = json!({
        "events": summary.event_count(),
        "avg_return": summary.avg_return(),
        "win_rate": summary.win_rate(),
        "analytics": analytics,
        "exports": exports,
    });
    if let Some((top, bottom)) = extremes {
        report["top_events"] = json!(top);
        report["bottom_events"] = json!(bottom);
    }
    Ok(report)
}

fn run_backtest(
    config_path: &Path,
    overrides: &Overrides,
    output: Option<&Path>,
    no_export: bool,
    top_n: Option<usize>,
) -> ExitCode {
    let prepared = match prepare(config_path, overrides, output) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let reporter = CsvReportAdapter::new();
    let export = (!no_export).then_some((&reporter as &dyn ReportPort, prepared.prefix.as_path()));

    match run_backtest_pipeline(prepared.port.as_ref(), &prepared.strategy, export, top_n) {
        Ok(report) => print_json(&report),
        Err(e) => fail(e),
    }
}

pub fn run_grid_pipeline(
    port: &dyn DataPort,
    strategy: &StrategyConfig,
    triggers: &[f64],
    laggards: &[f64],
    export: Option<(&dyn ReportPort, &Path)>,
) -> Result<GridResult, LaggardError> {
    check_grid_values(triggers, laggards)?;
    let grid = run_parameter_grid_from_port(port, strategy, triggers, laggards)?;
    if let Some((report, prefix)) = export {
        let written = report.write_grid(&grid, prefix)?;
        info!(path = %written.raw_csv.display(), "grid exported");
    }
    Ok(grid)
}

fn run_grid(
    config_path: &Path,
    overrides: &Overrides,
    triggers: &[f64],
    laggards: &[f64],
    output: Option<&Path>,
    export: bool,
) -> ExitCode {
    let prepared = match prepare(config_path, overrides, output) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let reporter = CsvReportAdapter::new();
    let export = export.then_some((&reporter as &dyn ReportPort, prepared.prefix.as_path()));

    match run_grid_pipeline(
        prepared.port.as_ref(),
        &prepared.strategy,
        triggers,
        laggards,
        export,
    ) {
        Ok(grid) => {
            println!("Average return:");
            print!("{}", grid.return_table);
            println!();
            println!("Win rate:");
            print!("{}", grid.win_table);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// What `verify-data` reports about the configured range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataCoverage {
    pub bar_rows: usize,
    pub tickers: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub industry_rows: usize,
    pub mapped_tickers: usize,
    pub industries: usize,
    pub industry_level: u8,
}

pub fn verify_data(
    port: &dyn DataPort,
    strategy: &StrategyConfig,
) -> Result<DataCoverage, LaggardError> {
    let bars = port.get_daily_bars(strategy.start_date, strategy.end_date)?;
    let members = port.get_industry_mapping(strategy.industry_level)?;

    let tickers: BTreeSet<&str> = bars.iter().map(|b| b.ticker.as_str()).collect();
    let map = IndustryMap::new(&members);

    Ok(DataCoverage {
        bar_rows: bars.len(),
        tickers: tickers.len(),
        first_date: bars.iter().map(|b| b.trade_date).min(),
        last_date: bars.iter().map(|b| b.trade_date).max(),
        industry_rows: members.len(),
        mapped_tickers: map.ticker_count(),
        industries: map.industry_names().len(),
        industry_level: strategy.industry_level,
    })
}

fn run_verify_data(config_path: &Path, overrides: &Overrides) -> ExitCode {
    let prepared = match prepare(config_path, overrides, None) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match verify_data(prepared.port.as_ref(), &prepared.strategy) {
        Ok(coverage) => print_json(&coverage),
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = validate_config(&config) {
        return fail(e);
    }
    match build_strategy_config(&config) {
        Ok(strategy) => {
            if config.get_string("data", "data_dir").is_none() {
                warn!("[data] data_dir is not set; run, grid and verify-data need it");
            }
            println!(
                "config ok: {}..{}, trigger {}, laggard {}, hold {} days, week {}",
                strategy.start_date,
                strategy.end_date,
                strategy.trigger_threshold,
                strategy.laggard_pct,
                strategy.hold_days,
                strategy.week_ending
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(LaggardError::Export {
            path: "stdout".into(),
            reason: e.to_string(),
        }),
    }
}

//! CSV directory data adapter.
//!
//! Layout under `base_path`:
//! - `daily_bars.csv`: `ts_code,trade_date,close,pre_close,adj_factor`
//! - `industry_l{level}.csv`: `ts_code,industry_name[,in_date,out_date]`
//!
//! Columns are located by header name, so extra columns and any column
//! order are accepted.

use crate::domain::bar::{DailyBar, IndustryMember};
use crate::domain::error::LaggardError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DAILY_BARS_FILE: &str = "daily_bars.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn bars_path(&self) -> PathBuf {
        self.base_path.join(DAILY_BARS_FILE)
    }

    pub fn industry_path(&self, level: u8) -> PathBuf {
        self.base_path.join(format!("industry_l{}.csv", level))
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, LaggardError> {
    if !path.exists() {
        return Err(LaggardError::DataUnavailable {
            what: format!("{} not found", path.display()),
        });
    }
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| LaggardError::malformed(source_name(path), e.to_string()))
}

fn required_column(headers: &StringRecord, name: &str, source: &str) -> Result<usize, LaggardError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| LaggardError::malformed(source, format!("missing column {}", name)))
}

fn optional_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Accepts both `20240115` and `2024-01-15`.
pub fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

fn field<'r>(record: &'r StringRecord, idx: usize) -> &'r str {
    record.get(idx).unwrap_or("")
}

fn date_field(
    record: &StringRecord,
    idx: usize,
    name: &str,
    source: &str,
    line: u64,
) -> Result<NaiveDate, LaggardError> {
    let raw = field(record, idx);
    parse_trade_date(raw).ok_or_else(|| {
        LaggardError::malformed(source, format!("line {}: invalid {} '{}'", line, name, raw))
    })
}

fn optional_date_field(
    record: &StringRecord,
    idx: Option<usize>,
    name: &str,
    source: &str,
    line: u64,
) -> Result<Option<NaiveDate>, LaggardError> {
    match idx {
        Some(i) if !field(record, i).is_empty() => {
            date_field(record, i, name, source, line).map(Some)
        }
        _ => Ok(None),
    }
}

/// Blank cells become `blank`; anything else must parse.
fn number_field(
    record: &StringRecord,
    idx: usize,
    name: &str,
    blank: f64,
    source: &str,
    line: u64,
) -> Result<f64, LaggardError> {
    let raw = field(record, idx);
    if raw.is_empty() {
        return Ok(blank);
    }
    raw.parse::<f64>().map_err(|_| {
        LaggardError::malformed(source, format!("line {}: invalid {} '{}'", line, name, raw))
    })
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

impl DataPort for CsvAdapter {
    fn get_daily_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyBar>, LaggardError> {
        let path = self.bars_path();
        let source = source_name(&path);
        let mut rdr = open_reader(&path)?;
        let headers = rdr
            .headers()
            .map_err(|e| LaggardError::malformed(&source, e.to_string()))?
            .clone();

        let ticker_col = required_column(&headers, "ts_code", &source)?;
        let date_col = required_column(&headers, "trade_date", &source)?;
        let close_col = required_column(&headers, "close", &source)?;
        let pre_close_col = required_column(&headers, "pre_close", &source)?;
        let adj_col = required_column(&headers, "adj_factor", &source)?;

        // Keyed on (ticker, date): later rows replace earlier ones.
        let mut bars: BTreeMap<(String, NaiveDate), DailyBar> = BTreeMap::new();
        let mut total = 0usize;

        for result in rdr.records() {
            let record = result.map_err(|e| LaggardError::malformed(&source, e.to_string()))?;
            let line = line_of(&record);
            total += 1;

            let trade_date = date_field(&record, date_col, "trade_date", &source, line)?;
            if trade_date < start_date || trade_date > end_date {
                continue;
            }
            let ticker = field(&record, ticker_col).to_string();
            if ticker.is_empty() {
                return Err(LaggardError::malformed(
                    &source,
                    format!("line {}: empty ts_code", line),
                ));
            }

            let bar = DailyBar {
                ticker: ticker.clone(),
                trade_date,
                close: number_field(&record, close_col, "close", f64::NAN, &source, line)?,
                prev_close: number_field(
                    &record,
                    pre_close_col,
                    "pre_close",
                    f64::NAN,
                    &source,
                    line,
                )?,
                adj_factor: number_field(&record, adj_col, "adj_factor", 1.0, &source, line)?,
            };
            bars.insert((ticker, trade_date), bar);
        }

        debug!(rows = total, kept = bars.len(), %start_date, %end_date, "read daily bars");

        if bars.is_empty() {
            warn!(%start_date, %end_date, "no daily bars in range");
            return Err(LaggardError::DataUnavailable {
                what: format!("daily bars {}..{}", start_date, end_date),
            });
        }
        Ok(bars.into_values().collect())
    }

    fn get_industry_mapping(&self, level: u8) -> Result<Vec<IndustryMember>, LaggardError> {
        let path = self.industry_path(level);
        let source = source_name(&path);
        let mut rdr = open_reader(&path)?;
        let headers = rdr
            .headers()
            .map_err(|e| LaggardError::malformed(&source, e.to_string()))?
            .clone();

        let ticker_col = required_column(&headers, "ts_code", &source)?;
        let industry_col = required_column(&headers, "industry_name", &source)?;
        let in_col = optional_column(&headers, "in_date");
        let out_col = optional_column(&headers, "out_date");

        let mut seen: HashSet<(String, String, Option<NaiveDate>)> = HashSet::new();
        let mut members = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| LaggardError::malformed(&source, e.to_string()))?;
            let line = line_of(&record);

            let ticker = field(&record, ticker_col);
            let industry = field(&record, industry_col);
            if ticker.is_empty() || industry.is_empty() {
                continue;
            }
            let in_date = optional_date_field(&record, in_col, "in_date", &source, line)?;
            let out_date = optional_date_field(&record, out_col, "out_date", &source, line)?;

            if seen.insert((ticker.to_string(), industry.to_string(), in_date)) {
                members.push(IndustryMember {
                    ticker: ticker.to_string(),
                    industry: industry.to_string(),
                    in_date,
                    out_date,
                });
            }
        }

        debug!(level, rows = members.len(), "read industry mapping");

        if members.is_empty() {
            warn!(level, "industry mapping is empty");
            return Err(LaggardError::DataUnavailable {
                what: format!("industry mapping level {}", level),
            });
        }
        Ok(members)
    }
}

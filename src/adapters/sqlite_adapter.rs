//! SQLite read-through cache in front of any [`DataPort`].
//!
//! Bars are cached per requested `(start_date, end_date)` range and
//! membership per industry level. A request-table row marks a range as
//! complete; rows and marker are written in one transaction.

use crate::domain::bar::{DailyBar, IndustryMember};
use crate::domain::error::LaggardError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use tracing::info;

const DATE_FMT: &str = "%Y-%m-%d";

fn pool_err(e: r2d2::Error) -> LaggardError {
    LaggardError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> LaggardError {
    LaggardError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_column_date(idx: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_optional_date(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    raw.map(|s| parse_column_date(idx, s)).transpose()
}

pub struct SqliteCache {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteCache {
    pub fn open(path: &str, pool_size: u32) -> Result<Self, LaggardError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(pool_err)?;
        let cache = Self { pool };
        cache.initialize_schema()?;
        Ok(cache)
    }

    pub fn in_memory() -> Result<Self, LaggardError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;
        let cache = Self { pool };
        cache.initialize_schema()?;
        Ok(cache)
    }

    pub fn initialize_schema(&self) -> Result<(), LaggardError> {
        let conn = self.pool.get().map_err(pool_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bar_requests (
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                PRIMARY KEY (start_date, end_date)
            );
            CREATE TABLE IF NOT EXISTS daily_bars (
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                ts_code TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                close REAL,
                pre_close REAL,
                adj_factor REAL,
                PRIMARY KEY (start_date, end_date, ts_code, trade_date)
            );
            CREATE TABLE IF NOT EXISTS industry_requests (
                level INTEGER PRIMARY KEY,
                row_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS industry_members (
                level INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                ts_code TEXT NOT NULL,
                industry_name TEXT NOT NULL,
                in_date TEXT,
                out_date TEXT,
                PRIMARY KEY (level, seq)
            );",
        )
        .map_err(query_err)?;
        Ok(())
    }

    /// `None` when the range has never been stored.
    pub fn load_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Option<Vec<DailyBar>>, LaggardError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let (start, end) = (fmt_date(start_date), fmt_date(end_date));

        let marker: Option<i64> = conn
            .query_row(
                "SELECT row_count FROM bar_requests WHERE start_date = ?1 AND end_date = ?2",
                params![start, end],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if marker.is_none() {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(
                "SELECT ts_code, trade_date, close, pre_close, adj_factor
                 FROM daily_bars
                 WHERE start_date = ?1 AND end_date = ?2
                 ORDER BY ts_code, trade_date",
            )
            .map_err(query_err)?;

        // SQLite stores NaN as NULL.
        let rows = stmt
            .query_map(params![start, end], |row| {
                let close: Option<f64> = row.get(2)?;
                let prev_close: Option<f64> = row.get(3)?;
                let adj_factor: Option<f64> = row.get(4)?;
                Ok(DailyBar {
                    ticker: row.get(0)?,
                    trade_date: parse_column_date(1, row.get(1)?)?,
                    close: close.unwrap_or(f64::NAN),
                    prev_close: prev_close.unwrap_or(f64::NAN),
                    adj_factor: adj_factor.unwrap_or(f64::NAN),
                })
            })
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }
        Ok(Some(bars))
    }

    pub fn store_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        bars: &[DailyBar],
    ) -> Result<(), LaggardError> {
        let mut conn = self.pool.get().map_err(pool_err)?;
        let (start, end) = (fmt_date(start_date), fmt_date(end_date));
        let tx = conn.transaction().map_err(query_err)?;

        tx.execute(
            "DELETE FROM daily_bars WHERE start_date = ?1 AND end_date = ?2",
            params![start, end],
        )
        .map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO daily_bars
                     (start_date, end_date, ts_code, trade_date, close, pre_close, adj_factor)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(query_err)?;
            for bar in bars {
                stmt.execute(params![
                    start,
                    end,
                    bar.ticker,
                    fmt_date(bar.trade_date),
                    bar.close,
                    bar.prev_close,
                    bar.adj_factor
                ])
                .map_err(query_err)?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO bar_requests (start_date, end_date, row_count)
             VALUES (?1, ?2, ?3)",
            params![start, end, bars.len() as i64],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)?;
        Ok(())
    }

    /// `None` when the level has never been stored.
    pub fn load_members(&self, level: u8) -> Result<Option<Vec<IndustryMember>>, LaggardError> {
        let conn = self.pool.get().map_err(pool_err)?;

        let marker: Option<i64> = conn
            .query_row(
                "SELECT row_count FROM industry_requests WHERE level = ?1",
                params![level],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if marker.is_none() {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(
                "SELECT ts_code, industry_name, in_date, out_date
                 FROM industry_members
                 WHERE level = ?1
                 ORDER BY seq",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![level], |row| {
                Ok(IndustryMember {
                    ticker: row.get(0)?,
                    industry: row.get(1)?,
                    in_date: parse_optional_date(2, row.get(2)?)?,
                    out_date: parse_optional_date(3, row.get(3)?)?,
                })
            })
            .map_err(query_err)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row.map_err(query_err)?);
        }
        Ok(Some(members))
    }

    pub fn store_members(&self, level: u8, members: &[IndustryMember]) -> Result<(), LaggardError> {
        let mut conn = self.pool.get().map_err(pool_err)?;
        let tx = conn.transaction().map_err(query_err)?;

        tx.execute(
            "DELETE FROM industry_members WHERE level = ?1",
            params![level],
        )
        .map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO industry_members
                     (level, seq, ts_code, industry_name, in_date, out_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(query_err)?;
            for (seq, m) in members.iter().enumerate() {
                stmt.execute(params![
                    level,
                    seq as i64,
                    m.ticker,
                    m.industry,
                    m.in_date.map(fmt_date),
                    m.out_date.map(fmt_date)
                ])
                .map_err(query_err)?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO industry_requests (level, row_count) VALUES (?1, ?2)",
            params![level, members.len() as i64],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

/// Serves repeated requests from the cache, everything else from `upstream`.
pub struct CachedDataPort<P: DataPort> {
    upstream: P,
    cache: SqliteCache,
}

impl<P: DataPort> CachedDataPort<P> {
    pub fn new(upstream: P, cache: SqliteCache) -> Self {
        Self { upstream, cache }
    }
}

impl<P: DataPort> DataPort for CachedDataPort<P> {
    fn get_daily_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<DailyBar>, LaggardError> {
        if let Some(bars) = self.cache.load_bars(start_date, end_date)? {
            info!(%start_date, %end_date, rows = bars.len(), "bar cache hit");
            return Ok(bars);
        }
        info!(%start_date, %end_date, "bar cache miss");
        let bars = self.upstream.get_daily_bars(start_date, end_date)?;
        self.cache.store_bars(start_date, end_date, &bars)?;
        Ok(bars)
    }

    fn get_industry_mapping(&self, level: u8) -> Result<Vec<IndustryMember>, LaggardError> {
        if let Some(members) = self.cache.load_members(level)? {
            info!(level, rows = members.len(), "industry cache hit");
            return Ok(members);
        }
        info!(level, "industry cache miss");
        let members = self.upstream.get_industry_mapping(level)?;
        self.cache.store_members(level, &members)?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(ticker: &str, day: u32, close: f64) -> DailyBar {
        DailyBar {
            ticker: ticker.to_string(),
            trade_date: date(2024, 1, day),
            close,
            prev_close: close - 0.1,
            adj_factor: 1.0,
        }
    }

    struct CountingPort {
        bar_calls: Cell<usize>,
        member_calls: Cell<usize>,
        fail: bool,
    }

    impl CountingPort {
        fn new() -> Self {
            Self {
                bar_calls: Cell::new(0),
                member_calls: Cell::new(0),
                fail: false,
            }
        }
    }

    impl DataPort for &CountingPort {
        fn get_daily_bars(
            &self,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyBar>, LaggardError> {
            self.bar_calls.set(self.bar_calls.get() + 1);
            if self.fail {
                return Err(LaggardError::DataUnavailable {
                    what: "upstream down".into(),
                });
            }
            Ok(vec![bar("AAA", 2, 10.0), bar("AAA", 3, f64::NAN)])
        }

        fn get_industry_mapping(&self, _level: u8) -> Result<Vec<IndustryMember>, LaggardError> {
            self.member_calls.set(self.member_calls.get() + 1);
            Ok(vec![
                IndustryMember::new("BBB", "Autos"),
                IndustryMember {
                    in_date: Some(date(2020, 1, 1)),
                    ..IndustryMember::new("AAA", "Banks")
                },
            ])
        }
    }

    #[test]
    fn in_memory_initialization_is_idempotent() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.initialize_schema().unwrap();
    }

    #[test]
    fn unknown_range_is_a_miss() {
        let cache = SqliteCache::in_memory().unwrap();
        assert!(cache.load_bars(date(2024, 1, 1), date(2024, 1, 31)).unwrap().is_none());
        assert!(cache.load_members(2).unwrap().is_none());
    }

    #[test]
    fn bars_round_trip_by_range() {
        let cache = SqliteCache::in_memory().unwrap();
        let bars = vec![bar("BBB", 2, 20.0), bar("AAA", 3, 11.0), bar("AAA", 2, 10.0)];
        cache
            .store_bars(date(2024, 1, 1), date(2024, 1, 31), &bars)
            .unwrap();

        let loaded = cache
            .load_bars(date(2024, 1, 1), date(2024, 1, 31))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].ticker, "AAA");
        assert_eq!(loaded[0].trade_date, date(2024, 1, 2));
        assert_eq!(loaded[2].ticker, "BBB");

        // Different range, different key.
        assert!(cache.load_bars(date(2024, 1, 1), date(2024, 1, 30)).unwrap().is_none());
    }

    #[test]
    fn empty_store_is_still_a_hit() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.store_members(1, &[]).unwrap();
        assert_eq!(cache.load_members(1).unwrap(), Some(vec![]));
    }

    #[test]
    fn cached_port_fetches_upstream_once() {
        let upstream = CountingPort::new();
        let port = CachedDataPort::new(&upstream, SqliteCache::in_memory().unwrap());

        let first = port.get_daily_bars(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let second = port.get_daily_bars(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        assert_eq!(upstream.bar_calls.get(), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(second[0].close, 10.0);
        assert!(second[1].close.is_nan());

        let members = port.get_industry_mapping(2).unwrap();
        let again = port.get_industry_mapping(2).unwrap();
        assert_eq!(upstream.member_calls.get(), 1);
        assert_eq!(members, again);
        assert_eq!(again[1].in_date, Some(date(2020, 1, 1)));
    }

    #[test]
    fn upstream_errors_are_not_cached() {
        let upstream = CountingPort {
            fail: true,
            ..CountingPort::new()
        };
        let port = CachedDataPort::new(&upstream, SqliteCache::in_memory().unwrap());
        assert!(port.get_daily_bars(date(2024, 1, 1), date(2024, 1, 31)).is_err());
        assert!(port.get_daily_bars(date(2024, 1, 1), date(2024, 1, 31)).is_err());
        assert_eq!(upstream.bar_calls.get(), 2);
    }

    #[test]
    fn open_creates_file_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let path = path.to_str().unwrap();
        {
            let cache = SqliteCache::open(path, 2).unwrap();
            cache.store_members(3, &[IndustryMember::new("AAA", "Banks")]).unwrap();
        }
        let reopened = SqliteCache::open(path, 2).unwrap();
        assert_eq!(reopened.load_members(3).unwrap().unwrap().len(), 1);
    }
}

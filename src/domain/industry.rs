//! Ticker to industry index used for joins.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::bar::IndustryMember;

/// Membership rows grouped by ticker. A ticker with no row is unmapped and
/// drops out of every industry-level join.
#[derive(Debug, Clone, Default)]
pub struct IndustryMap {
    by_ticker: HashMap<String, Vec<IndustryMember>>,
}

impl IndustryMap {
    pub fn new(members: &[IndustryMember]) -> Self {
        let mut by_ticker: HashMap<String, Vec<IndustryMember>> = HashMap::new();
        let mut seen: HashSet<(&str, &str, Option<NaiveDate>)> = HashSet::new();
        for m in members {
            if !seen.insert((m.ticker.as_str(), m.industry.as_str(), m.in_date)) {
                continue;
            }
            by_ticker.entry(m.ticker.clone()).or_default().push(m.clone());
        }
        Self { by_ticker }
    }

    /// Industries `ticker` belongs to during the week labelled `week`.
    ///
    /// Each industry appears once even when several rows for it overlap.
    pub fn industries_for<'a>(
        &'a self,
        ticker: &str,
        week: NaiveDate,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let mut active: Vec<&'a str> = Vec::new();
        for m in self.by_ticker.get(ticker).into_iter().flatten() {
            if m.is_active_on(week) && !active.contains(&m.industry.as_str()) {
                active.push(m.industry.as_str());
            }
        }
        active.into_iter()
    }

    pub fn ticker_count(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn industry_names(&self) -> BTreeSet<&str> {
        self.by_ticker
            .values()
            .flatten()
            .map(|m| m.industry.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unmapped_ticker_has_no_industries() {
        let map = IndustryMap::new(&[IndustryMember::new("AAA", "X")]);
        assert_eq!(map.industries_for("ZZZ", date(2020, 1, 3)).count(), 0);
    }

    #[test]
    fn duplicate_rows_are_collapsed() {
        let map = IndustryMap::new(&[
            IndustryMember::new("AAA", "X"),
            IndustryMember::new("AAA", "X"),
            IndustryMember::new("AAA", "Y"),
        ]);
        let industries: Vec<_> = map.industries_for("AAA", date(2020, 1, 3)).collect();
        assert_eq!(industries, vec!["X", "Y"]);
        assert_eq!(map.ticker_count(), 1);
    }

    #[test]
    fn inactive_membership_is_filtered() {
        let map = IndustryMap::new(&[
            IndustryMember {
                out_date: Some(date(2020, 6, 30)),
                ..IndustryMember::new("AAA", "Old")
            },
            IndustryMember {
                in_date: Some(date(2020, 7, 1)),
                ..IndustryMember::new("AAA", "New")
            },
        ]);
        let before: Vec<_> = map.industries_for("AAA", date(2020, 3, 6)).collect();
        let after: Vec<_> = map.industries_for("AAA", date(2020, 9, 4)).collect();
        assert_eq!(before, vec!["Old"]);
        assert_eq!(after, vec!["New"]);
    }

    #[test]
    fn overlapping_rows_count_once_per_week() {
        let map = IndustryMap::new(&[
            IndustryMember::new("AAA", "X"),
            IndustryMember {
                in_date: Some(date(2020, 1, 1)),
                out_date: Some(date(2020, 12, 31)),
                ..IndustryMember::new("AAA", "X")
            },
        ]);
        let inside: Vec<_> = map.industries_for("AAA", date(2020, 3, 6)).collect();
        let outside: Vec<_> = map.industries_for("AAA", date(2021, 3, 5)).collect();
        assert_eq!(inside, vec!["X"]);
        assert_eq!(outside, vec!["X"]);
    }

    #[test]
    fn industry_names_are_sorted_and_unique() {
        let map = IndustryMap::new(&[
            IndustryMember::new("BBB", "Y"),
            IndustryMember::new("AAA", "X"),
            IndustryMember::new("CCC", "X"),
        ]);
        let names: Vec<_> = map.industry_names().into_iter().collect();
        assert_eq!(names, vec!["X", "Y"]);
    }
}

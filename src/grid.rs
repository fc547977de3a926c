//! Dense calendar grids built from sparse per-day rows.

use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetricRow, GridRow};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static DATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date key regex"));

/// Parses a canonical `YYYY-MM-DD` calendar key.
pub fn parse_date_key(raw: &str) -> AppResult<NaiveDate> {
    let trimmed = raw.trim();
    if !DATE_KEY_RE.is_match(trimmed) {
        return Err(AppError::validation(
            "date",
            format!("'{}' is not a YYYY-MM-DD date", raw),
        ));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|error| AppError::validation("date", format!("'{}': {}", raw, error)))
}

/// An inclusive, non-empty span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = AppError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if start > end {
            return Err(AppError::validation(
                "range",
                format!("start date {} is after end date {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Self::new(parse_date_key(start)?, parse_date_key(end)?)
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> usize {
        usize::try_from(days_between(self.start, self.end)).map_or(0, |span| span + 1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    end.signed_duration_since(start).num_days()
}

/// The editor's default span: the work's creation day through `today`.
/// A creation timestamp in the future collapses to a single day.
pub fn default_range_for(created_at: DateTime<Utc>, today: NaiveDate) -> DateRange {
    let created = created_at.date_naive();
    if created > today {
        return DateRange::single(created);
    }
    DateRange { start: created, end: today }
}

/// Expands `sparse` into one row per day of `[start, end]`, ascending.
///
/// Days with a stored row copy its counters; every other day is zero.
/// Rows dated outside the range are ignored.
pub fn build_grid(sparse: &[DailyMetricRow], start: NaiveDate, end: NaiveDate) -> AppResult<Vec<GridRow>> {
    let range = DateRange::new(start, end)?;
    Ok(build_grid_for(sparse, &range))
}

pub fn build_grid_for(sparse: &[DailyMetricRow], range: &DateRange) -> Vec<GridRow> {
    let by_date: HashMap<NaiveDate, &DailyMetricRow> = sparse
        .iter()
        .filter(|row| range.contains(row.date))
        .map(|row| (row.date, row))
        .collect();

    let mut grid = Vec::with_capacity(range.days());
    for day in range.iter() {
        match by_date.get(&day) {
            Some(row) => grid.push(GridRow {
                date: day,
                counters: row.counters,
            }),
            None => grid.push(GridRow::zero(day)),
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::{build_grid, build_grid_for, default_range_for, parse_date_key, DateRange};
    use crate::models::{Counters, DailyMetricRow};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn day(raw: &str) -> NaiveDate {
        parse_date_key(raw).expect("date")
    }

    fn stored(raw: &str, counters: Counters) -> DailyMetricRow {
        DailyMetricRow {
            work_id: 5,
            date: day(raw),
            counters,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_storage_yields_zero_days() {
        let grid = build_grid(&[], day("2024-01-01"), day("2024-01-03")).expect("grid");
        assert_eq!(grid.len(), 3);
        assert!(grid.iter().all(|row| row.counters.is_zero()));
        assert_eq!(grid[0].date, day("2024-01-01"));
        assert_eq!(grid[2].date, day("2024-01-03"));
    }

    #[test]
    fn stored_days_keep_their_counters_and_gaps_are_zero() {
        let sparse = vec![
            stored("2024-01-02", Counters::new(10, 2, 0, 50)),
            stored("2024-01-05", Counters::new(1, 1, 1, 1)),
        ];
        let grid = build_grid(&sparse, day("2024-01-01"), day("2024-01-05")).expect("grid");
        assert_eq!(grid.len(), 5);
        assert_eq!(grid[1].counters, Counters::new(10, 2, 0, 50));
        assert_eq!(grid[4].counters, Counters::new(1, 1, 1, 1));
        for index in [0, 2, 3] {
            assert!(grid[index].counters.is_zero(), "day {index} should be zero");
        }
    }

    #[test]
    fn rows_outside_the_range_are_ignored() {
        let sparse = vec![stored("2023-12-31", Counters::new(9, 9, 9, 9))];
        let grid = build_grid(&sparse, day("2024-01-01"), day("2024-01-01")).expect("grid");
        assert_eq!(grid.len(), 1);
        assert!(grid[0].counters.is_zero());
    }

    #[test]
    fn grid_spans_month_year_and_leap_boundaries() {
        let cases = [
            ("2023-12-30", "2024-01-02", 4),
            ("2024-02-27", "2024-03-01", 4),
            ("2023-02-27", "2023-03-01", 3),
            ("2024-01-01", "2024-12-31", 366),
            ("2024-06-15", "2024-06-15", 1),
        ];
        for (start, end, expected) in cases {
            let grid = build_grid(&[], day(start), day(end)).expect("grid");
            assert_eq!(grid.len(), expected, "{start}..{end}");
            assert!(grid.windows(2).all(|pair| pair[0].date < pair[1].date));
            assert_eq!(grid.last().map(|row| row.date), Some(day(end)));
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        let error = build_grid(&[], day("2024-01-03"), day("2024-01-01")).expect_err("inverted");
        assert!(error.is_validation());
    }

    #[test]
    fn deserialized_ranges_are_validated() {
        let range: DateRange =
            serde_json::from_str(r#"{"start":"2024-01-01","end":"2024-01-03"}"#).expect("ordered range");
        assert_eq!(build_grid_for(&[], &range).len(), 3);

        let inverted = serde_json::from_str::<DateRange>(r#"{"start":"2024-01-03","end":"2024-01-01"}"#);
        let message = inverted.expect_err("inverted range").to_string();
        assert!(message.contains("after end date"), "{message}");
    }

    #[test]
    fn date_keys_must_be_canonical() {
        assert!(parse_date_key("2024-1-2").is_err());
        assert!(parse_date_key("2024-02-30").is_err());
        assert!(parse_date_key("yesterday").is_err());
        assert_eq!(parse_date_key(" 2024-02-29 ").expect("leap day"), NaiveDate::from_ymd_opt(2024, 2, 29).expect("ymd"));
    }

    #[test]
    fn default_range_runs_from_creation_day_to_today() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).single().expect("created");
        let range = default_range_for(created, day("2024-01-10"));
        assert_eq!(range.start(), day("2024-01-01"));
        assert_eq!(range.days(), 10);

        let future = default_range_for(created, day("2023-12-01"));
        assert_eq!(future, DateRange::single(day("2024-01-01")));
    }
}

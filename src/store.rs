use crate::errors::{AppError, AppResult};
use crate::models::{CounterInput, CounterMaxima, DailyMetricRow, MetricEntry};
use chrono::NaiveDate;

/// Persistence for per-(work, date) counters.
///
/// Every write is an upsert keyed by `(work_id, date)`; a store never holds
/// two rows for the same key.
pub trait MetricsStore: Send + Sync {
    fn upsert(&self, work_id: i64, date: NaiveDate, counters: &CounterInput) -> AppResult<DailyMetricRow>;

    /// Applies every entry or none of them.
    fn upsert_batch(&self, work_id: i64, entries: &[MetricEntry]) -> AppResult<usize>;

    /// Stored rows only, ascending by date.
    fn range_read(&self, work_id: i64, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<DailyMetricRow>>;

    fn max_by_work(&self, work_id: i64) -> AppResult<CounterMaxima>;

    fn delete_all_for_work(&self, work_id: i64) -> AppResult<usize>;
}

/// Rejects the first entry with a negative counter, naming its date.
pub fn validate_entries(entries: &[MetricEntry]) -> AppResult<()> {
    for entry in entries {
        entry.counters().validate().map_err(|error| match error {
            AppError::Validation { field, message } => AppError::Validation {
                field: format!("{}.{}", entry.date, field),
                message,
            },
            other => other,
        })?;
    }
    Ok(())
}

use super::{parse_time, read_counter, to_sql_counter, Database};
use crate::errors::{AppError, AppResult};
use crate::grid::DateRange;
use crate::models::{CounterInput, CounterMaxima, Counters, DailyMetricRow, MetricEntry};
use crate::store::{validate_entries, MetricsStore};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const UPSERT_METRIC_SQL: &str = "INSERT INTO work_daily_metrics (work_id, date, likes, comments, messages, views, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(work_id, date) DO UPDATE SET
       likes = excluded.likes,
       comments = excluded.comments,
       messages = excluded.messages,
       views = excluded.views,
       updated_at = excluded.updated_at";

impl Database {
    pub fn upsert_daily_metrics(
        &self,
        work_id: i64,
        date: NaiveDate,
        counters: &CounterInput,
    ) -> AppResult<DailyMetricRow> {
        let counters = counters.validate()?;
        let now = Utc::now();

        let conn = self.connection()?;
        ensure_work_exists(&conn, work_id)?;
        upsert_row(&conn, work_id, date, &counters, now)
            .map_err(|error| with_context(error, work_id, Some(date)))?;

        tracing::debug!(work_id, date = %date, "upserted daily metrics");
        Ok(DailyMetricRow {
            work_id,
            date,
            counters,
            updated_at: now,
        })
    }

    pub fn upsert_daily_metrics_batch(&self, work_id: i64, entries: &[MetricEntry]) -> AppResult<usize> {
        validate_entries(entries)?;
        if entries.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        ensure_work_exists(&tx, work_id)?;
        for entry in entries {
            let counters = entry.counters().validate()?;
            if let Err(error) = upsert_row(&tx, work_id, entry.date, &counters, now) {
                tracing::warn!(work_id, date = %entry.date, error = %error, "batch upsert rolled back");
                return Err(with_context(error, work_id, Some(entry.date)));
            }
        }
        tx.commit().map_err(|error| with_context(error.into(), work_id, None))?;

        tracing::debug!(work_id, rows = entries.len(), "upserted daily metrics batch");
        Ok(entries.len())
    }

    pub fn list_daily_metrics(&self, work_id: i64, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<DailyMetricRow>> {
        let range = DateRange::new(start, end)?;
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT work_id, date, likes, comments, messages, views, updated_at
             FROM work_daily_metrics
             WHERE work_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(params![work_id, range.start(), range.end()], parse_metric_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn list_all_daily_metrics(&self, work_id: i64) -> AppResult<Vec<DailyMetricRow>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT work_id, date, likes, comments, messages, views, updated_at
             FROM work_daily_metrics WHERE work_id = ?1 ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map([work_id], parse_metric_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn max_daily_metrics(&self, work_id: i64) -> AppResult<CounterMaxima> {
        let conn = self.connection()?;
        let maxima = conn.query_row(
            "SELECT COALESCE(MAX(likes), 0), COALESCE(MAX(comments), 0),
                    COALESCE(MAX(messages), 0), COALESCE(MAX(views), 0)
             FROM work_daily_metrics WHERE work_id = ?1",
            [work_id],
            |row| {
                Ok(CounterMaxima {
                    max_likes: read_counter(row, 0)?,
                    max_comments: read_counter(row, 1)?,
                    max_messages: read_counter(row, 2)?,
                    max_views: read_counter(row, 3)?,
                })
            },
        )?;
        Ok(maxima)
    }

    pub fn count_daily_metrics(&self, work_id: i64) -> AppResult<u64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM work_daily_metrics WHERE work_id = ?1",
            [work_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn delete_daily_metrics_for_work(&self, work_id: i64) -> AppResult<usize> {
        let conn = self.connection()?;
        delete_metrics_for_work(&conn, work_id)
    }
}

impl MetricsStore for Database {
    fn upsert(&self, work_id: i64, date: NaiveDate, counters: &CounterInput) -> AppResult<DailyMetricRow> {
        self.upsert_daily_metrics(work_id, date, counters)
    }

    fn upsert_batch(&self, work_id: i64, entries: &[MetricEntry]) -> AppResult<usize> {
        self.upsert_daily_metrics_batch(work_id, entries)
    }

    fn range_read(&self, work_id: i64, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<DailyMetricRow>> {
        self.list_daily_metrics(work_id, start, end)
    }

    fn max_by_work(&self, work_id: i64) -> AppResult<CounterMaxima> {
        self.max_daily_metrics(work_id)
    }

    fn delete_all_for_work(&self, work_id: i64) -> AppResult<usize> {
        self.delete_daily_metrics_for_work(work_id)
    }
}

pub(super) fn ensure_work_exists(conn: &Connection, work_id: i64) -> AppResult<()> {
    let found = conn
        .query_row("SELECT 1 FROM works WHERE id = ?1", [work_id], |row| row.get::<_, i64>(0))
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("work {} does not exist", work_id))),
    }
}

pub(super) fn delete_metrics_for_work(conn: &Connection, work_id: i64) -> AppResult<usize> {
    let removed = conn.execute("DELETE FROM work_daily_metrics WHERE work_id = ?1", [work_id])?;
    if removed > 0 {
        tracing::info!(work_id, rows = removed, "deleted daily metrics for work");
    }
    Ok(removed)
}

fn upsert_row(
    conn: &Connection,
    work_id: i64,
    date: NaiveDate,
    counters: &Counters,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let mut stmt = conn.prepare_cached(UPSERT_METRIC_SQL)?;
    stmt.execute(params![
        work_id,
        date,
        to_sql_counter(counters.likes)?,
        to_sql_counter(counters.comments)?,
        to_sql_counter(counters.messages)?,
        to_sql_counter(counters.views)?,
        now.to_rfc3339(),
    ])?;
    Ok(())
}

fn with_context(error: AppError, work_id: i64, date: Option<NaiveDate>) -> AppError {
    let location = match date {
        Some(date) => format!("work {} date {}", work_id, date),
        None => format!("work {}", work_id),
    };
    match error {
        AppError::Storage(message) => AppError::Storage(format!("{}: {}", location, message)),
        AppError::Validation { field, message } => AppError::Validation {
            field: match date {
                Some(date) => format!("{}.{}", date, field),
                None => field,
            },
            message,
        },
        other => other,
    }
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyMetricRow> {
    Ok(DailyMetricRow {
        work_id: row.get(0)?,
        date: row.get::<_, NaiveDate>(1)?,
        counters: Counters {
            likes: read_counter(row, 2)?,
            comments: read_counter(row, 3)?,
            messages: read_counter(row, 4)?,
            views: read_counter(row, 5)?,
        },
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::Database;
    use crate::aggregate::project_maxima;
    use crate::errors::AppError;
    use crate::grid::parse_date_key;
    use crate::models::{CounterInput, CounterMaxima, Counters, CreateWorkPayload, MetricEntry, SaveAccountPayload};
    use crate::store::MetricsStore;
    use chrono::NaiveDate;

    fn day(raw: &str) -> NaiveDate {
        parse_date_key(raw).expect("date")
    }

    fn setup() -> (tempfile::TempDir, Database, i64) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let account = db
            .save_account(SaveAccountPayload {
                id: None,
                name: "studio".to_string(),
                category_id: None,
            })
            .expect("save account");
        let work = db
            .create_work(CreateWorkPayload {
                account_id: account.id,
                title: "first post".to_string(),
                cover_image: None,
                published_at: None,
            })
            .expect("create work");
        (dir, db, work.id)
    }

    #[test]
    fn upsert_then_range_read_returns_only_stored_day() {
        let (_dir, db, work_id) = setup();
        db.upsert(work_id, day("2024-01-02"), &CounterInput::new(10, 2, 0, 50))
            .expect("upsert");

        let rows = db
            .range_read(work_id, day("2024-01-01"), day("2024-01-03"))
            .expect("range read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day("2024-01-02"));
        assert_eq!(rows[0].counters, Counters::new(10, 2, 0, 50));
    }

    #[test]
    fn repeated_upserts_keep_one_row_with_latest_values() {
        let (_dir, db, work_id) = setup();
        let first = db
            .upsert(work_id, day("2024-01-02"), &CounterInput::new(1, 1, 1, 1))
            .expect("first upsert");
        db.upsert(work_id, day("2024-01-02"), &CounterInput::new(1, 1, 1, 1))
            .expect("same upsert");
        let last = db
            .upsert(work_id, day("2024-01-02"), &CounterInput::new(7, 0, 3, 99))
            .expect("second upsert");

        let rows = db
            .range_read(work_id, day("2024-01-02"), day("2024-01-02"))
            .expect("range read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counters, Counters::new(7, 0, 3, 99));
        assert!(rows[0].updated_at >= first.updated_at);
        assert_eq!(rows[0].updated_at, last.updated_at);
        assert_eq!(db.count_daily_metrics(work_id).expect("count"), 1);
    }

    #[test]
    fn negative_counter_is_rejected_before_storage() {
        let (_dir, db, work_id) = setup();
        let error = db
            .upsert(work_id, day("2024-01-02"), &CounterInput::new(0, -1, 0, 0))
            .expect_err("negative");
        match error {
            AppError::Validation { field, .. } => assert_eq!(field, "comments"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.count_daily_metrics(work_id).expect("count"), 0);
    }

    #[test]
    fn upsert_for_missing_work_is_not_found() {
        let (_dir, db, _work_id) = setup();
        let error = db
            .upsert(9_999, day("2024-01-02"), &CounterInput::default())
            .expect_err("missing work");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn batch_with_invalid_row_persists_nothing() {
        let (_dir, db, work_id) = setup();
        let entries = vec![
            MetricEntry::new(day("2024-01-01"), CounterInput::new(1, 0, 0, 0)),
            MetricEntry::new(day("2024-01-01"), CounterInput::new(-1, 0, 0, 0)),
        ];
        let error = db.upsert_batch(work_id, &entries).expect_err("invalid batch");
        match error {
            AppError::Validation { field, .. } => assert_eq!(field, "2024-01-01.likes"),
            other => panic!("unexpected error: {other}"),
        }

        let rows = db
            .range_read(work_id, day("2024-01-01"), day("2024-01-01"))
            .expect("range read");
        assert!(rows.is_empty());
    }

    #[test]
    fn storage_failure_mid_batch_rolls_back_earlier_rows() {
        let (_dir, db, work_id) = setup();
        db.upsert(work_id, day("2024-01-01"), &CounterInput::new(5, 5, 5, 5))
            .expect("seed row");
        {
            let conn = db.conn.lock().expect("db lock");
            conn.execute_batch(
                "CREATE TRIGGER reject_third_day BEFORE INSERT ON work_daily_metrics
                 WHEN NEW.date = '2024-01-03'
                 BEGIN SELECT RAISE(ABORT, 'rejected by test trigger'); END;",
            )
            .expect("create trigger");
        }

        let entries = vec![
            MetricEntry::new(day("2024-01-01"), CounterInput::new(50, 0, 0, 0)),
            MetricEntry::new(day("2024-01-02"), CounterInput::new(60, 0, 0, 0)),
            MetricEntry::new(day("2024-01-03"), CounterInput::new(70, 0, 0, 0)),
        ];
        let error = db.upsert_batch(work_id, &entries).expect_err("trigger failure");
        match &error {
            AppError::Storage(message) => assert!(message.contains("2024-01-03"), "{message}"),
            other => panic!("unexpected error: {other}"),
        }

        let rows = db
            .range_read(work_id, day("2024-01-01"), day("2024-01-03"))
            .expect("range read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].counters, Counters::new(5, 5, 5, 5));
    }

    #[test]
    fn batch_with_duplicate_dates_keeps_the_later_entry() {
        let (_dir, db, work_id) = setup();
        let entries = vec![
            MetricEntry::new(day("2024-02-01"), CounterInput::new(1, 0, 0, 0)),
            MetricEntry::new(day("2024-02-02"), CounterInput::new(2, 0, 0, 0)),
            MetricEntry::new(day("2024-02-01"), CounterInput::new(3, 0, 0, 0)),
        ];
        assert_eq!(db.upsert_batch(work_id, &entries).expect("batch"), 3);

        let rows = db
            .range_read(work_id, day("2024-02-01"), day("2024-02-29"))
            .expect("range read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].counters.likes, 3);
        assert_eq!(rows[1].counters.likes, 2);
    }

    #[test]
    fn inverted_range_read_is_a_validation_error() {
        let (_dir, db, work_id) = setup();
        let error = db
            .range_read(work_id, day("2024-01-03"), day("2024-01-01"))
            .expect_err("inverted");
        assert!(error.is_validation());
    }

    #[test]
    fn maxima_match_projection_and_default_to_zero() {
        let (_dir, db, work_id) = setup();
        assert_eq!(db.max_by_work(work_id).expect("empty maxima"), CounterMaxima::default());

        let entries = vec![
            MetricEntry::new(day("2024-03-01"), CounterInput::new(40, 1, 0, 900)),
            MetricEntry::new(day("2024-03-02"), CounterInput::new(12, 8, 2, 1_200)),
            MetricEntry::new(day("2024-03-03"), CounterInput::new(5, 0, 0, 100)),
        ];
        db.upsert_batch(work_id, &entries).expect("batch");

        let from_sql = db.max_by_work(work_id).expect("maxima");
        let stored = db.list_all_daily_metrics(work_id).expect("all rows");
        assert_eq!(from_sql, project_maxima(&stored));
        assert_eq!(from_sql.max_likes, 40);
        assert_eq!(from_sql.max_views, 1_200);
    }

    #[test]
    fn delete_all_for_work_clears_only_that_work() {
        let (_dir, db, work_id) = setup();
        let other = db
            .create_work(CreateWorkPayload {
                account_id: db.get_work(work_id).expect("get").expect("exists").account_id,
                title: "second post".to_string(),
                cover_image: None,
                published_at: None,
            })
            .expect("second work");
        db.upsert(work_id, day("2024-01-01"), &CounterInput::new(1, 0, 0, 0))
            .expect("upsert first");
        db.upsert(other.id, day("2024-01-01"), &CounterInput::new(2, 0, 0, 0))
            .expect("upsert second");

        assert_eq!(db.delete_all_for_work(work_id).expect("delete"), 1);
        assert_eq!(db.count_daily_metrics(work_id).expect("count"), 0);
        assert_eq!(db.count_daily_metrics(other.id).expect("count other"), 1);
    }
}

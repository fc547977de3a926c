use crate::errors::{AppError, AppResult};
use crate::grid::{build_grid_for, DateRange};
use crate::models::{CounterField, CounterInput, DailyMetricRow, GridRow, MetricEntry};
use crate::store::MetricsStore;
use crate::trend::TrendChart;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Loaded,
    Editing,
    Saving,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingRow {
    #[serde(flatten)]
    pub row: GridRow,
    pub dirty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SaveOutcome {
    NothingToSave,
    Saved { rows: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSessionView {
    pub session_id: String,
    pub work_id: i64,
    pub range: Option<DateRange>,
    pub state: SessionState,
    pub rows: Vec<WorkingRow>,
    pub chart: TrendChart,
    pub last_error: Option<String>,
}

/// Working copy of one work's grid over one date range.
///
/// Edits live only here until `save_row` or `save_all` pushes them to a
/// [`MetricsStore`]. A failed save leaves the working copy untouched.
#[derive(Debug, Clone)]
pub struct EditSession {
    work_id: i64,
    range: Option<DateRange>,
    rows: Vec<WorkingRow>,
    state: SessionState,
    last_error: Option<String>,
    chart: TrendChart,
}

impl EditSession {
    pub fn new(work_id: i64) -> Self {
        Self {
            work_id,
            range: None,
            rows: Vec::new(),
            state: SessionState::Idle,
            last_error: None,
            chart: TrendChart::default(),
        }
    }

    pub fn work_id(&self) -> i64 {
        self.work_id
    }

    pub fn range(&self) -> Option<DateRange> {
        self.range
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rows(&self) -> &[WorkingRow] {
        &self.rows
    }

    pub fn chart(&self) -> &TrendChart {
        &self.chart
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.rows.iter().any(|row| row.dirty)
    }

    pub fn dirty_dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().filter(|row| row.dirty).map(|row| row.row.date).collect()
    }

    pub fn row(&self, date: NaiveDate) -> Option<&WorkingRow> {
        self.position(date).map(|index| &self.rows[index])
    }

    /// Replaces the working copy with a fresh grid for `range`. Unsaved
    /// edits are dropped, whether or not their dates fall inside `range`.
    pub fn load<S>(&mut self, store: &S, range: DateRange) -> AppResult<()>
    where
        S: MetricsStore + ?Sized,
    {
        let sparse = match store.range_read(self.work_id, range.start(), range.end()) {
            Ok(rows) => rows,
            Err(error) => return Err(self.fail(error)),
        };

        self.rows = build_grid_for(&sparse, &range)
            .into_iter()
            .map(|row| WorkingRow { row, dirty: false })
            .collect();
        self.range = Some(range);
        self.state = SessionState::Loaded;
        self.last_error = None;
        self.refresh_chart();
        Ok(())
    }

    /// Writes a coerced counter value into the working copy and returns it.
    pub fn update_cell(&mut self, date: NaiveDate, field: CounterField, raw: &str) -> AppResult<u64> {
        self.ensure_loaded()?;
        let index = self.require_position(date)?;
        let value = coerce_counter(raw);

        let entry = &mut self.rows[index];
        entry.row.counters.set(field, value);
        entry.dirty = true;
        self.state = SessionState::Editing;
        self.refresh_chart();
        Ok(value)
    }

    pub fn save_row<S>(&mut self, store: &S, date: NaiveDate) -> AppResult<DailyMetricRow>
    where
        S: MetricsStore + ?Sized,
    {
        self.ensure_loaded()?;
        let index = self.require_position(date)?;
        let counters = CounterInput::from(self.rows[index].row.counters);

        self.state = SessionState::Saving;
        match store.upsert(self.work_id, date, &counters) {
            Ok(saved) => {
                self.rows[index].dirty = false;
                self.settle();
                Ok(saved)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    pub fn save_all<S>(&mut self, store: &S) -> AppResult<SaveOutcome>
    where
        S: MetricsStore + ?Sized,
    {
        if self.rows.is_empty() {
            tracing::info!(work_id = self.work_id, "nothing to save");
            return Ok(SaveOutcome::NothingToSave);
        }

        let entries: Vec<MetricEntry> = self
            .rows
            .iter()
            .map(|entry| MetricEntry::new(entry.row.date, CounterInput::from(entry.row.counters)))
            .collect();

        self.state = SessionState::Saving;
        match store.upsert_batch(self.work_id, &entries) {
            Ok(rows) => {
                for entry in &mut self.rows {
                    entry.dirty = false;
                }
                self.settle();
                Ok(SaveOutcome::Saved { rows })
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    pub fn view(&self, session_id: &str) -> EditSessionView {
        EditSessionView {
            session_id: session_id.to_string(),
            work_id: self.work_id,
            range: self.range,
            state: self.state,
            rows: self.rows.clone(),
            chart: self.chart.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn ensure_loaded(&self) -> AppResult<()> {
        if self.range.is_none() {
            return Err(AppError::State(format!(
                "edit session for work {} has no grid loaded",
                self.work_id
            )));
        }
        Ok(())
    }

    fn position(&self, date: NaiveDate) -> Option<usize> {
        self.rows.binary_search_by_key(&date, |entry| entry.row.date).ok()
    }

    fn require_position(&self, date: NaiveDate) -> AppResult<usize> {
        self.position(date).ok_or_else(|| {
            AppError::NotFound(format!("{} is outside the grid of work {}", date, self.work_id))
        })
    }

    fn settle(&mut self) {
        self.last_error = None;
        self.state = if self.is_dirty() {
            SessionState::Editing
        } else {
            SessionState::Loaded
        };
    }

    fn fail(&mut self, error: AppError) -> AppError {
        tracing::warn!(work_id = self.work_id, error = %error, "edit session operation failed");
        self.state = SessionState::Error;
        self.last_error = Some(error.to_string());
        error
    }

    fn refresh_chart(&mut self) {
        self.chart = TrendChart::from_rows(self.rows.iter().map(|entry| &entry.row));
    }
}

/// Reads the leading integer of `raw`; anything unusable becomes zero.
pub fn coerce_counter(raw: &str) -> u64 {
    let trimmed = raw.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let digits = &unsigned[..end];
    if negative || digits.is_empty() {
        return 0;
    }
    let ceiling = i64::MAX as u64;
    digits.parse::<u64>().map(|value| value.min(ceiling)).unwrap_or(ceiling)
}

#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, EditSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_session(&self, session: EditSession) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), session);
        session_id
    }

    pub async fn with_session<T>(
        &self,
        session_id: &str,
        apply: impl FnOnce(&mut EditSession) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return Err(AppError::NotFound(format!("No edit session {}", session_id)));
        };
        apply(session)
    }

    pub async fn session_ids_for_work(&self, work_id: i64) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(_, session)| session.work_id() == work_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id).is_some()
    }
}

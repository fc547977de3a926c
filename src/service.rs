use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::grid::{build_grid_for, default_range_for, parse_date_key, DateRange};
use crate::models::{
    Account, AccountSummary, AppSettings, BooleanResponse, Category, CounterField, CounterInput, CounterMaxima,
    CreateWorkPayload, DailyMetricRow, GridRow, ListWorksFilters, MetricEntry, SaveAccountPayload,
    SaveCategoryPayload, UpdateWorkPayload, Work, WorkSummary,
};
use crate::session::{EditSession, EditSessionView, SaveOutcome, SessionManager};
use crate::store::MetricsStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAllResponse {
    pub outcome: SaveOutcome,
    pub session: EditSessionView,
}

/// Entry point for every operation on works and their daily metrics.
pub struct MetricsService {
    db: Arc<Database>,
    sessions: SessionManager,
}

impl MetricsService {
    pub fn new(config: &AppConfig) -> AppResult<Arc<Self>> {
        Self::open(&config.database_path())
    }

    pub fn open(db_path: &Path) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(db_path)?);
        tracing::info!(path = %db_path.display(), "opened metrics database");
        Ok(Arc::new(Self {
            db,
            sessions: SessionManager::new(),
        }))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.db.update_settings(update)
    }

    pub fn save_category(&self, payload: SaveCategoryPayload) -> AppResult<Category> {
        self.db.save_category(payload)
    }

    pub fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.db.list_categories()
    }

    pub fn delete_category(&self, category_id: i64) -> AppResult<BooleanResponse> {
        Ok(BooleanResponse {
            ok: self.db.delete_category(category_id)?,
        })
    }

    pub fn save_account(&self, payload: SaveAccountPayload) -> AppResult<Account> {
        self.db.save_account(payload)
    }

    pub fn get_account(&self, account_id: i64) -> AppResult<Option<Account>> {
        self.db.get_account(account_id)
    }

    pub fn list_accounts(&self) -> AppResult<Vec<AccountSummary>> {
        self.db.list_accounts()
    }

    pub async fn delete_account(&self, account_id: i64) -> AppResult<BooleanResponse> {
        let Some(work_ids) = self.db.delete_account(account_id)? else {
            return Ok(BooleanResponse { ok: false });
        };
        for work_id in work_ids {
            self.close_sessions_for_work(work_id).await;
        }
        Ok(BooleanResponse { ok: true })
    }

    pub fn create_work(&self, payload: CreateWorkPayload) -> AppResult<Work> {
        let work = self.db.create_work(payload)?;
        tracing::info!(work_id = work.id, account_id = work.account_id, "created work");
        Ok(work)
    }

    pub fn update_work(&self, payload: UpdateWorkPayload) -> AppResult<Work> {
        self.db.update_work(payload)
    }

    pub fn list_works(&self, filters: &ListWorksFilters) -> AppResult<Vec<WorkSummary>> {
        self.db.list_works(filters)
    }

    pub async fn delete_work(&self, work_id: i64) -> AppResult<BooleanResponse> {
        let deleted = self.db.delete_work(work_id)?;
        self.close_sessions_for_work(work_id).await;
        if deleted {
            tracing::info!(work_id, "deleted work");
        }
        Ok(BooleanResponse { ok: deleted })
    }

    pub fn work_maxima(&self, work_id: i64) -> AppResult<CounterMaxima> {
        self.require_work(work_id)?;
        self.db.max_by_work(work_id)
    }

    pub fn upsert_metrics(&self, work_id: i64, date: &str, counters: CounterInput) -> AppResult<DailyMetricRow> {
        let date = parse_date_key(date)?;
        self.db.upsert(work_id, date, &counters).inspect_err(|error| {
            tracing::warn!(work_id, date = %date, error = %error, "metric upsert failed");
        })
    }

    pub fn import_metrics(&self, work_id: i64, entries: &[MetricEntry]) -> AppResult<usize> {
        let written = self.db.upsert_batch(work_id, entries).inspect_err(|error| {
            tracing::warn!(work_id, rows = entries.len(), error = %error, "metric batch rejected");
        })?;
        tracing::info!(work_id, rows = written, "imported metrics batch");
        Ok(written)
    }

    pub fn read_metrics(&self, work_id: i64, start: &str, end: &str) -> AppResult<Vec<DailyMetricRow>> {
        let range = DateRange::parse(start, end)?;
        self.db.range_read(work_id, range.start(), range.end())
    }

    pub fn grid(&self, work_id: i64, start: &str, end: &str) -> AppResult<Vec<GridRow>> {
        self.require_work(work_id)?;
        let range = DateRange::parse(start, end)?;
        let sparse = self.db.range_read(work_id, range.start(), range.end())?;
        Ok(build_grid_for(&sparse, &range))
    }

    /// Opens an edit session; without an explicit range the grid covers the
    /// work's creation day through today (UTC).
    pub async fn open_edit_session(&self, work_id: i64, range: Option<DateRange>) -> AppResult<EditSessionView> {
        let work = self.require_work(work_id)?;
        let range = range.unwrap_or_else(|| default_range_for(work.created_at, Utc::now().date_naive()));

        let mut session = EditSession::new(work_id);
        session.load(self.db.as_ref(), range)?;
        let view_source = session.clone();
        let session_id = self.sessions.open_session(session).await;
        tracing::info!(session_id = %session_id, work_id, range = %range, "opened edit session");
        Ok(view_source.view(&session_id))
    }

    pub async fn get_edit_session(&self, session_id: &str) -> AppResult<EditSessionView> {
        self.sessions
            .with_session(session_id, |session| Ok(session.view(session_id)))
            .await
    }

    pub async fn change_range(&self, session_id: &str, start: &str, end: &str) -> AppResult<EditSessionView> {
        let range = DateRange::parse(start, end)?;
        let db = self.db.as_ref();
        self.sessions
            .with_session(session_id, |session| {
                session.load(db, range)?;
                Ok(session.view(session_id))
            })
            .await
    }

    pub async fn update_cell(
        &self,
        session_id: &str,
        date: &str,
        field: CounterField,
        raw: &str,
    ) -> AppResult<EditSessionView> {
        let date = parse_date_key(date)?;
        self.sessions
            .with_session(session_id, |session| {
                session.update_cell(date, field, raw)?;
                Ok(session.view(session_id))
            })
            .await
    }

    pub async fn save_row(&self, session_id: &str, date: &str) -> AppResult<EditSessionView> {
        let date = parse_date_key(date)?;
        let db = self.db.as_ref();
        self.sessions
            .with_session(session_id, |session| {
                session.save_row(db, date)?;
                Ok(session.view(session_id))
            })
            .await
    }

    pub async fn save_all(&self, session_id: &str) -> AppResult<SaveAllResponse> {
        let db = self.db.as_ref();
        let response = self
            .sessions
            .with_session(session_id, |session| {
                let outcome = session.save_all(db)?;
                Ok(SaveAllResponse {
                    outcome,
                    session: session.view(session_id),
                })
            })
            .await?;
        if let SaveOutcome::Saved { rows } = response.outcome {
            tracing::info!(session_id = %session_id, rows, "saved edit session");
        }
        Ok(response)
    }

    pub async fn close_edit_session(&self, session_id: &str) -> BooleanResponse {
        BooleanResponse {
            ok: self.sessions.close_session(session_id).await,
        }
    }

    async fn close_sessions_for_work(&self, work_id: i64) {
        for session_id in self.sessions.session_ids_for_work(work_id).await {
            self.sessions.close_session(&session_id).await;
        }
    }

    fn require_work(&self, work_id: i64) -> AppResult<Work> {
        self.db
            .get_work(work_id)?
            .ok_or_else(|| AppError::NotFound(format!("work {} does not exist", work_id)))
    }
}

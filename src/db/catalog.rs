use super::metrics::{delete_metrics_for_work, ensure_work_exists};
use super::{parse_time, read_counter, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Account, AccountSummary, Category, CounterMaxima, CreateWorkPayload, ListWorksFilters, SaveAccountPayload,
    SaveCategoryPayload, UpdateWorkPayload, Work, WorkSummary,
};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

impl Database {
    pub fn save_category(&self, payload: SaveCategoryPayload) -> AppResult<Category> {
        let name = required_text("name", &payload.name)?;
        let color = match payload.color.as_deref().map(str::trim).filter(|color| !color.is_empty()) {
            Some(color) => color.to_string(),
            None => self.get_settings()?.default_category_color,
        };

        let conn = self.connection()?;
        let id = match payload.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE account_categories SET name = ?1, color = ?2 WHERE id = ?3",
                    params![name, color, id],
                )?;
                if changed == 0 {
                    return Err(AppError::NotFound(format!("category {} does not exist", id)));
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO account_categories (name, color, created_at) VALUES (?1, ?2, ?3)",
                    params![name, color, Utc::now().to_rfc3339()],
                )?;
                conn.last_insert_rowid()
            }
        };

        conn.query_row(
            "SELECT id, name, color, created_at FROM account_categories WHERE id = ?1",
            [id],
            parse_category_row,
        )
        .map_err(AppError::from)
    }

    pub fn list_categories(&self) -> AppResult<Vec<Category>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, color, created_at FROM account_categories ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], parse_category_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_category(&self, category_id: i64) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute("DELETE FROM account_categories WHERE id = ?1", [category_id])?;
        Ok(changed > 0)
    }

    pub fn save_account(&self, payload: SaveAccountPayload) -> AppResult<Account> {
        let name = required_text("name", &payload.name)?;

        let conn = self.connection()?;
        if let Some(category_id) = payload.category_id {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM account_categories WHERE id = ?1",
                    [category_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(AppError::NotFound(format!("category {} does not exist", category_id)));
            }
        }

        let id = match payload.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE accounts SET name = ?1, category_id = ?2 WHERE id = ?3",
                    params![name, payload.category_id, id],
                )?;
                if changed == 0 {
                    return Err(AppError::NotFound(format!("account {} does not exist", id)));
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO accounts (name, category_id, created_at) VALUES (?1, ?2, ?3)",
                    params![name, payload.category_id, Utc::now().to_rfc3339()],
                )?;
                conn.last_insert_rowid()
            }
        };

        conn.query_row(
            "SELECT id, name, category_id, created_at FROM accounts WHERE id = ?1",
            [id],
            parse_account_row,
        )
        .map_err(AppError::from)
    }

    pub fn get_account(&self, account_id: i64) -> AppResult<Option<Account>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, name, category_id, created_at FROM accounts WHERE id = ?1",
            [account_id],
            parse_account_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_accounts(&self) -> AppResult<Vec<AccountSummary>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, a.category_id, a.created_at, c.name, c.color, COUNT(w.id)
             FROM accounts a
             LEFT JOIN account_categories c ON a.category_id = c.id
             LEFT JOIN works w ON w.account_id = a.id
             GROUP BY a.id
             ORDER BY a.created_at DESC, a.id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AccountSummary {
                    account: parse_account_row(row)?,
                    category_name: row.get(4)?,
                    category_color: row.get(5)?,
                    works_count: read_counter(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Removes the account, its works and every metric row of those works.
    /// Returns the ids of the deleted works, or `None` when the account did
    /// not exist.
    pub fn delete_account(&self, account_id: i64) -> AppResult<Option<Vec<i64>>> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let work_ids = {
            let mut stmt = tx.prepare("SELECT id FROM works WHERE account_id = ?1")?;
            let ids = stmt
                .query_map([account_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        for work_id in &work_ids {
            delete_work_rows(&tx, *work_id)?;
        }
        let changed = tx.execute("DELETE FROM accounts WHERE id = ?1", [account_id])?;
        tx.commit()?;

        if changed == 0 {
            return Ok(None);
        }
        tracing::info!(account_id, works = work_ids.len(), "deleted account");
        Ok(Some(work_ids))
    }

    pub fn create_work(&self, payload: CreateWorkPayload) -> AppResult<Work> {
        let title = required_text("title", &payload.title)?;
        let now = Utc::now();
        let published_at = payload.published_at.unwrap_or(now);
        let cover_image = payload
            .cover_image
            .map(|cover| cover.trim().to_string())
            .filter(|cover| !cover.is_empty());

        let conn = self.connection()?;
        let account_exists = conn
            .query_row("SELECT 1 FROM accounts WHERE id = ?1", [payload.account_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        if account_exists.is_none() {
            return Err(AppError::NotFound(format!("account {} does not exist", payload.account_id)));
        }

        conn.execute(
            "INSERT INTO works (account_id, title, cover_image, published_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payload.account_id,
                title,
                cover_image,
                published_at.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;

        Ok(Work {
            id: conn.last_insert_rowid(),
            account_id: payload.account_id,
            title,
            cover_image,
            published_at,
            created_at: now,
        })
    }

    pub fn get_work(&self, work_id: i64) -> AppResult<Option<Work>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, account_id, title, cover_image, published_at, created_at FROM works WHERE id = ?1",
            [work_id],
            parse_work_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn update_work(&self, payload: UpdateWorkPayload) -> AppResult<Work> {
        let title = payload
            .title
            .as_deref()
            .map(|title| required_text("title", title))
            .transpose()?;

        {
            let conn = self.connection()?;
            ensure_work_exists(&conn, payload.id)?;
            if let Some(title) = &title {
                conn.execute("UPDATE works SET title = ?1 WHERE id = ?2", params![title, payload.id])?;
            }
            if let Some(published_at) = payload.published_at {
                conn.execute(
                    "UPDATE works SET published_at = ?1 WHERE id = ?2",
                    params![published_at.to_rfc3339(), payload.id],
                )?;
            }
        }

        self.get_work(payload.id)?
            .ok_or_else(|| AppError::NotFound(format!("work {} does not exist", payload.id)))
    }

    pub fn list_works(&self, filters: &ListWorksFilters) -> AppResult<Vec<WorkSummary>> {
        let default_limit = self.get_settings()?.works_list_limit;

        let mut query = String::from(
            "SELECT w.id, w.account_id, w.title, w.cover_image, w.published_at, w.created_at,
                    COALESCE(MAX(m.likes), 0), COALESCE(MAX(m.comments), 0),
                    COALESCE(MAX(m.messages), 0), COALESCE(MAX(m.views), 0),
                    COUNT(m.id)
             FROM works w
             LEFT JOIN work_daily_metrics m ON m.work_id = w.id
             WHERE 1 = 1",
        );
        let mut params_vec: Vec<Value> = Vec::new();

        if let Some(account_id) = filters.account_id {
            query.push_str(" AND w.account_id = ?");
            params_vec.push(Value::Integer(account_id));
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|search| !search.is_empty()) {
            query.push_str(" AND w.title LIKE ? ESCAPE '\\'");
            params_vec.push(Value::Text(format!("%{}%", escape_like(search))));
        }
        if let Some(date_from) = filters.date_from {
            query.push_str(" AND substr(w.created_at, 1, 10) >= ?");
            params_vec.push(Value::Text(date_from.format("%Y-%m-%d").to_string()));
        }
        if let Some(date_to) = filters.date_to {
            query.push_str(" AND substr(w.created_at, 1, 10) <= ?");
            params_vec.push(Value::Text(date_to.format("%Y-%m-%d").to_string()));
        }

        query.push_str(" GROUP BY w.id ORDER BY w.created_at DESC, w.id DESC LIMIT ? OFFSET ?");
        params_vec.push(Value::Integer(i64::from(filters.limit.unwrap_or(default_limit))));
        params_vec.push(Value::Integer(i64::from(filters.offset.unwrap_or(0))));

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec), |row| {
            Ok(WorkSummary {
                work: parse_work_row(row)?,
                maxima: CounterMaxima {
                    max_likes: read_counter(row, 6)?,
                    max_comments: read_counter(row, 7)?,
                    max_messages: read_counter(row, 8)?,
                    max_views: read_counter(row, 9)?,
                },
                metrics_count: read_counter(row, 10)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Removes the work together with all of its metric rows.
    pub fn delete_work(&self, work_id: i64) -> AppResult<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let changed = delete_work_rows(&tx, work_id)?;
        tx.commit()?;
        Ok(changed)
    }
}

fn delete_work_rows(conn: &Connection, work_id: i64) -> AppResult<bool> {
    delete_metrics_for_work(conn, work_id)?;
    let changed = conn.execute("DELETE FROM works WHERE id = ?1", [work_id])?;
    Ok(changed > 0)
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn required_text(field: &str, raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, "cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn parse_category_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        category_id: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_work_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Work> {
    Ok(Work {
        id: row.get(0)?,
        account_id: row.get(1)?,
        title: row.get(2)?,
        cover_image: row.get(3)?,
        published_at: parse_time(&row.get::<_, String>(4)?)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

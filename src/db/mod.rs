mod catalog;
mod metrics;

use crate::errors::{AppError, AppResult};
use crate::models::AppSettings;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const DEFAULT_CATEGORIES: [(&str, &str); 3] = [
    ("Xiaohongshu", "#ff2442"),
    ("Kuaishou", "#ff6600"),
    ("Douyin", "#000000"),
];

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.ensure_schema_extensions()?;
        db.ensure_default_settings()?;
        if db.get_settings()?.seed_default_categories {
            db.seed_default_categories()?;
        }

        Ok(db)
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::validation("settings", error.to_string()))?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
            params![
                serde_json::to_string(&AppSettings::default())?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn seed_default_categories(&self) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO account_categories (name, color, created_at) VALUES (?1, ?2, ?3)",
        )?;
        for (name, color) in DEFAULT_CATEGORIES {
            stmt.execute(params![name, color, now])?;
        }
        Ok(())
    }

    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let conn = self.connection()?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Databases created before publish dates were editable lack the column.
        if !column_exists(&conn, "works", "published_at")? {
            conn.execute("ALTER TABLE works ADD COLUMN published_at TEXT", [])?;
            conn.execute(
                "UPDATE works SET published_at = created_at WHERE published_at IS NULL",
                [],
            )?;
            tracing::info!("added works.published_at column");
        }

        Ok(())
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn read_counter(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(index)?;
    u64::try_from(raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("negative counter {} in storage", raw),
            )),
        )
    })
}

fn to_sql_counter(value: u64) -> AppResult<i64> {
    i64::try_from(value).map_err(|_| AppError::validation("counter", format!("{} is too large to store", value)))
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;

    #[test]
    fn opening_twice_keeps_default_categories_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("test.db");
        {
            Database::new(&db_path).expect("first open");
        }
        let db = Database::new(&db_path).expect("second open");

        let categories = db.list_categories().expect("list categories");
        assert_eq!(categories.len(), 3);
        assert!(categories.iter().any(|category| category.name == "Douyin" && category.color == "#000000"));
    }

    #[test]
    fn settings_update_merges_into_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");

        let updated = db
            .update_settings(serde_json::json!({ "worksListLimit": 25 }))
            .expect("update settings");
        assert_eq!(updated.works_list_limit, 25);
        assert_eq!(updated.default_category_color, "#20c997");

        let reloaded = db.get_settings().expect("get settings");
        assert_eq!(reloaded, updated);

        let rejected = db.update_settings(serde_json::json!({ "worksListLimit": "many" }));
        assert!(rejected.expect_err("bad type").is_validation());
    }

    #[test]
    fn legacy_works_table_gains_published_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("legacy.db");
        {
            let conn = rusqlite::Connection::open(&db_path).expect("open legacy");
            conn.execute_batch(
                "CREATE TABLE works (
                   id INTEGER PRIMARY KEY AUTOINCREMENT,
                   account_id INTEGER NOT NULL,
                   title TEXT NOT NULL,
                   cover_image TEXT,
                   created_at TEXT NOT NULL
                 );
                 INSERT INTO works (account_id, title, created_at)
                 VALUES (1, 'old post', '2024-01-01T08:00:00+00:00');",
            )
            .expect("legacy schema");
        }

        let db = Database::new(&db_path).expect("db");
        let conn = db.conn.lock().expect("db lock");
        let published: String = conn
            .query_row("SELECT published_at FROM works WHERE id = 1", [], |row| row.get(0))
            .expect("published_at");
        assert_eq!(published, "2024-01-01T08:00:00+00:00");
    }
}

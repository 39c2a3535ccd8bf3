//! SQLite-backed model store.

use super::{ModelRecordPatch, ModelStore, ModelType, NewModelRecord, TrainedModelRecord};
use crate::{Result, TrainpipeError};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const SELECT_COLUMNS: &str =
    "id, project_id, name, model_type, base_model, model_path, created_at, updated_at";

/// Model records in a single SQLite table.
///
/// Thread-safe via internal mutex on the connection.
#[derive(Clone)]
pub struct SqliteModelStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteModelStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrainpipeError::Io {
                message: format!("Failed to create database directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| TrainpipeError::Database {
            message: format!("Failed to open model database: {}", e),
            source: Some(e),
        })?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TrainpipeError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nn_model (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                name TEXT NOT NULL UNIQUE,
                model_type TEXT NOT NULL,
                base_model TEXT NOT NULL,
                model_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nn_model_project
                ON nn_model(project_id, updated_at);
            "#,
        )
        .map_err(|e| TrainpipeError::Database {
            message: format!("Failed to initialize model schema: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| TrainpipeError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn query_one(
        conn: &Connection,
        clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<TrainedModelRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM nn_model WHERE {clause}");
        let row = conn
            .query_row(&sql, [param], |row| Ok(RawRecord::from_row(row)))
            .optional()?
            .transpose()?;
        row.map(RawRecord::into_record).transpose()
    }
}

impl ModelStore for SqliteModelStore {
    fn create(&self, record: NewModelRecord) -> Result<TrainedModelRecord> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO nn_model \
             (project_id, name, model_type, base_model, model_path, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                record.project_id,
                record.name,
                record.model_type.as_str(),
                record.base_model,
                record.model_path,
                now,
            ],
        )
        .map_err(|e| map_unique_violation(e, &record.name))?;

        let id = conn.last_insert_rowid();
        debug!("Created model record {} ({})", id, record.name);
        Self::query_one(&conn, "id = ?1", &id)?.ok_or_else(|| TrainpipeError::Database {
            message: format!("record {id} vanished after insert"),
            source: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<TrainedModelRecord>> {
        let conn = self.lock()?;
        Self::query_one(&conn, "id = ?1", &id)
    }

    fn get_by_name(&self, name: &str) -> Result<Option<TrainedModelRecord>> {
        let conn = self.lock()?;
        Self::query_one(&conn, "name = ?1", &name)
    }

    fn list_for_project(&self, project_id: i64) -> Result<Vec<TrainedModelRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM nn_model WHERE project_id = ?1 \
             ORDER BY updated_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([project_id], |row| Ok(RawRecord::from_row(row)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??.into_record()?);
        }
        Ok(records)
    }

    fn update(&self, id: i64, patch: &ModelRecordPatch) -> Result<Option<TrainedModelRecord>> {
        let conn = self.lock()?;
        let Some(current) = Self::query_one(&conn, "id = ?1", &id)? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(current));
        }

        let name = patch.name.clone().unwrap_or(current.name);
        let model_type = patch.model_type.unwrap_or(current.model_type);
        let base_model = patch.base_model.clone().unwrap_or(current.base_model);

        conn.execute(
            "UPDATE nn_model SET name = ?1, model_type = ?2, base_model = ?3, updated_at = ?4 \
             WHERE id = ?5",
            params![
                name,
                model_type.as_str(),
                base_model,
                timestamp(Utc::now()),
                id
            ],
        )
        .map_err(|e| map_unique_violation(e, &name))?;

        Self::query_one(&conn, "id = ?1", &id)
    }

    fn set_model_path(&self, id: i64, model_path: &str) -> Result<Option<TrainedModelRecord>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE nn_model SET model_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![model_path, timestamp(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Self::query_one(&conn, "id = ?1", &id)
    }

    fn delete(&self, id: i64) -> Result<Option<TrainedModelRecord>> {
        let conn = self.lock()?;
        let existing = Self::query_one(&conn, "id = ?1", &id)?;
        if existing.is_some() {
            conn.execute("DELETE FROM nn_model WHERE id = ?1", [id])?;
            debug!("Deleted model record {}", id);
        }
        Ok(existing)
    }
}

/// Row as stored, before enum and timestamp parsing.
struct RawRecord {
    id: i64,
    project_id: i64,
    name: String,
    model_type: String,
    base_model: String,
    model_path: String,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            model_type: row.get(3)?,
            base_model: row.get(4)?,
            model_path: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<TrainedModelRecord> {
        let model_type: ModelType = self.model_type.parse().map_err(|e: String| {
            TrainpipeError::Database {
                message: e,
                source: None,
            }
        })?;
        Ok(TrainedModelRecord {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            model_type,
            base_model: self.base_model,
            model_path: self.model_path,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrainpipeError::Database {
            message: format!("invalid timestamp {s:?}: {e}"),
            source: None,
        })
}

fn map_unique_violation(err: rusqlite::Error, name: &str) -> TrainpipeError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            TrainpipeError::validation("name", format!("a model named {name:?} already exists"))
        }
        _ => err.into(),
    }
}

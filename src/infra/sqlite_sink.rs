use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::ports::LoadSink;
use crate::domain::EnrichedDataset;
use crate::error::LoadError;

/// How a load treats rows already in the target table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Insert only; an event id already present rejects the whole load
    #[default]
    Append,
    /// Replace rows that share an event id
    Upsert,
    /// Empty the table first
    Replace,
}

/// Loads enriched events into a SQLite table keyed by event id, with the
/// action location stored as WKT.
pub struct SqliteLoadSink {
    db_path: PathBuf,
    mode: LoadMode,
}

impl SqliteLoadSink {
    pub fn new(db_path: impl Into<PathBuf>, mode: LoadMode) -> Self {
        Self {
            db_path: db_path.into(),
            mode,
        }
    }

    fn db_error(e: impl ToString) -> LoadError {
        LoadError::Database(e.to_string())
    }

    fn ensure_table(conn: &Connection, table: &str) -> Result<(), LoadError> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS {table} (
                event_id                INTEGER PRIMARY KEY,
                event_date              TEXT,
                event_code              TEXT,
                event_base_code         TEXT,
                event_root_code         TEXT,
                event_label             TEXT NOT NULL,
                event_base_label        TEXT NOT NULL,
                event_root_label        TEXT NOT NULL,
                action_geo_full_name    TEXT,
                action_geo_country_code TEXT,
                country_iso2            TEXT NOT NULL,
                action_geo_lat          REAL,
                action_geo_long         REAL,
                date_added              TEXT,
                source_url              TEXT,
                region_id               TEXT,
                region_name             TEXT,
                enrichment_status       TEXT NOT NULL,
                geom_wkt                TEXT,
                run_id                  TEXT NOT NULL,
                loaded_at               TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_region ON {table} (region_id);
            "#
        ))
        .map_err(Self::db_error)
    }

    fn load_blocking(
        db_path: &Path,
        mode: LoadMode,
        run_id: Uuid,
        dataset: EnrichedDataset,
        table: &str,
    ) -> Result<usize, LoadError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(Self::db_error)?;
        }
        let mut conn = Connection::open(db_path).map_err(Self::db_error)?;
        Self::ensure_table(&conn, table)?;

        // dropped without commit on any early return, which rolls back
        let tx = conn.transaction().map_err(Self::db_error)?;
        if mode == LoadMode::Replace {
            let removed = tx
                .execute(&format!("DELETE FROM {}", table), [])
                .map_err(Self::db_error)?;
            debug!(removed, "Cleared target table");
        }

        let verb = match mode {
            LoadMode::Upsert => "INSERT OR REPLACE INTO",
            LoadMode::Append | LoadMode::Replace => "INSERT INTO",
        };
        let sql = format!(
            "{verb} {table} (
                event_id, event_date, event_code, event_base_code, event_root_code,
                event_label, event_base_label, event_root_label,
                action_geo_full_name, action_geo_country_code, country_iso2,
                action_geo_lat, action_geo_long, date_added, source_url,
                region_id, region_name, enrichment_status, geom_wkt, run_id, loaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
        );

        let run_id = run_id.to_string();
        let loaded_at = Utc::now().to_rfc3339();
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(&sql).map_err(Self::db_error)?;
            for record in dataset.records() {
                let raw = &record.raw;
                let event_id = raw
                    .event_id
                    .ok_or_else(|| LoadError::MissingKey(table.to_string()))?;
                let result = stmt.execute(params![
                    event_id,
                    raw.event_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    raw.event_code,
                    raw.event_base_code,
                    raw.event_root_code,
                    record.labels.event,
                    record.labels.event_base,
                    record.labels.event_root,
                    raw.action_geo_full_name,
                    raw.action_geo_country_code,
                    record.labels.country_iso2,
                    raw.action_geo_lat,
                    raw.action_geo_long,
                    raw.date_added.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    raw.source_url,
                    record.region_id(),
                    record.region_name(),
                    record.status().as_str(),
                    record.point_wkt(),
                    run_id,
                    loaded_at,
                ]);
                match result {
                    Ok(n) => written += n,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        return Err(LoadError::DuplicateKey {
                            table: table.to_string(),
                            event_id,
                        });
                    }
                    Err(e) => return Err(Self::db_error(e)),
                }
            }
        }
        tx.commit().map_err(Self::db_error)?;
        Ok(written)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub(crate) fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl LoadSink for SqliteLoadSink {
    async fn load(
        &self,
        run_id: Uuid,
        dataset: EnrichedDataset,
        target_table: &str,
    ) -> Result<usize, LoadError> {
        if !is_valid_table_name(target_table) {
            return Err(LoadError::Database(format!(
                "invalid table name '{}'",
                target_table
            )));
        }
        let db_path = self.db_path.clone();
        let mode = self.mode;
        let table = target_table.to_string();
        let rows = tokio::task::spawn_blocking(move || {
            Self::load_blocking(&db_path, mode, run_id, dataset, &table)
        })
        .await
        .map_err(|e| LoadError::Database(format!("load task failed: {}", e)))??;

        info!(db = %self.db_path.display(), table = target_table, rows, ?mode, "Loaded dataset into SQLite");
        Ok(rows)
    }
}

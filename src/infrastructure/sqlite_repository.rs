// SQLite repository implementation
use crate::application::monitoring_repository::MonitoringRepository;
use crate::domain::monitoring::{NewReading, StoredReading, WaterBodyLocation};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const READING_COLUMNS: &str =
    "id, device_id, ph_value, tds_value, temperature, timestamp, is_error, error, raw_data, raw_bytes";

#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`; `:memory:` gives a private
    /// in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let mut conn = if path == ":memory:" {
            Connection::open_in_memory().context("failed to open in-memory database")?
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
            let conn = Connection::open(path)
                .with_context(|| format!("failed to open SQLite database {path}"))?;
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                tracing::warn!(error = %err, "Failed to enable WAL mode");
            }
            conn
        };

        run_migrations(&mut conn).context("failed to run database migrations")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `task` against the connection on the blocking pool.
    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("database connection lock poisoned"))?;
            task(&mut guard)
        })
        .await
        .context("database task failed")?
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schemas/schema_v1.sql"))
                .context("failed to execute schema_v1.sql")?;
            Ok(())
        }
        _ => bail!("no migration defined for version {version}"),
    }
}

/// Fixed-width UTC text so that string order matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn map_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let timestamp: String = row.get(5)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(StoredReading {
        id: row.get(0)?,
        device_id: row.get(1)?,
        ph_value: row.get(2)?,
        tds_value: row.get(3)?,
        temperature: row.get(4)?,
        timestamp,
        is_error: row.get(6)?,
        error: row.get(7)?,
        raw_data: row.get(8)?,
        raw_bytes: row.get(9)?,
    })
}

fn map_location(row: &Row<'_>) -> rusqlite::Result<WaterBodyLocation> {
    Ok(WaterBodyLocation {
        device_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
    })
}

#[async_trait]
impl MonitoringRepository for SqliteRepository {
    async fn insert_reading(&self, reading: NewReading) -> Result<i64> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO monitoring_data (
                    device_id,
                    ph_value,
                    tds_value,
                    temperature,
                    timestamp,
                    is_error,
                    error,
                    raw_data,
                    raw_bytes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    reading.device_id,
                    reading.ph_value,
                    reading.tds_value,
                    reading.temperature,
                    format_timestamp(&reading.timestamp),
                    reading.is_error,
                    reading.error,
                    reading.raw_data,
                    reading.raw_bytes,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn list_readings(&self) -> Result<Vec<StoredReading>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM monitoring_data ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], map_reading)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_device_ids(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT device_id FROM monitoring_data ORDER BY device_id ASC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
        .await
    }

    async fn latest_reading(&self, device_id: Option<&str>) -> Result<Option<StoredReading>> {
        let device_id = device_id.map(str::to_string);
        self.execute(move |conn| {
            let reading = conn
                .query_row(
                    &format!(
                        "SELECT {READING_COLUMNS} FROM monitoring_data
                         WHERE is_error = 0 AND (?1 IS NULL OR device_id = ?1)
                         ORDER BY timestamp DESC, id DESC
                         LIMIT 1"
                    ),
                    params![device_id],
                    map_reading,
                )
                .optional()?;
            Ok(reading)
        })
        .await
    }

    async fn readings_between(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM monitoring_data
                 WHERE device_id = ?1 AND is_error = 0 AND timestamp >= ?2 AND timestamp < ?3
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(
                params![device_id, format_timestamp(&start), format_timestamp(&end)],
                map_reading,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn device_history(&self, device_id: &str) -> Result<Vec<StoredReading>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS} FROM monitoring_data
                 WHERE device_id = ?1 AND is_error = 0
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![device_id], map_reading)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn upsert_location(&self, location: WaterBodyLocation) -> Result<WaterBodyLocation> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO water_bodies (device_id, latitude, longitude)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(device_id) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude",
                params![location.device_id, location.latitude, location.longitude],
            )?;
            Ok(location)
        })
        .await
    }

    async fn get_location(&self, device_id: &str) -> Result<Option<WaterBodyLocation>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let location = conn
                .query_row(
                    "SELECT device_id, latitude, longitude FROM water_bodies WHERE device_id = ?1",
                    params![device_id],
                    map_location,
                )
                .optional()?;
            Ok(location)
        })
        .await
    }

    async fn list_locations(&self) -> Result<Vec<WaterBodyLocation>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id, latitude, longitude FROM water_bodies ORDER BY device_id ASC",
            )?;
            let rows = stmt.query_map([], map_location)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn find_user_password(&self, username: &str) -> Result<Option<String>> {
        let username = username.to_string();
        self.execute(move |conn| {
            let password = conn
                .query_row(
                    "SELECT password FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(password)
        })
        .await
    }

    async fn ensure_user(&self, username: &str, password: &str) -> Result<()> {
        let username = username.to_string();
        let password = password.to_string();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (username, password) VALUES (?1, ?2)",
                params![username, password],
            )?;
            if inserted > 0 {
                tracing::info!(username = %username, "Created user");
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn reading(device_id: &str, ts: DateTime<Utc>, ph: Option<f64>) -> NewReading {
        NewReading {
            device_id: device_id.to_string(),
            ph_value: ph,
            tds_value: Some(300.0),
            temperature: None,
            timestamp: ts,
            is_error: false,
            error: None,
            raw_data: None,
            raw_bytes: None,
        }
    }

    fn error_record(device_id: &str, ts: DateTime<Utc>) -> NewReading {
        NewReading {
            device_id: device_id.to_string(),
            ph_value: None,
            tds_value: None,
            temperature: None,
            timestamp: ts,
            is_error: true,
            error: Some("unicode_decode_error".to_string()),
            raw_data: Some(String::new()),
            raw_bytes: Some("fffe00".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_latest() {
        let repo = SqliteRepository::open(":memory:").unwrap();

        let first = repo.insert_reading(reading("a", at(8, 0), Some(7.0))).await.unwrap();
        let second = repo.insert_reading(reading("a", at(9, 0), Some(7.4))).await.unwrap();
        repo.insert_reading(reading("b", at(8, 30), Some(6.1))).await.unwrap();
        repo.insert_reading(error_record("a", at(10, 0))).await.unwrap();
        assert!(second > first);

        let latest = repo.latest_reading(Some("a")).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.ph_value, Some(7.4));
        assert_eq!(latest.temperature, None);
        assert_eq!(latest.timestamp, at(9, 0));

        let global = repo.latest_reading(None).await.unwrap().unwrap();
        assert_eq!(global.id, second);

        assert!(repo.latest_reading(Some("missing")).await.unwrap().is_none());
        assert_eq!(repo.list_device_ids().await.unwrap(), vec!["a", "b"]);

        let all = repo.list_readings().await.unwrap();
        assert_eq!(all.len(), 4);
        let last = all.last().unwrap();
        assert!(last.is_error);
        assert_eq!(last.raw_bytes.as_deref(), Some("fffe00"));
    }

    #[tokio::test]
    async fn test_history_and_range_skip_error_rows() {
        let repo = SqliteRepository::open(":memory:").unwrap();
        repo.insert_reading(reading("a", at(12, 0), Some(7.2))).await.unwrap();
        repo.insert_reading(reading("a", at(6, 0), Some(6.8))).await.unwrap();
        repo.insert_reading(error_record("a", at(7, 0))).await.unwrap();
        repo.insert_reading(reading("a", at(23, 59), Some(7.9))).await.unwrap();

        let history = repo.device_history("a").await.unwrap();
        let phs: Vec<_> = history.iter().map(|r| r.ph_value).collect();
        assert_eq!(phs, vec![Some(6.8), Some(7.2), Some(7.9)]);

        let window = repo.readings_between("a", at(6, 0), at(12, 0)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].timestamp, at(6, 0));
    }

    #[tokio::test]
    async fn test_locations_upsert() {
        let repo = SqliteRepository::open(":memory:").unwrap();
        assert!(repo.get_location("a").await.unwrap().is_none());

        repo.upsert_location(WaterBodyLocation {
            device_id: "a".to_string(),
            latitude: -15.4,
            longitude: 28.3,
        })
        .await
        .unwrap();
        repo.upsert_location(WaterBodyLocation {
            device_id: "a".to_string(),
            latitude: -16.5,
            longitude: 28.8,
        })
        .await
        .unwrap();

        let location = repo.get_location("a").await.unwrap().unwrap();
        assert_eq!(location.latitude, -16.5);
        assert_eq!(repo.list_locations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_users() {
        let repo = SqliteRepository::open(":memory:").unwrap();
        repo.ensure_user("admin", "1234").await.unwrap();
        repo.ensure_user("admin", "changed").await.unwrap();

        assert_eq!(
            repo.find_user_password("admin").await.unwrap().as_deref(),
            Some("1234")
        );
        assert!(repo.find_user_password("nobody").await.unwrap().is_none());
    }

    #[test]
    fn test_file_database_reopens_at_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/water.db");
        let path = path.to_str().unwrap();

        SqliteRepository::open(path).unwrap();
        let repo = SqliteRepository::open(path).unwrap();

        let conn = repo.conn.lock().unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}

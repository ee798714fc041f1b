//! SQLite-backed plate store
//!
//! One row per upstream event id. Create and update share a single upsert:
//! `INSERT .. ON CONFLICT DO UPDATE SET col = COALESCE(excluded.col, col)`,
//! so concurrent writers to the same row merge per field and a write never
//! nulls out a field it was not asked to change. Row-level serialization at
//! the SQLite layer is the only cross-task synchronization this crate needs.

use crate::domain::{PlateRecord, RecordPatch, VehicleDirection};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct PlateStore {
    pool: SqlitePool,
}

impl PlateStore {
    /// Open (creating if necessary) the database at `path` and run migrations
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        // WAL + busy timeout keep concurrent per-event writers from
        // tripping over SQLite's single-writer lock
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open plate database at {path}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(db_path = %path, "plate_store_opened");
        Ok(store)
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                camera_name TEXT,
                detected_plate TEXT,
                matched_plate TEXT,
                vehicle_owner TEXT,
                vehicle_brand TEXT,
                fuzzy_score REAL,
                is_plate_matched BOOLEAN,
                is_trigger_zone_reached BOOLEAN,
                trigger_zones TEXT,
                entered_zones TEXT,
                vehicle_direction TEXT,
                image_path TEXT,
                detection_time TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create plates table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_plates_event ON plates(event_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create plates index")?;

        Ok(())
    }

    /// Idempotent create-or-update for the row keyed by `event_id`
    ///
    /// Only the supplied (non-`None`) patch fields are written; `created_at`
    /// is set once at insert and never touched again.
    pub async fn upsert(&self, event_id: &str, patch: RecordPatch) -> anyhow::Result<()> {
        let trigger_zones = match patch.trigger_zones {
            Some(zones) => Some(serde_json::to_string(&zones)?),
            None => None,
        };
        let entered_zones = match patch.entered_zones {
            Some(zones) => Some(serde_json::to_string(&zones)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO plates (
                event_id, camera_name, detected_plate, matched_plate,
                vehicle_owner, vehicle_brand, fuzzy_score, is_plate_matched,
                is_trigger_zone_reached, trigger_zones, entered_zones,
                vehicle_direction, image_path, detection_time, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(event_id) DO UPDATE SET
                camera_name = COALESCE(excluded.camera_name, camera_name),
                detected_plate = COALESCE(excluded.detected_plate, detected_plate),
                matched_plate = COALESCE(excluded.matched_plate, matched_plate),
                vehicle_owner = COALESCE(excluded.vehicle_owner, vehicle_owner),
                vehicle_brand = COALESCE(excluded.vehicle_brand, vehicle_brand),
                fuzzy_score = COALESCE(excluded.fuzzy_score, fuzzy_score),
                is_plate_matched = COALESCE(excluded.is_plate_matched, is_plate_matched),
                is_trigger_zone_reached = COALESCE(excluded.is_trigger_zone_reached, is_trigger_zone_reached),
                trigger_zones = COALESCE(excluded.trigger_zones, trigger_zones),
                entered_zones = COALESCE(excluded.entered_zones, entered_zones),
                vehicle_direction = COALESCE(excluded.vehicle_direction, vehicle_direction),
                image_path = COALESCE(excluded.image_path, image_path),
                detection_time = COALESCE(excluded.detection_time, detection_time)
            "#,
        )
        .bind(event_id)
        .bind(&patch.camera_name)
        .bind(&patch.detected_plate)
        .bind(&patch.matched_plate)
        .bind(&patch.vehicle_owner)
        .bind(&patch.vehicle_brand)
        .bind(patch.fuzzy_score)
        .bind(patch.is_plate_matched)
        .bind(patch.is_trigger_zone_reached)
        .bind(&trigger_zones)
        .bind(&entered_zones)
        .bind(patch.vehicle_direction.map(|d| d.as_str()))
        .bind(&patch.image_path)
        .bind(patch.detection_time.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert plate record for event {event_id}"))?;

        Ok(())
    }

    /// Point lookup by event id
    pub async fn get(&self, event_id: &str) -> anyhow::Result<Option<PlateRecord>> {
        let row = sqlx::query("SELECT * FROM plates WHERE event_id = ?1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read plate record for event {event_id}"))?;

        row.map(row_to_record).transpose()
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> anyhow::Result<PlateRecord> {
    let trigger_zones: Option<String> = row.try_get("trigger_zones")?;
    let entered_zones: Option<String> = row.try_get("entered_zones")?;
    let direction: Option<String> = row.try_get("vehicle_direction")?;
    let detection_time: Option<String> = row.try_get("detection_time")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(PlateRecord {
        event_id: row.try_get("event_id")?,
        camera_name: row.try_get("camera_name")?,
        detected_plate: row.try_get("detected_plate")?,
        matched_plate: row.try_get("matched_plate")?,
        vehicle_owner: row.try_get("vehicle_owner")?,
        vehicle_brand: row.try_get("vehicle_brand")?,
        fuzzy_score: row.try_get("fuzzy_score")?,
        is_plate_matched: row.try_get("is_plate_matched")?,
        is_trigger_zone_reached: row.try_get("is_trigger_zone_reached")?,
        trigger_zones: parse_zones(trigger_zones.as_deref()),
        entered_zones: parse_zones(entered_zones.as_deref()),
        vehicle_direction: direction
            .as_deref()
            .map(|s| VehicleDirection::from_str(s).unwrap_or(VehicleDirection::Unknown)),
        image_path: row.try_get("image_path")?,
        detection_time: detection_time.as_deref().map(parse_rfc3339).transpose()?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn parse_zones(json: Option<&str>) -> Vec<String> {
    json.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn parse_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid stored timestamp {s}"))?
        .with_timezone(&Utc))
}

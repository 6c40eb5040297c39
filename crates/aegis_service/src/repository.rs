//! The repository abstraction (§6): a narrow interface over calibration
//! data, historical validations, critic/memory state, decisions, and alerts.
//! spec.md scopes persistence out of the core ("the core sees a narrow
//! repository interface"); this module defines that interface and ships two
//! implementations — an in-process store for tests/`aegis_sim`, and a
//! `rusqlite`-backed store (grounded on
//! `joyshmitz-storage_ballast_helper::logger::sqlite::SqliteLogger`'s
//! WAL-mode-connection-plus-prepared-statements idiom) for the CLI's `serve`
//! command.

use aegis_core::{AegisError, AegisResult, CalibrationPoint, CriticModelSnapshot, DecisionRecord, HistoricalObservation, MemoryLevelSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// The narrow external-state interface (§6, §5). Writes to `decisions`,
/// `calibration`, `critic_models`, `memory_states` and `alerts` are
/// idempotent by primary key; calibration/decision/alert tables are
/// append-only.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_calibration(&self, stratum: &str, limit: usize) -> AegisResult<Vec<CalibrationPoint>>;
    async fn append_calibration(&self, stratum: &str, point: CalibrationPoint) -> AegisResult<()>;
    async fn get_historical_validation(
        &self,
        property_type: &str,
        age_bin: &str,
        region: &str,
        since: DateTime<Utc>,
    ) -> AegisResult<Vec<HistoricalObservation>>;
    async fn get_critic_model(&self, stratum: &str) -> AegisResult<Option<CriticModelSnapshot>>;
    async fn upsert_critic_model(&self, stratum: &str, state: CriticModelSnapshot) -> AegisResult<()>;
    async fn get_memory_level(&self, agent: &str, level: usize) -> AegisResult<Option<MemoryLevelSnapshot>>;
    async fn upsert_memory_level(&self, agent: &str, level: usize, params: MemoryLevelSnapshot) -> AegisResult<()>;
    async fn append_decision(&self, record: DecisionRecord) -> AegisResult<()>;
    async fn append_alert(&self, alert: Alert) -> AegisResult<()>;
}

/// One historical-validation observation as stored, keyed by the
/// (property_type, age_bin, region) triple and timestamped for the `since`
/// filter in `get_historical_validation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoricalRow {
    safety_false_negative: bool,
    recorded_at: DateTime<Utc>,
}

/// In-process store, guarded by `tokio::sync::Mutex`, used by `aegis_sim`
/// and unit tests. No I/O, deterministic, fast.
#[derive(Default)]
pub struct InMemoryRepository {
    calibration: Mutex<HashMap<String, Vec<CalibrationPoint>>>,
    historical: Mutex<HashMap<(String, String, String), Vec<HistoricalRow>>>,
    critic_models: Mutex<HashMap<String, CriticModelSnapshot>>,
    memory_levels: Mutex<HashMap<(String, usize), MemoryLevelSnapshot>>,
    decisions: Mutex<Vec<DecisionRecord>>,
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo helper: seeds a historical-validation record directly,
    /// bypassing the append-only decision pipeline.
    pub async fn seed_historical_validation(
        &self,
        property_type: &str,
        age_bin: &str,
        region: &str,
        safety_false_negative: bool,
        recorded_at: DateTime<Utc>,
    ) {
        let key = (property_type.to_string(), age_bin.to_string(), region.to_string());
        self.historical
            .lock()
            .await
            .entry(key)
            .or_default()
            .push(HistoricalRow {
                safety_false_negative,
                recorded_at,
            });
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_calibration(&self, stratum: &str, limit: usize) -> AegisResult<Vec<CalibrationPoint>> {
        let store = self.calibration.lock().await;
        Ok(store
            .get(stratum)
            .map(|points| {
                let mut points = points.clone();
                if points.len() > limit {
                    points = points.split_off(points.len() - limit);
                }
                points
            })
            .unwrap_or_default())
    }

    async fn append_calibration(&self, stratum: &str, point: CalibrationPoint) -> AegisResult<()> {
        self.calibration
            .lock()
            .await
            .entry(stratum.to_string())
            .or_default()
            .push(point);
        Ok(())
    }

    async fn get_historical_validation(
        &self,
        property_type: &str,
        age_bin: &str,
        region: &str,
        since: DateTime<Utc>,
    ) -> AegisResult<Vec<HistoricalObservation>> {
        let key = (property_type.to_string(), age_bin.to_string(), region.to_string());
        let store = self.historical.lock().await;
        Ok(store
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.recorded_at >= since)
                    .map(|r| HistoricalObservation {
                        safety_false_negative: r.safety_false_negative,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_critic_model(&self, stratum: &str) -> AegisResult<Option<CriticModelSnapshot>> {
        Ok(self.critic_models.lock().await.get(stratum).cloned())
    }

    async fn upsert_critic_model(&self, stratum: &str, state: CriticModelSnapshot) -> AegisResult<()> {
        self.critic_models.lock().await.insert(stratum.to_string(), state);
        Ok(())
    }

    async fn get_memory_level(&self, agent: &str, level: usize) -> AegisResult<Option<MemoryLevelSnapshot>> {
        Ok(self.memory_levels.lock().await.get(&(agent.to_string(), level)).cloned())
    }

    async fn upsert_memory_level(&self, agent: &str, level: usize, params: MemoryLevelSnapshot) -> AegisResult<()> {
        self.memory_levels
            .lock()
            .await
            .insert((agent.to_string(), level), params);
        Ok(())
    }

    async fn append_decision(&self, record: DecisionRecord) -> AegisResult<()> {
        self.decisions.lock().await.push(record);
        Ok(())
    }

    async fn append_alert(&self, alert: Alert) -> AegisResult<()> {
        self.alerts.lock().await.push(alert);
        Ok(())
    }
}

/// `rusqlite`-backed repository with the five tables named in §1
/// (calibration, historical validations, decisions, memory states, alerts)
/// plus `critic_models`. Keyed tables (`critic_models`, `memory_states`) use
/// `INSERT OR REPLACE` for idempotent-by-primary-key writes (§5);
/// append-only tables (`decisions`, `calibration`, `alerts`) use plain
/// `INSERT`.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS calibration (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stratum TEXT NOT NULL,
            point_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_calibration_stratum ON calibration(stratum);

        CREATE TABLE IF NOT EXISTS historical_validations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property_type TEXT NOT NULL,
            age_bin TEXT NOT NULL,
            region TEXT NOT NULL,
            safety_false_negative INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_historical_key
            ON historical_validations(property_type, age_bin, region);

        CREATE TABLE IF NOT EXISTS critic_models (
            stratum TEXT PRIMARY KEY,
            state_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_states (
            agent TEXT NOT NULL,
            level INTEGER NOT NULL,
            state_json TEXT NOT NULL,
            PRIMARY KEY (agent, level)
        );

        CREATE TABLE IF NOT EXISTS decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        ",
    )
}

fn store_err(operation: &str, reason: impl std::fmt::Display) -> AegisError {
    AegisError::StoreUnavailable {
        operation: operation.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_calibration(&self, stratum: &str, limit: usize) -> AegisResult<Vec<CalibrationPoint>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT point_json FROM calibration WHERE stratum = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| store_err("get_calibration", e))?;
        let rows = stmt
            .query_map(params![stratum, limit as i64], |row| row.get::<_, String>(0))
            .map_err(|e| store_err("get_calibration", e))?;
        let mut points = Vec::new();
        for row in rows {
            let json = row.map_err(|e| store_err("get_calibration", e))?;
            let point: CalibrationPoint =
                serde_json::from_str(&json).map_err(|e| store_err("get_calibration", e))?;
            points.push(point);
        }
        points.reverse();
        Ok(points)
    }

    async fn append_calibration(&self, stratum: &str, point: CalibrationPoint) -> AegisResult<()> {
        let json = serde_json::to_string(&point).map_err(|e| store_err("append_calibration", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO calibration (stratum, point_json, created_at) VALUES (?1, ?2, ?3)",
            params![stratum, json, point.created_at.to_rfc3339()],
        )
        .map_err(|e| store_err("append_calibration", e))?;
        Ok(())
    }

    async fn get_historical_validation(
        &self,
        property_type: &str,
        age_bin: &str,
        region: &str,
        since: DateTime<Utc>,
    ) -> AegisResult<Vec<HistoricalObservation>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT safety_false_negative FROM historical_validations
                 WHERE property_type = ?1 AND age_bin = ?2 AND region = ?3 AND recorded_at >= ?4",
            )
            .map_err(|e| store_err("get_historical_validation", e))?;
        let rows = stmt
            .query_map(
                params![property_type, age_bin, region, since.to_rfc3339()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| store_err("get_historical_validation", e))?;
        let mut observations = Vec::new();
        for row in rows {
            let flag = row.map_err(|e| store_err("get_historical_validation", e))?;
            observations.push(HistoricalObservation {
                safety_false_negative: flag != 0,
            });
        }
        Ok(observations)
    }

    async fn get_critic_model(&self, stratum: &str) -> AegisResult<Option<CriticModelSnapshot>> {
        let conn = self.conn.lock().await;
        let result: rusqlite::Result<String> = conn.query_row(
            "SELECT state_json FROM critic_models WHERE stratum = ?1",
            params![stratum],
            |row| row.get(0),
        );
        match result {
            Ok(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|e| store_err("get_critic_model", e))?,
            )),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err("get_critic_model", e)),
        }
    }

    async fn upsert_critic_model(&self, stratum: &str, state: CriticModelSnapshot) -> AegisResult<()> {
        let json = serde_json::to_string(&state).map_err(|e| store_err("upsert_critic_model", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO critic_models (stratum, state_json) VALUES (?1, ?2)",
            params![stratum, json],
        )
        .map_err(|e| store_err("upsert_critic_model", e))?;
        Ok(())
    }

    async fn get_memory_level(&self, agent: &str, level: usize) -> AegisResult<Option<MemoryLevelSnapshot>> {
        let conn = self.conn.lock().await;
        let result: rusqlite::Result<String> = conn.query_row(
            "SELECT state_json FROM memory_states WHERE agent = ?1 AND level = ?2",
            params![agent, level as i64],
            |row| row.get(0),
        );
        match result {
            Ok(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|e| store_err("get_memory_level", e))?,
            )),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err("get_memory_level", e)),
        }
    }

    async fn upsert_memory_level(&self, agent: &str, level: usize, params_: MemoryLevelSnapshot) -> AegisResult<()> {
        let json = serde_json::to_string(&params_).map_err(|e| store_err("upsert_memory_level", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO memory_states (agent, level, state_json) VALUES (?1, ?2, ?3)",
            params![agent, level as i64, json],
        )
        .map_err(|e| store_err("upsert_memory_level", e))?;
        Ok(())
    }

    async fn append_decision(&self, record: DecisionRecord) -> AegisResult<()> {
        let json = serde_json::to_string(&record).map_err(|e| store_err("append_decision", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO decisions (record_json, created_at) VALUES (?1, ?2)",
            params![json, Utc::now().to_rfc3339()],
        )
        .map_err(|e| store_err("append_decision", e))?;
        Ok(())
    }

    async fn append_alert(&self, alert: Alert) -> AegisResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO alerts (id, severity, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![alert.id, alert.severity, alert.message, alert.created_at.to_rfc3339()],
        )
        .map_err(|e| store_err("append_alert", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_point() -> CalibrationPoint {
        CalibrationPoint {
            true_class: "water_damage".to_string(),
            true_probability: 0.9,
            nonconformity_score: 0.1,
            importance_weight: 1.0,
            stratum_key: "global".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_calibration_round_trips() {
        let repo = InMemoryRepository::new();
        repo.append_calibration("global", sample_point()).await.unwrap();
        let points = repo.get_calibration("global", 10).await.unwrap();
        assert_eq!(points.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_calibration_respects_recency_limit() {
        let repo = InMemoryRepository::new();
        for _ in 0..5 {
            repo.append_calibration("global", sample_point()).await.unwrap();
        }
        let points = repo.get_calibration("global", 3).await.unwrap();
        assert_eq!(points.len(), 3);
    }

    #[tokio::test]
    async fn historical_validation_filters_by_since() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.seed_historical_validation("residential", "20-50", "us-west-2", false, now - Duration::days(400))
            .await;
        repo.seed_historical_validation("residential", "20-50", "us-west-2", false, now - Duration::days(1))
            .await;
        let rows = repo
            .get_historical_validation("residential", "20-50", "us-west-2", now - Duration::days(365))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn critic_model_upsert_round_trips_and_is_idempotent_by_stratum() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_critic_model("s").await.unwrap().is_none());

        let mut critic = aegis_core::SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        let ctx = aegis_core::ContextVector([0.3; aegis_core::CONTEXT_VECTOR_LEN]);
        critic.update(aegis_core::Decision::Automate, "s", &ctx, 0.8, 0.0);
        let snapshot = critic.snapshot("s").expect("stratum was updated");

        repo.upsert_critic_model("s", snapshot).await.unwrap();
        let reloaded = repo.get_critic_model("s").await.unwrap().expect("just inserted");
        assert_eq!(reloaded.automate.n, 1);

        // A second upsert for the same stratum replaces, not accumulates.
        let mut critic2 = aegis_core::SafeLucbCritic::new(1.0, 1.0, 1000, 0.005, 0.95);
        critic2.update(aegis_core::Decision::Automate, "s", &ctx, 0.5, 0.0);
        critic2.update(aegis_core::Decision::Automate, "s", &ctx, 0.5, 0.0);
        let snapshot2 = critic2.snapshot("s").unwrap();
        repo.upsert_critic_model("s", snapshot2).await.unwrap();
        let reloaded2 = repo.get_critic_model("s").await.unwrap().unwrap();
        assert_eq!(reloaded2.automate.n, 2);
    }
}

//! Versioned detector baselines.
//!
//! Baselines snapshot a detector's measured quality. At most ten are kept
//! per detector (newest first); a baseline needs at least 100 samples to
//! be "primary"; smaller samples are stored flagged and still participate
//! in drift alerting.

use super::metrics::QualityReport;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use singura_core::DetectorBaseline;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

/// Sample floor for a primary baseline.
pub const PRIMARY_SAMPLE_FLOOR: i32 = 100;

/// Retained baselines per detector.
pub const MAX_BASELINES_PER_DETECTOR: i64 = 10;

/// Build a baseline record from an evaluation report.
pub fn baseline_from_report(
    detector_name: &str,
    version: &str,
    report: &QualityReport,
) -> DetectorBaseline {
    DetectorBaseline {
        id: Uuid::new_v4(),
        detector_name: detector_name.to_string(),
        version: version.to_string(),
        precision: report.precision,
        recall: report.recall,
        f1: report.f1,
        sample_size: report.sample_size,
        below_sample_floor: report.sample_size < PRIMARY_SAMPLE_FLOOR,
        timestamp: Utc::now(),
    }
}

#[async_trait]
pub trait BaselineRepository: Send + Sync {
    /// Store a baseline and prune beyond the per-detector retention cap.
    async fn record(&self, baseline: &DetectorBaseline) -> Result<()>;

    /// Most recent baseline for a detector, regardless of sample size.
    async fn latest(&self, detector_name: &str) -> Result<Option<DetectorBaseline>>;

    /// Most recent primary (sample floor met) baseline for a detector.
    async fn latest_primary(&self, detector_name: &str) -> Result<Option<DetectorBaseline>>;

    /// All retained baselines for a detector, newest first.
    async fn list(&self, detector_name: &str) -> Result<Vec<DetectorBaseline>>;
}

pub struct PostgresBaselineRepository {
    pool: PgPool,
}

impl PostgresBaselineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> DetectorBaseline {
        DetectorBaseline {
            id: row.get("id"),
            detector_name: row.get("detector_name"),
            version: row.get("version"),
            precision: row.get("precision"),
            recall: row.get("recall"),
            f1: row.get("f1"),
            sample_size: row.get("sample_size"),
            below_sample_floor: row.get("below_sample_floor"),
            timestamp: row.get("timestamp"),
        }
    }
}

#[async_trait]
impl BaselineRepository for PostgresBaselineRepository {
    async fn record(&self, baseline: &DetectorBaseline) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO detector_baselines
                (id, detector_name, version, precision, recall, f1, sample_size, below_sample_floor, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(baseline.id)
        .bind(&baseline.detector_name)
        .bind(&baseline.version)
        .bind(baseline.precision)
        .bind(baseline.recall)
        .bind(baseline.f1)
        .bind(baseline.sample_size)
        .bind(baseline.below_sample_floor)
        .bind(baseline.timestamp)
        .execute(&mut *tx)
        .await?;

        // Prune beyond the retention cap, oldest first.
        sqlx::query(
            r#"
            DELETE FROM detector_baselines
            WHERE detector_name = $1
              AND id NOT IN (
                SELECT id FROM detector_baselines
                WHERE detector_name = $1
                ORDER BY timestamp DESC
                LIMIT $2
              )
            "#,
        )
        .bind(&baseline.detector_name)
        .bind(MAX_BASELINES_PER_DETECTOR)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            detector = %baseline.detector_name,
            sample_size = baseline.sample_size,
            below_floor = baseline.below_sample_floor,
            "Recorded detector baseline"
        );
        Ok(())
    }

    async fn latest(&self, detector_name: &str) -> Result<Option<DetectorBaseline>> {
        let row = sqlx::query(
            r#"
            SELECT id, detector_name, version, precision, recall, f1,
                   sample_size, below_sample_floor, timestamp
            FROM detector_baselines
            WHERE detector_name = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(detector_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::from_row))
    }

    async fn latest_primary(&self, detector_name: &str) -> Result<Option<DetectorBaseline>> {
        let row = sqlx::query(
            r#"
            SELECT id, detector_name, version, precision, recall, f1,
                   sample_size, below_sample_floor, timestamp
            FROM detector_baselines
            WHERE detector_name = $1 AND below_sample_floor = FALSE
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(detector_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::from_row))
    }

    async fn list(&self, detector_name: &str) -> Result<Vec<DetectorBaseline>> {
        let rows = sqlx::query(
            r#"
            SELECT id, detector_name, version, precision, recall, f1,
                   sample_size, below_sample_floor, timestamp
            FROM detector_baselines
            WHERE detector_name = $1
            ORDER BY timestamp DESC
            "#,
        )
        .bind(detector_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::from_row).collect())
    }
}

/// In-memory repository for tests.
#[derive(Default)]
pub struct InMemoryBaselineRepository {
    entries: std::sync::Mutex<Vec<DetectorBaseline>>,
}

impl InMemoryBaselineRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineRepository for InMemoryBaselineRepository {
    async fn record(&self, baseline: &DetectorBaseline) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(baseline.clone());
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut kept = 0;
        entries.retain(|b| {
            if b.detector_name != baseline.detector_name {
                return true;
            }
            kept += 1;
            kept <= MAX_BASELINES_PER_DETECTOR
        });
        Ok(())
    }

    async fn latest(&self, detector_name: &str) -> Result<Option<DetectorBaseline>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.detector_name == detector_name)
            .cloned())
    }

    async fn latest_primary(&self, detector_name: &str) -> Result<Option<DetectorBaseline>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.detector_name == detector_name && !b.below_sample_floor)
            .cloned())
    }

    async fn list(&self, detector_name: &str) -> Result<Vec<DetectorBaseline>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.detector_name == detector_name)
            .cloned()
            .collect())
    }
}

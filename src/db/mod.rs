use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::cognitive::profile::{LearnerProfile, ProfileStore, StoreError};
use crate::cognitive::types::{ContentType, ReviewRecord};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS "learner_profiles" (
        "learnerId" TEXT PRIMARY KEY,
        "version" BIGINT NOT NULL,
        "body" JSONB NOT NULL,
        "updatedAt" TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "review_records" (
        "learnerId" TEXT NOT NULL,
        "reviewId" TEXT NOT NULL,
        "itemId" TEXT NOT NULL,
        "contentType" TEXT NOT NULL,
        "reviewedAt" TIMESTAMPTZ NOT NULL,
        "correct" BOOLEAN NOT NULL,
        "latencyMs" BIGINT NOT NULL,
        "hintCount" INTEGER NOT NULL,
        PRIMARY KEY ("learnerId", "reviewId")
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS "review_records_learner_item_idx"
        ON "review_records" ("learnerId", "itemId", "reviewedAt")
    "#,
];

/// Postgres-backed profile store: one JSONB row per learner guarded by a
/// version column, plus the append-only review log.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("profile store schema ready");
        Ok(())
    }
}

fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn row_to_review(row: &PgRow) -> Result<ReviewRecord, StoreError> {
    let content_type: String = row.try_get("contentType")?;
    let latency_ms: i64 = row.try_get("latencyMs")?;
    let hint_count: i32 = row.try_get("hintCount")?;
    Ok(ReviewRecord {
        review_id: row.try_get("reviewId")?,
        learner_id: row.try_get("learnerId")?,
        item_id: row.try_get("itemId")?,
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown content type {content_type}")))?,
        reviewed_at: row.try_get::<DateTime<Utc>, _>("reviewedAt")?,
        correct: row.try_get("correct")?,
        latency_ms: u64::try_from(latency_ms).unwrap_or(0),
        hint_count: u32::try_from(hint_count).unwrap_or(0),
    })
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn load(&self, learner_id: &str) -> Result<Option<LearnerProfile>, StoreError> {
        let row = sqlx::query(r#"SELECT "version", "body" FROM "learner_profiles" WHERE "learnerId" = $1"#)
            .bind(learner_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version")?;
        let body: serde_json::Value = row.try_get("body")?;
        let mut profile: LearnerProfile = serde_json::from_value(body)?;
        // The column is authoritative for the version.
        profile.version = u64::try_from(version).unwrap_or(0);
        Ok(Some(profile))
    }

    async fn compare_and_swap(
        &self,
        profile: &LearnerProfile,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        let body = serde_json::to_value(profile)?;
        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO "learner_profiles" ("learnerId", "version", "body", "updatedAt")
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT ("learnerId") DO NOTHING
                    "#,
                )
                .bind(&profile.learner_id)
                .bind(version_to_db(profile.version))
                .bind(&body)
                .bind(profile.updated_at)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE "learner_profiles"
                    SET "version" = $2, "body" = $3, "updatedAt" = $4
                    WHERE "learnerId" = $1 AND "version" = $5
                    "#,
                )
                .bind(&profile.learner_id)
                .bind(version_to_db(profile.version))
                .bind(&body)
                .bind(profile.updated_at)
                .bind(version_to_db(expected))
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn append_review(&self, record: &ReviewRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "review_records"
                ("learnerId", "reviewId", "itemId", "contentType", "reviewedAt", "correct", "latencyMs", "hintCount")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ("learnerId", "reviewId") DO NOTHING
            "#,
        )
        .bind(&record.learner_id)
        .bind(&record.review_id)
        .bind(&record.item_id)
        .bind(record.content_type.as_str())
        .bind(record.reviewed_at)
        .bind(record.correct)
        .bind(i64::try_from(record.latency_ms).unwrap_or(i64::MAX))
        .bind(i32::try_from(record.hint_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reviews(&self, learner_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "learnerId", "reviewId", "itemId", "contentType", "reviewedAt",
                   "correct", "latencyMs", "hintCount"
            FROM "review_records"
            WHERE "learnerId" = $1
            ORDER BY "reviewedAt" ASC
            "#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_review).collect()
    }

    async fn delete(&self, learner_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let reviews = sqlx::query(r#"DELETE FROM "review_records" WHERE "learnerId" = $1"#)
            .bind(learner_id)
            .execute(&mut *tx)
            .await?;
        let profiles = sqlx::query(r#"DELETE FROM "learner_profiles" WHERE "learnerId" = $1"#)
            .bind(learner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(reviews.rows_affected() + profiles.rows_affected() > 0)
    }

    async fn learner_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(r#"SELECT "learnerId" FROM "learner_profiles" ORDER BY "learnerId""#)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("learnerId").map_err(StoreError::from))
            .collect()
    }
}

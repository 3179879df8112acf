//! Data Access Layer
//!
//! Postgres implementation of the assessment store. Queries are built at
//! runtime with `sqlx::query` so the crate builds without a live database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hermes_core::model::{FinalReport, ProficiencyLevel};
use hermes_core::store::{AssessmentRecord, AssessmentStore, Identity, ProfileUpsert};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

/// One row of the `assessments` table.
#[derive(FromRow, Debug)]
pub struct AssessmentRow {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub student_name: String,
    pub target_level: String,
    pub final_report: Json<FinalReport>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AssessmentRow> for AssessmentRecord {
    type Error = anyhow::Error;

    fn try_from(row: AssessmentRow) -> Result<Self> {
        let target_level = row
            .target_level
            .parse::<ProficiencyLevel>()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Assessment {} has an unreadable target level", row.id))?;
        Ok(AssessmentRecord {
            identity: Identity {
                id: row.user_id,
                name: row.user_name,
                email: row.user_email,
            },
            student_name: row.student_name,
            timestamp: row.created_at,
            target_level,
            final_report: row.final_report.0,
        })
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AssessmentStore for Db {
    async fn save_assessment(&self, record: AssessmentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assessments
                (id, user_id, user_name, user_email, student_name, target_level, final_report, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.identity.id)
        .bind(&record.identity.name)
        .bind(&record.identity.email)
        .bind(&record.student_name)
        .bind(record.target_level.code())
        .bind(Json(&record.final_report))
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert assessment")?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: ProfileUpsert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, name, email, last_assessment_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET name = EXCLUDED.name,
                email = COALESCE(EXCLUDED.email, profiles.email),
                last_assessment_at = EXCLUDED.last_assessment_at
            "#,
        )
        .bind(&profile.identity.id)
        .bind(&profile.name)
        .bind(&profile.identity.email)
        .bind(profile.last_assessment_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert profile")?;
        Ok(())
    }

    async fn list_assessments(&self, user_id: &str) -> Result<Vec<AssessmentRecord>> {
        let rows = sqlx::query_as::<_, AssessmentRow>(
            r#"
            SELECT id, user_id, user_name, user_email, student_name, target_level, final_report, created_at
            FROM assessments
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AssessmentRecord::try_from).collect()
    }
}

//! Persistence seam.
//!
//! The session writes two opaque records when a report is ready: the
//! assessment itself and an upsert of the learner's profile.

use crate::model::{FinalReport, ProficiencyLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// The learner as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
        }
    }

    /// Name shown on the report; falls back to the email's local part.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Student".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub identity: Identity,
    pub student_name: String,
    pub timestamp: DateTime<Utc>,
    pub target_level: ProficiencyLevel,
    pub final_report: FinalReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpsert {
    pub identity: Identity,
    pub name: String,
    pub last_assessment_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn save_assessment(&self, record: AssessmentRecord) -> anyhow::Result<()>;

    async fn upsert_profile(&self, profile: ProfileUpsert) -> anyhow::Result<()>;

    /// Stored assessments of one learner, most recent first.
    async fn list_assessments(&self, user_id: &str) -> anyhow::Result<Vec<AssessmentRecord>>;
}

/// A process-local store. Useful when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AssessmentRecord>>,
    profiles: Mutex<Vec<ProfileUpsert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile(&self, user_id: &str) -> Option<ProfileUpsert> {
        self.profiles
            .lock()
            .await
            .iter()
            .find(|p| p.identity.id == user_id)
            .cloned()
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn save_assessment(&self, record: AssessmentRecord) -> anyhow::Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn upsert_profile(&self, profile: ProfileUpsert) -> anyhow::Result<()> {
        let mut profiles = self.profiles.lock().await;
        match profiles
            .iter_mut()
            .find(|p| p.identity.id == profile.identity.id)
        {
            Some(existing) => *existing = profile,
            None => profiles.push(profile),
        }
        Ok(())
    }

    async fn list_assessments(&self, user_id: &str) -> anyhow::Result<Vec<AssessmentRecord>> {
        let mut records: Vec<AssessmentRecord> = self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.identity.id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

//! Learner profile and the accessor that owns every write to it.
//!
//! Writers never lock the profile. They load it, mutate a copy and publish it
//! with a version check; on a lost race the mutation is replayed against the
//! fresh copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cognitive::config::ProfileParams;
use crate::cognitive::difficulty::DifficultyState;
use crate::cognitive::error::{EngineError, EngineResult};
use crate::cognitive::estimator::CategoryModel;
use crate::cognitive::metrics::EngineMetrics;
use crate::cognitive::risk::RiskState;
use crate::cognitive::scheduler::ItemSchedule;
use crate::cognitive::types::{ContentType, ReviewRecord, SessionOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSummary {
    pub sessions: u32,
    pub total_time_on_task_secs: f64,
    pub average_time_on_task_secs: f64,
    pub last_session_at: Option<DateTime<Utc>>,
}

impl EngagementSummary {
    pub fn record(&mut self, outcome: &SessionOutcome) {
        self.sessions = self.sessions.saturating_add(1);
        self.total_time_on_task_secs += outcome.time_on_task_secs.max(0.0);
        self.average_time_on_task_secs = self.total_time_on_task_secs / f64::from(self.sessions);
        if self.last_session_at.map_or(true, |t| outcome.ended_at > t) {
            self.last_session_at = Some(outcome.ended_at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub learner_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub categories: BTreeMap<ContentType, CategoryModel>,
    #[serde(default)]
    pub items: BTreeMap<String, ItemSchedule>,
    #[serde(default)]
    pub difficulty: BTreeMap<ContentType, DifficultyState>,
    #[serde(default)]
    pub engagement: EngagementSummary,
    #[serde(default)]
    pub risk: RiskState,
}

impl LearnerProfile {
    pub fn new(learner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
            categories: BTreeMap::new(),
            items: BTreeMap::new(),
            difficulty: BTreeMap::new(),
            engagement: EngagementSummary::default(),
            risk: RiskState::default(),
        }
    }
}

/// Per-category slice of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub learner_id: String,
    pub version: u64,
    pub content_type: ContentType,
    pub model: Option<CategoryModel>,
    pub difficulty_level: Option<f64>,
    pub scheduled_items: usize,
    pub engagement: EngagementSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub profile: LearnerProfile,
    pub reviews: Vec<ReviewRecord>,
}

/// Outcome of a profile mutation. `Unchanged` skips the write.
#[derive(Debug)]
pub enum Change<T> {
    Commit(T),
    Unchanged(T),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Durable storage behind the profile accessor.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, learner_id: &str) -> Result<Option<LearnerProfile>, StoreError>;

    /// Publishes `profile` only if the stored version still equals
    /// `expected` (`None` meaning "absent"). Returns whether it was written.
    async fn compare_and_swap(
        &self,
        profile: &LearnerProfile,
        expected: Option<u64>,
    ) -> Result<bool, StoreError>;

    async fn append_review(&self, record: &ReviewRecord) -> Result<(), StoreError>;

    async fn reviews(&self, learner_id: &str) -> Result<Vec<ReviewRecord>, StoreError>;

    /// Removes the profile (with its item schedules) and the review log.
    async fn delete(&self, learner_id: &str) -> Result<bool, StoreError>;

    async fn learner_ids(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, LearnerProfile>>,
    reviews: RwLock<HashMap<String, Vec<ReviewRecord>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, learner_id: &str) -> Result<Option<LearnerProfile>, StoreError> {
        Ok(self.profiles.read().get(learner_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        profile: &LearnerProfile,
        expected: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut profiles = self.profiles.write();
        let current = profiles.get(&profile.learner_id).map(|p| p.version);
        if current != expected {
            return Ok(false);
        }
        profiles.insert(profile.learner_id.clone(), profile.clone());
        Ok(true)
    }

    async fn append_review(&self, record: &ReviewRecord) -> Result<(), StoreError> {
        self.reviews
            .write()
            .entry(record.learner_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn reviews(&self, learner_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
        Ok(self.reviews.read().get(learner_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, learner_id: &str) -> Result<bool, StoreError> {
        let removed_profile = self.profiles.write().remove(learner_id).is_some();
        let removed_reviews = self.reviews.write().remove(learner_id).is_some();
        Ok(removed_profile || removed_reviews)
    }

    async fn learner_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.profiles.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

pub struct ProfileAccessor {
    store: Arc<dyn ProfileStore>,
    params: ProfileParams,
    metrics: Arc<EngineMetrics>,
}

impl ProfileAccessor {
    pub fn new(store: Arc<dyn ProfileStore>, params: ProfileParams, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            store,
            params,
            metrics,
        }
    }

    pub async fn load(&self, learner_id: &str) -> EngineResult<Option<LearnerProfile>> {
        Ok(self.store.load(learner_id).await?)
    }

    pub async fn read(
        &self,
        learner_id: &str,
        content_type: ContentType,
    ) -> EngineResult<Option<CategoryView>> {
        let Some(profile) = self.store.load(learner_id).await? else {
            return Ok(None);
        };
        Ok(Some(CategoryView {
            learner_id: profile.learner_id.clone(),
            version: profile.version,
            content_type,
            model: profile.categories.get(&content_type).cloned(),
            difficulty_level: profile.difficulty.get(&content_type).map(|d| d.level),
            scheduled_items: profile
                .items
                .values()
                .filter(|item| item.content_type == content_type)
                .count(),
            engagement: profile.engagement.clone(),
        }))
    }

    /// Runs `mutate` against the latest profile and publishes the result with
    /// a version check, replaying the closure on conflict.
    pub async fn update<T, F>(&self, learner_id: &str, mut mutate: F) -> EngineResult<T>
    where
        F: FnMut(&mut LearnerProfile) -> EngineResult<Change<T>>,
    {
        let attempts = self.params.max_retries.saturating_add(1);
        for attempt in 0..attempts {
            let now = Utc::now();
            let (mut profile, expected) = match self.store.load(learner_id).await? {
                Some(profile) => {
                    let version = profile.version;
                    (profile, Some(version))
                }
                None => (LearnerProfile::new(learner_id, now), None),
            };

            let value = match mutate(&mut profile)? {
                Change::Unchanged(value) => return Ok(value),
                Change::Commit(value) => value,
            };

            profile.learner_id = learner_id.to_string();
            profile.version = expected.map_or(1, |v| v + 1);
            profile.updated_at = now;

            if self.store.compare_and_swap(&profile, expected).await? {
                return Ok(value);
            }

            self.metrics.record_profile_retry();
            debug!(learner_id, attempt, "profile version moved, retrying mutation");

            if attempt + 1 < attempts {
                let cap = self.params.retry_backoff_ms.saturating_mul(1 << attempt.min(6));
                let wait = rand::rng().random_range(0..=cap);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }

        self.metrics.record_profile_conflict();
        warn!(learner_id, attempts, "profile update gave up after repeated conflicts");
        Err(EngineError::ProfileConflict {
            learner_id: learner_id.to_string(),
            attempts,
        })
    }

    pub async fn append_review(&self, record: &ReviewRecord) -> EngineResult<()> {
        Ok(self.store.append_review(record).await?)
    }

    pub async fn snapshot(&self, learner_id: &str) -> EngineResult<Option<ProfileSnapshot>> {
        let Some(profile) = self.store.load(learner_id).await? else {
            return Ok(None);
        };
        let mut reviews = self.store.reviews(learner_id).await?;
        reviews.sort_by(|a, b| a.reviewed_at.cmp(&b.reviewed_at));
        Ok(Some(ProfileSnapshot { profile, reviews }))
    }

    pub async fn delete(&self, learner_id: &str) -> EngineResult<bool> {
        Ok(self.store.delete(learner_id).await?)
    }

    pub async fn learner_ids(&self) -> EngineResult<Vec<String>> {
        Ok(self.store.learner_ids().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn accessor(store: Arc<dyn ProfileStore>) -> (ProfileAccessor, Arc<EngineMetrics>) {
        let metrics = Arc::new(EngineMetrics::new());
        (
            ProfileAccessor::new(store, ProfileParams::default(), Arc::clone(&metrics)),
            metrics,
        )
    }

    /// Store whose first `losses` writes fail as if another writer got there first.
    struct ContendedStore {
        inner: MemoryProfileStore,
        losses: AtomicU32,
    }

    #[async_trait]
    impl ProfileStore for ContendedStore {
        async fn load(&self, learner_id: &str) -> Result<Option<LearnerProfile>, StoreError> {
            self.inner.load(learner_id).await
        }

        async fn compare_and_swap(
            &self,
            profile: &LearnerProfile,
            expected: Option<u64>,
        ) -> Result<bool, StoreError> {
            if self.losses.load(Ordering::SeqCst) > 0 {
                self.losses.fetch_sub(1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.compare_and_swap(profile, expected).await
        }

        async fn append_review(&self, record: &ReviewRecord) -> Result<(), StoreError> {
            self.inner.append_review(record).await
        }

        async fn reviews(&self, learner_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
            self.inner.reviews(learner_id).await
        }

        async fn delete(&self, learner_id: &str) -> Result<bool, StoreError> {
            self.inner.delete(learner_id).await
        }

        async fn learner_ids(&self) -> Result<Vec<String>, StoreError> {
            self.inner.learner_ids().await
        }
    }

    #[tokio::test]
    async fn test_update_creates_and_versions() {
        let (accessor, _) = accessor(Arc::new(MemoryProfileStore::new()));
        accessor
            .update("lee", |p| {
                p.engagement.sessions += 1;
                Ok(Change::Commit(()))
            })
            .await
            .unwrap();
        accessor
            .update("lee", |p| {
                p.engagement.sessions += 1;
                Ok(Change::Commit(()))
            })
            .await
            .unwrap();
        let profile = accessor.load("lee").await.unwrap().unwrap();
        assert_eq!(profile.version, 2);
        assert_eq!(profile.engagement.sessions, 2);
    }

    #[tokio::test]
    async fn test_unchanged_skips_write() {
        let (accessor, _) = accessor(Arc::new(MemoryProfileStore::new()));
        let value = accessor
            .update("mo", |_| Ok(Change::Unchanged(7)))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(accessor.load("mo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_retried_then_applied() {
        let store = Arc::new(ContendedStore {
            inner: MemoryProfileStore::new(),
            losses: AtomicU32::new(2),
        });
        let (accessor, metrics) = accessor(store);
        let mut runs = 0;
        accessor
            .update("ny", |p| {
                runs += 1;
                p.engagement.sessions += 1;
                Ok(Change::Commit(()))
            })
            .await
            .unwrap();
        assert_eq!(runs, 3);
        assert_eq!(metrics.snapshot().profile_retries, 2);
        let profile = accessor.load("ny").await.unwrap().unwrap();
        assert_eq!(profile.engagement.sessions, 1);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces() {
        let store = Arc::new(ContendedStore {
            inner: MemoryProfileStore::new(),
            losses: AtomicU32::new(100),
        });
        let (accessor, metrics) = accessor(store);
        let err = accessor
            .update("oz", |_| Ok(Change::Commit(())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProfileConflict { attempts: 6, .. }));
        assert!(err.is_retryable());
        assert_eq!(metrics.snapshot().profile_conflicts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_lose_no_updates() {
        let store: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
        let metrics = Arc::new(EngineMetrics::new());
        let accessor = Arc::new(ProfileAccessor::new(
            store,
            ProfileParams {
                max_retries: 64,
                retry_backoff_ms: 1,
            },
            metrics,
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let accessor = Arc::clone(&accessor);
            handles.push(tokio::spawn(async move {
                accessor
                    .update("pat", |p| {
                        p.engagement.sessions += 1;
                        Ok(Change::Commit(()))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let profile = accessor.load("pat").await.unwrap().unwrap();
        assert_eq!(profile.engagement.sessions, 16);
        assert_eq!(profile.version, 16);
    }

    #[tokio::test]
    async fn test_delete_removes_profile_and_reviews() {
        let (accessor, _) = accessor(Arc::new(MemoryProfileStore::new()));
        accessor
            .update("qi", |_| Ok(Change::Commit(())))
            .await
            .unwrap();
        accessor
            .append_review(&ReviewRecord {
                review_id: "r1".into(),
                learner_id: "qi".into(),
                item_id: "a".into(),
                content_type: ContentType::Visual,
                reviewed_at: Utc::now(),
                correct: true,
                latency_ms: 0,
                hint_count: 0,
            })
            .await
            .unwrap();
        assert_eq!(accessor.snapshot("qi").await.unwrap().unwrap().reviews.len(), 1);

        assert!(accessor.delete("qi").await.unwrap());
        assert!(accessor.snapshot("qi").await.unwrap().is_none());
        assert!(accessor.learner_ids().await.unwrap().is_empty());
    }
}

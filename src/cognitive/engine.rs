use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cognitive::config::EngineConfig;
use crate::cognitive::delivery::{AlertSink, EventBus, InterventionSink, Notifier};
use crate::cognitive::difficulty::{Attempt, DifficultyAdjustment, DifficultyController};
use crate::cognitive::error::{EngineError, EngineResult};
use crate::cognitive::estimator::{ForgettingCurveEstimator, StabilityEstimate};
use crate::cognitive::metrics::EngineMetrics;
use crate::cognitive::normalizer::{SignalNormalizer, SignalRejection};
use crate::cognitive::profile::{
    CategoryView, Change, MemoryProfileStore, ProfileAccessor, ProfileSnapshot, ProfileStore,
};
use crate::cognitive::risk::{RiskPredictor, RiskTransition};
use crate::cognitive::scheduler::{ReviewOrder, SpacedRepetitionScheduler};
use crate::cognitive::session::{SessionRegistry, SessionSnapshot};
use crate::cognitive::types::{
    ms_to_datetime, now_ms, ContentType, DueItem, InteractionSignal, RawEvent, ReviewRecord,
    RiskAlert, SessionKey, SessionOutcome,
};

const SWEEP_CONCURRENCY: usize = 8;

/// Supplies the peer-median weekly time-on-task (seconds) a learner is
/// compared against.
pub trait PeerBaseline: Send + Sync {
    fn median_time_on_task_secs(&self, learner_id: &str) -> Option<f64>;
}

pub struct NoPeerBaseline;

impl PeerBaseline for NoPeerBaseline {
    fn median_time_on_task_secs(&self, _learner_id: &str) -> Option<f64> {
        None
    }
}

pub struct StaticPeerBaseline(pub f64);

impl PeerBaseline for StaticPeerBaseline {
    fn median_time_on_task_secs(&self, _learner_id: &str) -> Option<f64> {
        (self.0 > 0.0).then_some(self.0)
    }
}

/// Acknowledgement for one ingested event. Rejections are reported here and
/// never raised.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutcome>,
}

impl IngestAck {
    fn accepted() -> Self {
        Self {
            accepted: true,
            code: None,
            detail: None,
            review: None,
        }
    }

    pub fn rejected(code: &str, detail: String) -> Self {
        Self {
            accepted: false,
            code: Some(code.to_string()),
            detail: Some(detail),
            review: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub review_id: String,
    pub item_id: String,
    pub content_type: ContentType,
    /// `false` when the review was a replay of the last applied one.
    pub applied: bool,
    pub next_due_at: Option<DateTime<Utc>>,
    pub interval_hours: f64,
    pub capped_by_retention: bool,
    pub stability: StabilityEstimate,
    pub difficulty_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_adjustment: Option<DifficultyAdjustment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    pub category: CategoryView,
    pub stability: StabilityEstimate,
    pub retention_horizon_hours: f64,
    pub learning_velocity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndSummary {
    pub session: Option<SessionSnapshot>,
    pub alerts: Vec<RiskAlert>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub learners: usize,
    pub weeks_materialized: usize,
    pub opened: usize,
    pub closed: usize,
    pub failed: usize,
}

pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ProfileStore>>,
    intervention_sink: Option<Arc<dyn InterventionSink>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    peers: Option<Arc<dyn PeerBaseline>>,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn intervention_sink(mut self, sink: Arc<dyn InterventionSink>) -> Self {
        self.intervention_sink = Some(sink);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn peer_baseline(mut self, peers: Arc<dyn PeerBaseline>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn build(self) -> CognitiveEngine {
        let config = self.config;
        let metrics = Arc::new(EngineMetrics::new());

        let mut notifier = Notifier::new(
            EventBus::new(),
            Arc::clone(&metrics),
            Duration::from_millis(config.session.delivery_retry_delay_ms),
        );
        if let Some(sink) = self.intervention_sink {
            notifier = notifier.with_intervention_sink(sink);
        }
        if let Some(sink) = self.alert_sink {
            notifier = notifier.with_alert_sink(sink);
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryProfileStore::new()));

        CognitiveEngine {
            normalizer: SignalNormalizer::new(config.normalizer.clone(), Arc::clone(&metrics)),
            estimator: ForgettingCurveEstimator::new(config.estimator.clone()),
            scheduler: SpacedRepetitionScheduler::new(config.scheduler.clone()),
            difficulty: DifficultyController::new(config.difficulty.clone()),
            risk: RiskPredictor::new(config.risk.clone()),
            profiles: ProfileAccessor::new(store, config.profile.clone(), Arc::clone(&metrics)),
            sessions: SessionRegistry::new(
                config.session.clone(),
                config.struggle.clone(),
                Arc::clone(&metrics),
                notifier.clone(),
            ),
            peers: self.peers.unwrap_or_else(|| Arc::new(NoPeerBaseline)),
            notifier,
            metrics,
            config,
        }
    }
}

pub struct CognitiveEngine {
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
    normalizer: SignalNormalizer,
    estimator: ForgettingCurveEstimator,
    scheduler: SpacedRepetitionScheduler,
    difficulty: DifficultyController,
    risk: RiskPredictor,
    profiles: ProfileAccessor,
    sessions: SessionRegistry,
    notifier: Notifier,
    peers: Arc<dyn PeerBaseline>,
}

impl CognitiveEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            store: None,
            intervention_sink: None,
            alert_sink: None,
            peers: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &EventBus {
        self.notifier.bus()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Validates a raw event and routes it. Review submissions also go
    /// through the review path.
    pub async fn ingest(&self, raw: RawEvent) -> IngestAck {
        let signal = match self.normalizer.normalize(&raw, now_ms()) {
            Ok(signal) => signal,
            Err(rejection) => return IngestAck::rejected(rejection.code(), rejection.to_string()),
        };

        let mut ack = IngestAck::accepted();

        if let InteractionSignal::ReviewSubmitted(submission) = &signal.signal {
            let mut submission = submission.clone();
            if submission.review_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
                submission.review_id = Some(format!(
                    "{}:{}:{}",
                    signal.session_id, submission.item_id, signal.timestamp_ms
                ));
            }
            let record = ReviewRecord::from_submission(
                &signal.key.learner_id,
                &submission,
                ms_to_datetime(signal.timestamp_ms),
            );
            match self.record_review(record).await {
                Ok(outcome) => ack.review = Some(outcome),
                // A rejected review never reaches the struggle detector.
                Err(e) => return IngestAck::rejected(e.code(), e.to_string()),
            }
        }

        if let Err(e) = self.sessions.dispatch(signal).await {
            warn!(session_id = %raw.session_id, error = %e, "signal could not reach its session");
            return IngestAck::rejected(e.code(), e.to_string());
        }
        ack
    }

    /// Acknowledges a body that never parsed into a `RawEvent`.
    pub fn reject_unparsable(&self, reason: impl Into<String>) -> IngestAck {
        let rejection = SignalRejection::MalformedPayload {
            kind: "event",
            reason: reason.into(),
        };
        self.metrics.record_rejection(&rejection);
        debug!(code = rejection.code(), reason = %rejection, "unparsable event dropped");
        IngestAck::rejected(rejection.code(), rejection.to_string())
    }

    /// Applies one review to the estimator, scheduler and difficulty
    /// controller in a single profile update.
    pub async fn record_review(&self, record: ReviewRecord) -> EngineResult<ReviewOutcome> {
        let ct = record.content_type;
        let result = self
            .profiles
            .update(&record.learner_id, |profile| {
                let item = profile
                    .items
                    .entry(record.item_id.clone())
                    .or_insert_with(|| self.scheduler.new_item(&record.item_id, ct));

                match self.scheduler.order_of(item, &record.review_id, record.reviewed_at) {
                    ReviewOrder::Fresh => {}
                    ReviewOrder::Replay => {
                        let stability = profile
                            .categories
                            .get(&ct)
                            .map(|m| self.estimator.estimate(m, ct))
                            .unwrap_or_else(|| {
                                self.estimator.estimate(&self.estimator.initial_model(ct), ct)
                            });
                        return Ok(Change::Unchanged(ReviewOutcome {
                            review_id: record.review_id.clone(),
                            item_id: record.item_id.clone(),
                            content_type: ct,
                            applied: false,
                            next_due_at: item.next_due_at,
                            interval_hours: item.interval_hours,
                            capped_by_retention: false,
                            stability,
                            difficulty_level: profile
                                .difficulty
                                .get(&ct)
                                .map_or(self.difficulty.params().initial_level, |d| d.level),
                            difficulty_adjustment: None,
                        }));
                    }
                    ReviewOrder::Stale { last_reviewed_at } => {
                        return Err(EngineError::StaleReview {
                            item_id: record.item_id.clone(),
                            last_reviewed_at,
                            received_at: record.reviewed_at,
                        });
                    }
                }

                let elapsed_hours = item
                    .last_review_at
                    .map(|last| (record.reviewed_at - last).num_milliseconds() as f64 / 3_600_000.0);
                item.content_type = ct;

                let model = profile
                    .categories
                    .entry(ct)
                    .or_insert_with(|| self.estimator.initial_model(ct));
                let stability = self.estimator.observe(model, ct, elapsed_hours, record.correct);

                let decision = self.scheduler.schedule(
                    item,
                    record.reviewed_at,
                    &record.review_id,
                    record.correct,
                    stability.stability_hours(),
                );

                let state = profile
                    .difficulty
                    .entry(ct)
                    .or_insert_with(|| self.difficulty.initial_state());
                let adjustment = self.difficulty.record(
                    state,
                    ct,
                    Attempt {
                        correct: record.correct,
                        latency_ms: record.latency_ms,
                        hint_count: record.hint_count,
                    },
                );

                Ok(Change::Commit(ReviewOutcome {
                    review_id: record.review_id.clone(),
                    item_id: record.item_id.clone(),
                    content_type: ct,
                    applied: true,
                    next_due_at: Some(decision.next_due_at),
                    interval_hours: decision.interval_hours,
                    capped_by_retention: decision.capped_by_retention,
                    stability,
                    difficulty_level: state.level,
                    difficulty_adjustment: adjustment,
                }))
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, EngineError::StaleReview { .. }) {
                    self.metrics.record_review_stale();
                    debug!(learner_id = %record.learner_id, item_id = %record.item_id, error = %e, "review rejected");
                }
                return Err(e);
            }
        };

        if !outcome.applied {
            self.metrics.record_review_duplicate();
            debug!(learner_id = %record.learner_id, review_id = %record.review_id, "review replay ignored");
            return Ok(outcome);
        }

        self.metrics.record_review_applied();
        if outcome.stability.is_underfit() {
            self.metrics.record_underfit();
        }
        if let Err(e) = self.profiles.append_review(&record).await {
            warn!(learner_id = %record.learner_id, review_id = %record.review_id, error = %e, "review log append failed");
        }
        if let Some(adjustment) = outcome.difficulty_adjustment.clone() {
            info!(
                learner_id = %record.learner_id,
                content_type = ct.as_str(),
                level = adjustment.level,
                "difficulty adjusted"
            );
            self.notifier.difficulty(&record.learner_id, adjustment);
        }
        Ok(outcome)
    }

    pub async fn flush_session(&self, learner_id: &str, context_id: &str) -> Option<SessionSnapshot> {
        self.sessions.flush(&SessionKey::new(learner_id, context_id)).await
    }

    pub async fn session_snapshot(&self, learner_id: &str, context_id: &str) -> Option<SessionSnapshot> {
        self.sessions.snapshot(&SessionKey::new(learner_id, context_id)).await
    }

    pub async fn end_session(
        &self,
        learner_id: &str,
        context_id: &str,
        outcome: Option<SessionOutcome>,
    ) -> EngineResult<SessionEndSummary> {
        let session = self.sessions.end(&SessionKey::new(learner_id, context_id)).await;
        let alerts = match outcome {
            Some(outcome) => self.record_session_outcome(learner_id, outcome).await?,
            None => Vec::new(),
        };
        Ok(SessionEndSummary { session, alerts })
    }

    /// Folds a session's engagement into the profile and re-evaluates risk.
    /// Returns the alerts that opened or closed.
    pub async fn record_session_outcome(
        &self,
        learner_id: &str,
        outcome: SessionOutcome,
    ) -> EngineResult<Vec<RiskAlert>> {
        let peer_median = self.peers.median_time_on_task_secs(learner_id);
        let transitions = self
            .profiles
            .update(learner_id, |profile| {
                profile.engagement.record(&outcome);
                self.risk.record_session(&mut profile.risk, &outcome);
                let transitions =
                    self.risk
                        .evaluate(&mut profile.risk, learner_id, outcome.ended_at, peer_median);
                Ok(Change::Commit(transitions))
            })
            .await?;
        Ok(self.announce(learner_id, transitions))
    }

    pub async fn evaluate_risk(&self, learner_id: &str, now: DateTime<Utc>) -> EngineResult<Vec<RiskAlert>> {
        let peer_median = self.peers.median_time_on_task_secs(learner_id);
        let transitions = self
            .profiles
            .update(learner_id, |profile| {
                let transitions = self.risk.evaluate(&mut profile.risk, learner_id, now, peer_median);
                if transitions.is_empty() {
                    Ok(Change::Unchanged(transitions))
                } else {
                    Ok(Change::Commit(transitions))
                }
            })
            .await?;
        Ok(self.announce(learner_id, transitions))
    }

    fn announce(&self, learner_id: &str, transitions: Vec<RiskTransition>) -> Vec<RiskAlert> {
        transitions
            .into_iter()
            .map(|transition| {
                let alert = transition.alert();
                match &transition {
                    RiskTransition::Opened(_) => info!(
                        learner_id,
                        condition = alert.condition.as_str(),
                        week = alert.week,
                        "risk alert opened"
                    ),
                    RiskTransition::Closed(_) => info!(
                        learner_id,
                        condition = alert.condition.as_str(),
                        "risk alert closed"
                    ),
                }
                self.notifier.risk(&transition);
                alert.clone()
            })
            .collect()
    }

    async fn sweep_learner(&self, learner_id: &str, now: DateTime<Utc>) -> EngineResult<(usize, Vec<RiskAlert>)> {
        let peer_median = self.peers.median_time_on_task_secs(learner_id);
        let (created, transitions) = self
            .profiles
            .update(learner_id, |profile| {
                let due: Vec<DateTime<Utc>> =
                    profile.items.values().filter_map(|item| item.next_due_at).collect();
                let created = self.risk.materialize_empty_weeks(&mut profile.risk, now, due);
                let transitions = self.risk.evaluate(&mut profile.risk, learner_id, now, peer_median);
                if created.is_empty() && transitions.is_empty() {
                    Ok(Change::Unchanged((0, transitions)))
                } else {
                    Ok(Change::Commit((created.len(), transitions)))
                }
            })
            .await?;
        Ok((created, self.announce(learner_id, transitions)))
    }

    /// Periodic pass over every learner: fills missed weeks and re-evaluates risk.
    pub async fn sweep_risk(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let learner_ids = self.profiles.learner_ids().await?;
        let learners = learner_ids.len();
        let results: Vec<EngineResult<(usize, Vec<RiskAlert>)>> = stream::iter(learner_ids)
            .map(|learner_id| async move { self.sweep_learner(&learner_id, now).await })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut report = SweepReport {
            learners,
            ..SweepReport::default()
        };
        for result in results {
            match result {
                Ok((created, alerts)) => {
                    report.weeks_materialized += created;
                    for alert in alerts {
                        if alert.is_open() {
                            report.opened += 1;
                        } else {
                            report.closed += 1;
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "risk sweep failed for a learner");
                }
            }
        }
        Ok(report)
    }

    pub async fn next_due(
        &self,
        learner_id: &str,
        content_type: ContentType,
        before: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<DueItem>> {
        let Some(profile) = self.profiles.load(learner_id).await? else {
            return Ok(Vec::new());
        };
        Ok(SpacedRepetitionScheduler::due_items(
            profile.items.values(),
            content_type,
            before,
        ))
    }

    pub async fn read_profile(
        &self,
        learner_id: &str,
        content_type: ContentType,
    ) -> EngineResult<Option<ProfileView>> {
        let Some(category) = self.profiles.read(learner_id, content_type).await? else {
            return Ok(None);
        };
        let model = category
            .model
            .clone()
            .unwrap_or_else(|| self.estimator.initial_model(content_type));
        let stability = self.estimator.estimate(&model, content_type);
        Ok(Some(ProfileView {
            retention_horizon_hours: self
                .scheduler
                .retention_horizon_hours(stability.stability_hours()),
            learning_velocity: model.velocity,
            stability,
            category,
        }))
    }

    pub async fn alerts(&self, learner_id: &str) -> EngineResult<Vec<RiskAlert>> {
        Ok(self
            .profiles
            .load(learner_id)
            .await?
            .map(|profile| profile.risk.alerts())
            .unwrap_or_default())
    }

    pub async fn export_profile(&self, learner_id: &str) -> EngineResult<Option<ProfileSnapshot>> {
        self.profiles.snapshot(learner_id).await
    }

    /// Privacy deletion: live sessions are ended, then the profile with all
    /// item schedules and the review log is removed.
    pub async fn delete_profile(&self, learner_id: &str) -> EngineResult<bool> {
        let ended = self.sessions.end_learner(learner_id).await;
        let deleted = self.profiles.delete(learner_id).await?;
        info!(learner_id, ended_sessions = ended, deleted, "learner data deleted");
        Ok(deleted)
    }

    pub fn reap_sessions(&self) -> usize {
        self.sessions.reap()
    }
}

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cognitive::config::{RecoveryPolicy, RiskParams};
use crate::cognitive::types::{RiskAlert, RiskCondition, RiskFactor, RiskLevel, SessionOutcome};

const SECS_PER_WEEK: i64 = 7 * 24 * 3600;

/// Aggregated outcomes for one 7-day bucket counted from enrolment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekBucket {
    pub week: u32,
    pub sessions: u32,
    pub scheduled: u32,
    pub completed: u32,
    pub attempts: u32,
    pub correct: u32,
    pub time_on_task_secs: f64,
}

impl WeekBucket {
    fn empty(week: u32) -> Self {
        Self {
            week,
            sessions: 0,
            scheduled: 0,
            completed: 0,
            attempts: 0,
            correct: 0,
            time_on_task_secs: 0.0,
        }
    }

    pub fn engagement_ratio(&self) -> Option<f64> {
        (self.scheduled > 0).then(|| f64::from(self.completed.min(self.scheduled)) / f64::from(self.scheduled))
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| f64::from(self.correct.min(self.attempts)) / f64::from(self.attempts))
    }

    pub fn time_on_task_ratio(&self, peer_median_secs: Option<f64>) -> Option<f64> {
        let median = peer_median_secs.filter(|m| *m > 0.0)?;
        (self.sessions > 0).then(|| self.time_on_task_secs / median)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskState {
    pub enrolled_at: Option<DateTime<Utc>>,
    pub buckets: VecDeque<WeekBucket>,
    pub open: BTreeMap<RiskCondition, RiskAlert>,
    pub history: VecDeque<RiskAlert>,
}

impl RiskState {
    pub fn alerts(&self) -> Vec<RiskAlert> {
        let mut alerts: Vec<RiskAlert> = self.open.values().cloned().collect();
        alerts.extend(self.history.iter().cloned());
        alerts.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        alerts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskTransition {
    Opened(RiskAlert),
    Closed(RiskAlert),
}

impl RiskTransition {
    pub fn alert(&self) -> &RiskAlert {
        match self {
            Self::Opened(alert) | Self::Closed(alert) => alert,
        }
    }
}

enum Reading {
    Low(f64),
    Good,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct RiskPredictor {
    params: RiskParams,
}

impl RiskPredictor {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    pub fn week_index(enrolled_at: DateTime<Utc>, at: DateTime<Utc>) -> u32 {
        let secs = (at - enrolled_at).num_seconds().max(0);
        u32::try_from(secs / SECS_PER_WEEK).unwrap_or(u32::MAX)
    }

    fn weight(&self, week: u32) -> f64 {
        if week < self.params.early_weeks {
            self.params.early_weight
        } else {
            1.0
        }
    }

    fn bucket_mut(&self, state: &mut RiskState, week: u32) -> Option<usize> {
        if let Some(idx) = state.buckets.iter().position(|b| b.week == week) {
            return Some(idx);
        }
        let newest = state.buckets.back().map(|b| b.week);
        if let Some(newest) = newest {
            let span = u32::try_from(self.params.window_weeks).unwrap_or(u32::MAX).saturating_sub(1);
            let oldest_kept = newest.saturating_sub(span);
            if week < oldest_kept && state.buckets.len() >= self.params.window_weeks {
                return None;
            }
        }
        let idx = state.buckets.partition_point(|b| b.week < week);
        state.buckets.insert(idx, WeekBucket::empty(week));
        while state.buckets.len() > self.params.window_weeks.max(1) {
            state.buckets.pop_front();
        }
        state.buckets.iter().position(|b| b.week == week)
    }

    /// Folds a finished session into its weekly bucket. Returns `false` when
    /// the session is older than the retained window.
    pub fn record_session(&self, state: &mut RiskState, outcome: &SessionOutcome) -> bool {
        let enrolled_at = *state.enrolled_at.get_or_insert(outcome.ended_at);
        let week = Self::week_index(enrolled_at, outcome.ended_at);
        let Some(idx) = self.bucket_mut(state, week) else {
            return false;
        };
        let bucket = &mut state.buckets[idx];
        bucket.sessions = bucket.sessions.saturating_add(1);
        bucket.scheduled = bucket.scheduled.saturating_add(outcome.scheduled_reviews);
        bucket.completed = bucket.completed.saturating_add(outcome.completed_reviews);
        bucket.attempts = bucket.attempts.saturating_add(outcome.attempts);
        bucket.correct = bucket.correct.saturating_add(outcome.correct);
        bucket.time_on_task_secs += outcome.time_on_task_secs.max(0.0);
        true
    }

    /// Fills finished weeks with no sessions but with due reviews as
    /// zero-completion buckets. Returns the weeks created.
    pub fn materialize_empty_weeks<I>(&self, state: &mut RiskState, now: DateTime<Utc>, due_at: I) -> Vec<u32>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let Some(enrolled_at) = state.enrolled_at else {
            return Vec::new();
        };
        let current = Self::week_index(enrolled_at, now);
        let last = state.buckets.back().map(|b| b.week);
        let first_missing = last.map_or(0, |w| w.saturating_add(1));
        if first_missing >= current {
            return Vec::new();
        }

        let mut due_per_week: BTreeMap<u32, u32> = BTreeMap::new();
        for at in due_at {
            if at < enrolled_at {
                continue;
            }
            let week = Self::week_index(enrolled_at, at);
            if week >= first_missing && week < current {
                *due_per_week.entry(week).or_default() += 1;
            }
        }

        let mut created = Vec::new();
        for (week, due) in due_per_week {
            if let Some(idx) = self.bucket_mut(state, week) {
                state.buckets[idx].scheduled = state.buckets[idx].scheduled.saturating_add(due);
                created.push(week);
            }
        }
        created
    }

    fn read(&self, bucket: &WeekBucket, condition: RiskCondition, peer_median: Option<f64>) -> Reading {
        let p = &self.params;
        let (value, floor) = match condition {
            RiskCondition::LowEngagement => (bucket.engagement_ratio(), p.engagement_floor),
            RiskCondition::LowSuccess => (bucket.success_rate(), p.success_floor),
            RiskCondition::LowTimeOnTask => {
                (bucket.time_on_task_ratio(peer_median), p.time_on_task_ratio_floor)
            }
        };
        match value {
            Some(v) if v < floor => Reading::Low(v),
            Some(_) => Reading::Good,
            None => Reading::Unknown,
        }
    }

    /// Weighted length of the newest run of consecutive weeks matching `low`,
    /// plus the mean metric over that run when it is a low run.
    fn run(
        &self,
        state: &RiskState,
        condition: RiskCondition,
        peer_median: Option<f64>,
        low: bool,
    ) -> (f64, Option<f64>) {
        let mut weight = 0.0;
        let mut values = Vec::new();
        let mut expected: Option<u32> = None;
        for bucket in state.buckets.iter().rev() {
            if expected.is_some_and(|w| w != bucket.week) {
                break;
            }
            match (self.read(bucket, condition, peer_median), low) {
                (Reading::Low(v), true) => values.push(v),
                (Reading::Good, false) => {}
                _ => break,
            }
            weight += self.weight(bucket.week);
            let Some(prev) = bucket.week.checked_sub(1) else {
                break;
            };
            expected = Some(prev);
        }
        let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        (weight, mean)
    }

    fn floor(&self, condition: RiskCondition) -> f64 {
        match condition {
            RiskCondition::LowEngagement => self.params.engagement_floor,
            RiskCondition::LowSuccess => self.params.success_floor,
            RiskCondition::LowTimeOnTask => self.params.time_on_task_ratio_floor,
        }
    }

    fn metric_name(condition: RiskCondition) -> &'static str {
        match condition {
            RiskCondition::LowEngagement => "engagementRatio",
            RiskCondition::LowSuccess => "successRate",
            RiskCondition::LowTimeOnTask => "timeOnTaskRatio",
        }
    }

    fn recovered(&self, state: &RiskState, condition: RiskCondition, peer_median: Option<f64>) -> bool {
        match self.params.recovery {
            RecoveryPolicy::SingleWindow => state
                .buckets
                .back()
                .is_some_and(|b| matches!(self.read(b, condition, peer_median), Reading::Good)),
            RecoveryPolicy::FullWindow => {
                self.run(state, condition, peer_median, false).0 >= self.params.sustain_weight
            }
        }
    }

    /// Re-evaluates every condition. Opening an already-open condition is a
    /// no-op, so repeated evaluation is idempotent.
    pub fn evaluate(
        &self,
        state: &mut RiskState,
        learner_id: &str,
        now: DateTime<Utc>,
        peer_median: Option<f64>,
    ) -> Vec<RiskTransition> {
        let Some(latest_week) = state.buckets.back().map(|b| b.week) else {
            return Vec::new();
        };
        let mut transitions = Vec::new();

        for condition in RiskCondition::ALL {
            if state.open.contains_key(&condition) {
                if self.recovered(state, condition, peer_median) {
                    if let Some(mut alert) = state.open.remove(&condition) {
                        alert.closed_at = Some(now);
                        state.history.push_back(alert.clone());
                        while state.history.len() > self.params.history_limit {
                            state.history.pop_front();
                        }
                        transitions.push(RiskTransition::Closed(alert));
                    }
                }
                continue;
            }

            let (weight, mean) = self.run(state, condition, peer_median, true);
            let Some(mean) = mean.filter(|_| weight >= self.params.sustain_weight) else {
                continue;
            };
            let floor = self.floor(condition);
            let shortfall = if floor > 0.0 { (floor - mean) / floor } else { 0.0 };
            // A condition can close and reopen within one week.
            let reopened = state
                .history
                .iter()
                .filter(|a| a.condition == condition && a.week == latest_week)
                .count();
            let mut alert_id = format!("{learner_id}:{}:w{latest_week}", condition.as_str());
            if reopened > 0 {
                alert_id.push_str(&format!("-{}", reopened + 1));
            }
            let alert = RiskAlert {
                alert_id,
                learner_id: learner_id.to_string(),
                condition,
                level: RiskLevel::from_shortfall(shortfall),
                factors: vec![RiskFactor {
                    metric: Self::metric_name(condition).to_string(),
                    value: mean,
                    threshold: floor,
                }],
                week: latest_week,
                opened_at: now,
                closed_at: None,
            };
            state.open.insert(condition, alert.clone());
            transitions.push(RiskTransition::Opened(alert));
        }

        transitions
    }
}

impl Default for RiskPredictor {
    fn default() -> Self {
        Self::new(RiskParams::default())
    }
}

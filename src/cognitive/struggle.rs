//! Per-session struggle detector.
//!
//! Lifecycle: `Idle -> Accumulating -> Elevated -> Intervened -> Resolved`.
//! The score is a decaying accumulator; it is held flat for a debounce window
//! after each signal and halves every `half_life_ms` afterwards.

use serde::{Deserialize, Serialize};

use crate::cognitive::config::StruggleParams;
use crate::cognitive::types::InteractionSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StruggleState {
    #[default]
    Idle,
    Accumulating,
    Elevated,
    Intervened,
    Resolved,
}

impl StruggleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Accumulating => "accumulating",
            Self::Elevated => "elevated",
            Self::Intervened => "intervened",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveReason {
    SessionEnded,
    CorrectAnswer,
    MaxDuration,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StruggleTrigger {
    pub score: f64,
    pub at_ms: i64,
    pub episode: u32,
}

#[derive(Debug, Clone)]
pub struct StruggleDetector {
    params: StruggleParams,
    state: StruggleState,
    score: f64,
    started_ms: Option<i64>,
    last_signal_ms: Option<i64>,
    last_scroll_ms: Option<i64>,
    intervened_ms: Option<i64>,
    resolved_ms: Option<i64>,
    resolve_reason: Option<ResolveReason>,
    intervention_fired: bool,
    episodes: u32,
}

impl StruggleDetector {
    pub fn new(params: StruggleParams) -> Self {
        Self {
            params,
            state: StruggleState::Idle,
            score: 0.0,
            started_ms: None,
            last_signal_ms: None,
            last_scroll_ms: None,
            intervened_ms: None,
            resolved_ms: None,
            resolve_reason: None,
            intervention_fired: false,
            episodes: 0,
        }
    }

    pub fn state(&self) -> StruggleState {
        self.state
    }

    pub fn started_ms(&self) -> Option<i64> {
        self.started_ms
    }

    pub fn max_session_ms(&self) -> i64 {
        self.params.max_session_ms
    }

    pub fn last_signal_ms(&self) -> Option<i64> {
        self.last_signal_ms
    }

    pub fn intervention_fired(&self) -> bool {
        self.intervention_fired
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn resolve_reason(&self) -> Option<ResolveReason> {
        self.resolve_reason
    }

    /// Score as of the last applied signal, without time decay.
    pub fn raw_score(&self) -> f64 {
        self.score
    }

    /// Score as it would read at `now_ms` if no further signal arrived.
    pub fn score_at(&self, now_ms: i64) -> f64 {
        match self.last_signal_ms {
            Some(last) => self.decayed(self.score, last, now_ms),
            None => 0.0,
        }
    }

    fn decayed(&self, score: f64, last_ms: i64, now_ms: i64) -> f64 {
        let quiet = now_ms.saturating_sub(last_ms) - self.params.debounce_window_ms;
        if quiet <= 0 || score <= 0.0 {
            return score;
        }
        let half_lives = quiet as f64 / self.params.half_life_ms.max(1) as f64;
        score * 0.5f64.powf(half_lives)
    }

    fn increment(&mut self, at_ms: i64, signal: &InteractionSignal) -> f64 {
        let p = &self.params;
        match signal {
            InteractionSignal::Hover { duration_ms } => {
                if *duration_ms >= p.hover_threshold_ms {
                    p.hover_increment
                } else {
                    0.0
                }
            }
            InteractionSignal::ScrollReversal { count } => {
                let repeated = self
                    .last_scroll_ms
                    .is_some_and(|prev| at_ms - prev <= p.scroll_repeat_window_ms);
                self.last_scroll_ms = Some(at_ms);
                let per_reversal = if repeated || *count > 1 {
                    p.repeated_scroll_increment
                } else {
                    p.scroll_increment
                };
                per_reversal * f64::from(*count)
            }
            InteractionSignal::IdleGap { gap_ms } => {
                (*gap_ms as f64 / 1000.0 * p.idle_rate_per_sec).min(p.idle_increment_cap)
            }
            InteractionSignal::KeystrokeBurst { keys } => {
                if *keys >= p.keystroke_burst_threshold {
                    p.keystroke_increment
                } else {
                    0.0
                }
            }
            InteractionSignal::ReviewSubmitted(review) => {
                if review.correct {
                    0.0
                } else {
                    p.incorrect_answer_increment
                }
            }
        }
    }

    /// Applies one signal. Returns a trigger when this signal opens a new
    /// elevation episode; the caller delivers it and then calls
    /// [`mark_intervened`](Self::mark_intervened).
    pub fn apply(&mut self, at_ms: i64, signal: &InteractionSignal) -> Option<StruggleTrigger> {
        if self.state == StruggleState::Resolved {
            return None;
        }

        let started = *self.started_ms.get_or_insert(at_ms);
        if self.state == StruggleState::Idle {
            self.state = StruggleState::Accumulating;
        }

        if at_ms - started >= self.params.max_session_ms {
            self.resolve(at_ms, ResolveReason::MaxDuration);
            return None;
        }

        if let InteractionSignal::ReviewSubmitted(review) = signal {
            if review.correct {
                self.resolve(at_ms, ResolveReason::CorrectAnswer);
                return None;
            }
        }

        let base = match self.last_signal_ms {
            Some(last) if at_ms > last => self.decayed(self.score, last, at_ms),
            _ => self.score,
        };
        let increment = self.increment(at_ms, signal);
        self.score = (base + increment).min(self.params.score_ceiling);
        self.last_signal_ms = Some(self.last_signal_ms.map_or(at_ms, |last| last.max(at_ms)));

        let above = self.score >= self.params.elevation_threshold;
        match self.state {
            StruggleState::Accumulating if above => self.open_episode(at_ms),
            StruggleState::Intervened => {
                let cooled = self
                    .intervened_ms
                    .is_some_and(|t| at_ms - t >= self.params.cooldown_ms);
                if !cooled {
                    None
                } else if above {
                    self.open_episode(at_ms)
                } else {
                    self.state = StruggleState::Accumulating;
                    None
                }
            }
            _ => None,
        }
    }

    fn open_episode(&mut self, at_ms: i64) -> Option<StruggleTrigger> {
        self.state = StruggleState::Elevated;
        self.episodes += 1;
        Some(StruggleTrigger {
            score: self.score,
            at_ms,
            episode: self.episodes,
        })
    }

    pub fn mark_intervened(&mut self, at_ms: i64) {
        if self.state == StruggleState::Elevated {
            self.state = StruggleState::Intervened;
            self.intervened_ms = Some(at_ms);
            self.intervention_fired = true;
        }
    }

    pub fn resolve(&mut self, at_ms: i64, reason: ResolveReason) {
        if self.state == StruggleState::Resolved {
            return;
        }
        self.state = StruggleState::Resolved;
        self.resolved_ms = Some(at_ms);
        self.resolve_reason = Some(reason);
    }

    /// Resolves the session if it has outlived the maximum duration.
    pub fn check_expiry(&mut self, now_ms: i64) -> bool {
        match self.started_ms {
            Some(started)
                if self.state != StruggleState::Resolved
                    && now_ms - started >= self.params.max_session_ms =>
            {
                self.resolve(now_ms, ResolveReason::MaxDuration);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognitive::types::{ContentType, ReviewSubmission};

    const T0: i64 = 1_700_000_000_000;

    fn detector() -> StruggleDetector {
        StruggleDetector::new(StruggleParams::default())
    }

    fn review(correct: bool) -> InteractionSignal {
        InteractionSignal::ReviewSubmitted(ReviewSubmission {
            review_id: None,
            item_id: "q1".into(),
            content_type: ContentType::Textual,
            correct,
            latency_ms: 3_000,
            hint_count: 0,
        })
    }

    #[test]
    fn test_first_signal_moves_to_accumulating() {
        let mut d = detector();
        assert_eq!(d.state(), StruggleState::Idle);
        d.apply(T0, &InteractionSignal::KeystrokeBurst { keys: 3 });
        assert_eq!(d.state(), StruggleState::Accumulating);
        assert_eq!(d.raw_score(), 0.0);
    }

    #[test]
    fn test_short_hover_contributes_nothing() {
        let mut d = detector();
        d.apply(T0, &InteractionSignal::Hover { duration_ms: 29_999 });
        assert_eq!(d.raw_score(), 0.0);
        d.apply(T0 + 1, &InteractionSignal::Hover { duration_ms: 30_000 });
        assert!((d.raw_score() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_scroll_weighs_more() {
        let mut d = detector();
        d.apply(T0, &InteractionSignal::ScrollReversal { count: 1 });
        let first = d.raw_score();
        d.apply(T0 + 2_000, &InteractionSignal::ScrollReversal { count: 1 });
        let second = d.raw_score() - first;
        assert!((first - 0.05).abs() < 1e-9);
        assert!((second - 0.20).abs() < 1e-9);
    }

    #[test]
    fn test_idle_gap_is_capped() {
        let mut d = detector();
        d.apply(T0, &InteractionSignal::IdleGap { gap_ms: 600_000 });
        assert!((d.raw_score() - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_elevation_emits_single_trigger() {
        let mut d = detector();
        let mut triggers = Vec::new();
        for i in 0..6 {
            if let Some(t) = d.apply(T0 + i * 1_000, &InteractionSignal::Hover { duration_ms: 45_000 }) {
                triggers.push(t);
                d.mark_intervened(T0 + i * 1_000);
            }
        }
        assert_eq!(triggers.len(), 1);
        assert_eq!(d.state(), StruggleState::Intervened);
        assert!(d.intervention_fired());
        assert!(triggers[0].score >= 1.0);
    }

    #[test]
    fn test_cooldown_allows_new_episode() {
        let mut d = detector();
        for i in 0..3 {
            if d.apply(T0 + i, &InteractionSignal::Hover { duration_ms: 45_000 }).is_some() {
                d.mark_intervened(T0 + i);
            }
        }
        assert_eq!(d.state(), StruggleState::Intervened);

        // Inside the cooldown: no trigger even with a high score.
        let inside = T0 + 60_000;
        for i in 0..4 {
            assert!(d
                .apply(inside + i, &InteractionSignal::Hover { duration_ms: 45_000 })
                .is_none());
        }

        // After the cooldown, still above threshold: a new episode opens.
        let after = T0 + 300_000 + 60_000;
        let mut reopened = None;
        for i in 0..4 {
            if let Some(t) = d.apply(after + i, &InteractionSignal::Hover { duration_ms: 45_000 }) {
                reopened = Some(t);
                break;
            }
        }
        let trigger = reopened.expect("new episode after cooldown");
        assert_eq!(trigger.episode, 2);
    }

    #[test]
    fn test_score_decays_after_debounce() {
        let mut d = detector();
        d.apply(T0, &InteractionSignal::Hover { duration_ms: 40_000 });
        let score = d.raw_score();
        assert_eq!(d.score_at(T0 + 15_000), score);
        let one_half_life = d.score_at(T0 + 30_000);
        assert!((one_half_life - score / 2.0).abs() < 1e-9);
        assert!(d.score_at(T0 + 15 * 60_000) < 1e-6);
    }

    #[test]
    fn test_correct_answer_resolves() {
        let mut d = detector();
        d.apply(T0, &review(false));
        assert!((d.raw_score() - 0.25).abs() < 1e-9);
        d.apply(T0 + 1_000, &review(true));
        assert_eq!(d.state(), StruggleState::Resolved);
        assert_eq!(d.resolve_reason(), Some(ResolveReason::CorrectAnswer));
        assert!(d.apply(T0 + 2_000, &InteractionSignal::Hover { duration_ms: 90_000 }).is_none());
    }

    #[test]
    fn test_max_duration_resolves() {
        let mut d = detector();
        d.apply(T0, &InteractionSignal::KeystrokeBurst { keys: 1 });
        d.apply(T0 + 2_700_000, &InteractionSignal::Hover { duration_ms: 45_000 });
        assert_eq!(d.state(), StruggleState::Resolved);
        assert_eq!(d.resolve_reason(), Some(ResolveReason::MaxDuration));
    }

    #[test]
    fn test_elevated_can_resolve_on_session_end() {
        let mut d = detector();
        for i in 0..3 {
            d.apply(T0 + i, &InteractionSignal::Hover { duration_ms: 45_000 });
        }
        assert_eq!(d.state(), StruggleState::Elevated);
        d.resolve(T0 + 10, ResolveReason::SessionEnded);
        assert_eq!(d.state(), StruggleState::Resolved);
    }
}

//! Fuzzy difficulty controller.
//!
//! Three inputs are computed over the trailing window of attempts: accuracy
//! (relative to the content type's success band), mean latency relative to a
//! target, and hints per attempt. Rule strengths are combined into a crisp
//! output in `[-1, 1]` by weighted centroid over the singletons
//! easier = -1, hold = 0, harder = +1. A direction must be seen on several
//! consecutive evaluations before the level moves by one step.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::cognitive::config::{DifficultyParams, SuccessBand};
use crate::cognitive::types::ContentType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub correct: bool,
    pub latency_ms: u64,
    pub hint_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Easier,
    Hold,
    Harder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyState {
    pub level: f64,
    pub window: VecDeque<Attempt>,
    pub pending: Direction,
    pub streak: u32,
    pub adjustments: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyReading {
    pub accuracy: f64,
    pub latency_ratio: f64,
    pub hint_rate: f64,
    pub output: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyAdjustment {
    pub content_type: ContentType,
    pub delta: f64,
    pub level: f64,
    pub direction: Direction,
    pub rolling_accuracy: f64,
}

fn ramp(x: f64, zero_at: f64, one_at: f64) -> f64 {
    if (one_at - zero_at).abs() < f64::EPSILON {
        return if x >= one_at { 1.0 } else { 0.0 };
    }
    ((x - zero_at) / (one_at - zero_at)).clamp(0.0, 1.0)
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
pub struct DifficultyController {
    params: DifficultyParams,
}

impl DifficultyController {
    pub fn new(params: DifficultyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    pub fn initial_state(&self) -> DifficultyState {
        DifficultyState {
            level: self.params.initial_level,
            window: VecDeque::with_capacity(self.params.window_size),
            pending: Direction::Hold,
            streak: 0,
            adjustments: 0,
        }
    }

    pub fn rolling_accuracy(state: &DifficultyState) -> Option<f64> {
        if state.window.is_empty() {
            return None;
        }
        let correct = state.window.iter().filter(|a| a.correct).count();
        Some(correct as f64 / state.window.len() as f64)
    }

    /// Reads the fuzzy controller over the current window. `None` until the
    /// window holds enough attempts.
    pub fn evaluate(&self, state: &DifficultyState, content_type: ContentType) -> Option<FuzzyReading> {
        let p = &self.params;
        if state.window.len() < p.min_attempts.max(1) {
            return None;
        }
        let n = state.window.len() as f64;
        let accuracy = Self::rolling_accuracy(state)?;
        let latency_ratio = state.window.iter().map(|a| a.latency_ms as f64).sum::<f64>()
            / n
            / p.target_latency_ms.max(1.0);
        let hint_rate = state.window.iter().map(|a| f64::from(a.hint_count)).sum::<f64>() / n;

        let output = self.infer(p.band_for(content_type), accuracy, latency_ratio, hint_rate);
        let direction = if output >= p.dead_zone {
            Direction::Harder
        } else if output <= -p.dead_zone {
            Direction::Easier
        } else {
            Direction::Hold
        };

        Some(FuzzyReading {
            accuracy,
            latency_ratio,
            hint_rate,
            output,
            direction,
        })
    }

    fn infer(&self, band: SuccessBand, accuracy: f64, latency_ratio: f64, hint_rate: f64) -> f64 {
        let p = &self.params;

        let low = ramp(accuracy, band.lower, band.lower - p.band_shoulder);
        let high = ramp(accuracy, band.upper, band.upper + p.band_shoulder);
        let ok = 1.0 - low.max(high);

        let slow = ramp(latency_ratio, 1.0, 2.0);
        let heavy = ramp(hint_rate, 0.0, p.heavy_hint_rate);
        let light = 1.0 - heavy;

        let harder = high.min(1.0 - slow).min(light);
        let easier = low.max(slow.min(heavy));
        let hold = ok.max(high.min(slow));

        let total = harder + easier + hold;
        if total <= f64::EPSILON {
            return 0.0;
        }
        (harder - easier) / total
    }

    /// Adds one attempt and returns an adjustment when a sustained direction
    /// moves the level.
    pub fn record(
        &self,
        state: &mut DifficultyState,
        content_type: ContentType,
        attempt: Attempt,
    ) -> Option<DifficultyAdjustment> {
        let p = &self.params;
        state.window.push_back(attempt);
        while state.window.len() > p.window_size.max(1) {
            state.window.pop_front();
        }

        let reading = self.evaluate(state, content_type)?;

        if reading.direction == state.pending {
            state.streak = state.streak.saturating_add(1);
        } else {
            state.pending = reading.direction;
            state.streak = 1;
        }

        if state.pending == Direction::Hold || state.streak < p.sustain_evaluations.max(1) {
            return None;
        }

        let signed = match state.pending {
            Direction::Harder => p.step,
            Direction::Easier => -p.step,
            Direction::Hold => 0.0,
        };
        let level = round4((state.level + signed).clamp(p.min_level, p.max_level));
        let delta = round4(level - state.level);

        state.window.clear();
        state.pending = Direction::Hold;
        state.streak = 0;

        if delta == 0.0 {
            return None;
        }

        state.level = level;
        state.adjustments = state.adjustments.saturating_add(1);

        Some(DifficultyAdjustment {
            content_type,
            delta,
            level,
            direction: reading.direction,
            rolling_accuracy: reading.accuracy,
        })
    }
}

impl Default for DifficultyController {
    fn default() -> Self {
        Self::new(DifficultyParams::default())
    }
}

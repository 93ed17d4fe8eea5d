//! Forgetting-curve estimator.
//!
//! Retention is modelled as `R(t) = exp(-t / s)` with `s` the stability in
//! hours for one (learner, content type). Each review with a known elapsed
//! time nudges `ln s` along the gradient of the Bernoulli log-likelihood.

use serde::{Deserialize, Serialize};

use crate::cognitive::config::EstimatorParams;
use crate::cognitive::types::ContentType;

const MIN_FAILURE_PROB: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryModel {
    pub stability_hours: f64,
    /// Reviews that carried an elapsed time and therefore moved `s`.
    pub observations: u32,
    pub reviews: u32,
    /// EMA of the per-observation change in `ln s`.
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StabilityEstimate {
    #[serde(rename_all = "camelCase")]
    Fitted {
        stability_hours: f64,
        observations: u32,
    },
    #[serde(rename_all = "camelCase")]
    Underfit {
        default_hours: f64,
        observations: u32,
    },
}

impl StabilityEstimate {
    pub fn stability_hours(&self) -> f64 {
        match self {
            Self::Fitted { stability_hours, .. } => *stability_hours,
            Self::Underfit { default_hours, .. } => *default_hours,
        }
    }

    pub fn is_underfit(&self) -> bool {
        matches!(self, Self::Underfit { .. })
    }
}

pub fn retention(stability_hours: f64, elapsed_hours: f64) -> f64 {
    if stability_hours <= 0.0 {
        return 0.0;
    }
    (-elapsed_hours.max(0.0) / stability_hours).exp()
}

#[derive(Debug, Clone)]
pub struct ForgettingCurveEstimator {
    params: EstimatorParams,
}

impl ForgettingCurveEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    pub fn default_stability(&self, content_type: ContentType) -> f64 {
        self.params
            .population_stability_hours
            .get(content_type)
            .clamp(self.params.min_stability_hours, self.params.max_stability_hours)
    }

    pub fn initial_model(&self, content_type: ContentType) -> CategoryModel {
        CategoryModel {
            stability_hours: self.default_stability(content_type),
            observations: 0,
            reviews: 0,
            velocity: 0.0,
        }
    }

    pub fn estimate(&self, model: &CategoryModel, content_type: ContentType) -> StabilityEstimate {
        if model.observations < self.params.min_observations {
            StabilityEstimate::Underfit {
                default_hours: self.default_stability(content_type),
                observations: model.observations,
            }
        } else {
            StabilityEstimate::Fitted {
                stability_hours: model.stability_hours,
                observations: model.observations,
            }
        }
    }

    fn learning_rate(&self, observations: u32) -> f64 {
        let p = &self.params;
        let decayed = p.learning_rate / (1.0 + f64::from(observations) / p.learning_rate_decay.max(1e-9));
        decayed.max(p.min_learning_rate)
    }

    /// Folds one review into the model. `elapsed_hours` is the time since the
    /// previous exposure of the same item; first exposures carry `None` and
    /// only count as a review.
    pub fn observe(
        &self,
        model: &mut CategoryModel,
        content_type: ContentType,
        elapsed_hours: Option<f64>,
        correct: bool,
    ) -> StabilityEstimate {
        model.reviews = model.reviews.saturating_add(1);

        let Some(elapsed) = elapsed_hours.filter(|t| t.is_finite() && *t > 0.0) else {
            return self.estimate(model, content_type);
        };

        let p = &self.params;
        let s = model
            .stability_hours
            .clamp(p.min_stability_hours, p.max_stability_hours);
        let ratio = elapsed / s;
        let predicted = retention(s, elapsed);

        // d/d(ln s) of the log-likelihood: t/s on success, -t/s * R/(1-R) on failure.
        let gradient = if correct {
            ratio
        } else {
            -ratio * predicted / (1.0 - predicted).max(MIN_FAILURE_PROB)
        };

        let step = (self.learning_rate(model.observations) * gradient)
            .clamp(-p.max_log_step, p.max_log_step);
        let updated = (s * step.exp()).clamp(p.min_stability_hours, p.max_stability_hours);

        let realised = (updated / s).ln();
        model.velocity = (1.0 - p.velocity_smoothing) * model.velocity + p.velocity_smoothing * realised;
        model.stability_hours = updated;
        model.observations = model.observations.saturating_add(1);

        self.estimate(model, content_type)
    }
}

impl Default for ForgettingCurveEstimator {
    fn default() -> Self {
        Self::new(EstimatorParams::default())
    }
}

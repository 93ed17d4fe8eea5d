use serde::{Deserialize, Serialize};

use crate::cognitive::types::ContentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerParams {
    pub max_future_skew_ms: i64,
    pub max_hover_ms: u64,
    pub max_idle_gap_ms: u64,
    pub max_scroll_reversals: u32,
    pub max_keystroke_burst: u32,
    pub max_latency_ms: u64,
    pub max_hint_count: u32,
}

impl Default for NormalizerParams {
    fn default() -> Self {
        Self {
            max_future_skew_ms: 60_000,
            max_hover_ms: 3_600_000,
            max_idle_gap_ms: 86_400_000,
            max_scroll_reversals: 1_000,
            max_keystroke_burst: 10_000,
            max_latency_ms: 3_600_000,
            max_hint_count: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StruggleParams {
    pub hover_threshold_ms: u64,
    pub hover_increment: f64,
    pub scroll_increment: f64,
    pub repeated_scroll_increment: f64,
    pub scroll_repeat_window_ms: i64,
    pub idle_rate_per_sec: f64,
    pub idle_increment_cap: f64,
    pub keystroke_burst_threshold: u32,
    pub keystroke_increment: f64,
    pub incorrect_answer_increment: f64,
    pub score_ceiling: f64,
    pub elevation_threshold: f64,
    pub debounce_window_ms: i64,
    pub half_life_ms: i64,
    pub cooldown_ms: i64,
    pub max_session_ms: i64,
}

impl Default for StruggleParams {
    fn default() -> Self {
        Self {
            hover_threshold_ms: 30_000,
            hover_increment: 0.45,
            scroll_increment: 0.05,
            repeated_scroll_increment: 0.20,
            scroll_repeat_window_ms: 10_000,
            idle_rate_per_sec: 0.01,
            idle_increment_cap: 0.35,
            keystroke_burst_threshold: 25,
            keystroke_increment: 0.05,
            incorrect_answer_increment: 0.25,
            score_ceiling: 3.0,
            elevation_threshold: 1.0,
            debounce_window_ms: 15_000,
            half_life_ms: 15_000,
            cooldown_ms: 300_000,
            max_session_ms: 2_700_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub mailbox_capacity: usize,
    pub reorder_hold_ms: u64,
    pub dedupe_capacity: usize,
    pub idle_timeout_ms: u64,
    pub resolved_grace_ms: u64,
    pub delivery_retry_delay_ms: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            reorder_hold_ms: 250,
            dedupe_capacity: 256,
            idle_timeout_ms: 600_000,
            resolved_grace_ms: 60_000,
            delivery_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationStability {
    pub visual: f64,
    pub textual: f64,
    pub mathematical: f64,
    pub procedural: f64,
}

impl PopulationStability {
    pub fn get(&self, content_type: ContentType) -> f64 {
        match content_type {
            ContentType::Visual => self.visual,
            ContentType::Textual => self.textual,
            ContentType::Mathematical => self.mathematical,
            ContentType::Procedural => self.procedural,
        }
    }
}

impl Default for PopulationStability {
    fn default() -> Self {
        Self {
            visual: 960.0,
            textual: 720.0,
            mathematical: 480.0,
            procedural: 1200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorParams {
    pub population_stability_hours: PopulationStability,
    pub min_stability_hours: f64,
    pub max_stability_hours: f64,
    pub min_observations: u32,
    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub min_learning_rate: f64,
    pub max_log_step: f64,
    pub velocity_smoothing: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            population_stability_hours: PopulationStability::default(),
            min_stability_hours: 6.0,
            max_stability_hours: 4320.0,
            min_observations: 3,
            learning_rate: 0.5,
            learning_rate_decay: 20.0,
            min_learning_rate: 0.004,
            max_log_step: 0.5,
            velocity_smoothing: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerParams {
    pub base_interval_hours: f64,
    pub growth_factor: f64,
    pub contraction_factor: f64,
    pub min_gap_hours: f64,
    pub max_horizon_hours: f64,
    pub retention_floor: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            base_interval_hours: 36.0,
            growth_factor: 1.3,
            contraction_factor: 0.6,
            min_gap_hours: 24.0,
            max_horizon_hours: 2880.0,
            retention_floor: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessBand {
    pub lower: f64,
    pub upper: f64,
}

impl SuccessBand {
    pub fn contains(&self, accuracy: f64) -> bool {
        accuracy >= self.lower && accuracy <= self.upper
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyParams {
    pub conceptual_band: SuccessBand,
    pub procedural_band: SuccessBand,
    pub window_size: usize,
    pub min_attempts: usize,
    pub sustain_evaluations: u32,
    pub step: f64,
    pub band_shoulder: f64,
    pub dead_zone: f64,
    pub target_latency_ms: f64,
    pub heavy_hint_rate: f64,
    pub initial_level: f64,
    pub min_level: f64,
    pub max_level: f64,
}

impl Default for DifficultyParams {
    fn default() -> Self {
        Self {
            conceptual_band: SuccessBand { lower: 0.70, upper: 0.80 },
            procedural_band: SuccessBand { lower: 0.72, upper: 0.80 },
            window_size: 20,
            min_attempts: 10,
            sustain_evaluations: 3,
            step: 0.05,
            band_shoulder: 0.05,
            dead_zone: 0.1,
            target_latency_ms: 10_000.0,
            heavy_hint_rate: 1.5,
            initial_level: 0.5,
            min_level: 0.05,
            max_level: 0.95,
        }
    }
}

impl DifficultyParams {
    pub fn band_for(&self, content_type: ContentType) -> SuccessBand {
        if content_type.is_conceptual() {
            self.conceptual_band
        } else {
            self.procedural_band
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    SingleWindow,
    FullWindow,
}

impl RecoveryPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "single-window" | "single" => Some(Self::SingleWindow),
            "full-window" | "full" => Some(Self::FullWindow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    pub window_weeks: usize,
    pub early_weeks: u32,
    pub early_weight: f64,
    pub sustain_weight: f64,
    pub engagement_floor: f64,
    pub success_floor: f64,
    pub time_on_task_ratio_floor: f64,
    pub recovery: RecoveryPolicy,
    pub history_limit: usize,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            window_weeks: 5,
            early_weeks: 6,
            early_weight: 2.0,
            sustain_weight: 5.0,
            engagement_floor: 0.60,
            success_floor: 0.65,
            time_on_task_ratio_floor: 0.50,
            recovery: RecoveryPolicy::FullWindow,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileParams {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub normalizer: NormalizerParams,
    pub struggle: StruggleParams,
    pub session: SessionParams,
    pub estimator: EstimatorParams,
    pub scheduler: SchedulerParams,
    pub difficulty: DifficultyParams,
    pub risk: RiskParams,
    pub profile: ProfileParams,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("COGNITIVE_STRUGGLE_THRESHOLD") {
            config.struggle.elevation_threshold = val;
        }
        if let Some(val) = env_parse("COGNITIVE_STRUGGLE_HALF_LIFE_MS") {
            config.struggle.half_life_ms = val;
        }
        if let Some(val) = env_parse("COGNITIVE_STRUGGLE_DEBOUNCE_MS") {
            config.struggle.debounce_window_ms = val;
        }
        if let Some(val) = env_parse("COGNITIVE_INTERVENTION_COOLDOWN_MS") {
            config.struggle.cooldown_ms = val;
        }
        if let Some(val) = env_parse("COGNITIVE_SESSION_IDLE_TIMEOUT_MS") {
            config.session.idle_timeout_ms = val;
        }
        if let Some(val) = env_parse("COGNITIVE_RETENTION_FLOOR") {
            config.scheduler.retention_floor = val;
        }
        if let Some(val) = env_parse("COGNITIVE_MIN_GAP_HOURS") {
            config.scheduler.min_gap_hours = val;
        }
        if let Some(val) = env_parse("COGNITIVE_MAX_HORIZON_HOURS") {
            config.scheduler.max_horizon_hours = val;
        }
        if let Some(val) = env_parse("COGNITIVE_CONCEPTUAL_BAND_LOWER") {
            config.difficulty.conceptual_band.lower = val;
        }
        if let Some(val) = env_parse("COGNITIVE_CONCEPTUAL_BAND_UPPER") {
            config.difficulty.conceptual_band.upper = val;
        }
        if let Some(val) = env_parse("COGNITIVE_PROCEDURAL_BAND_LOWER") {
            config.difficulty.procedural_band.lower = val;
        }
        if let Some(val) = env_parse("COGNITIVE_PROCEDURAL_BAND_UPPER") {
            config.difficulty.procedural_band.upper = val;
        }
        if let Some(val) = env_parse("COGNITIVE_ENGAGEMENT_FLOOR") {
            config.risk.engagement_floor = val;
        }
        if let Some(val) = env_parse("COGNITIVE_SUCCESS_FLOOR") {
            config.risk.success_floor = val;
        }
        if let Ok(val) = std::env::var("COGNITIVE_RISK_RECOVERY") {
            if let Some(policy) = RecoveryPolicy::parse(&val) {
                config.risk.recovery = policy;
            }
        }
        if let Some(val) = env_parse("COGNITIVE_PROFILE_MAX_RETRIES") {
            config.profile.max_retries = val;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

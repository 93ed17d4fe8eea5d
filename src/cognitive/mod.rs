pub mod config;
pub mod delivery;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod metrics;
pub mod normalizer;
pub mod profile;
pub mod risk;
pub mod scheduler;
pub mod session;
pub mod struggle;
pub mod types;

pub use config::EngineConfig;
pub use delivery::{AlertSink, DeliveryError, EngineEvent, EventBus, InterventionSink, WebhookSink};
pub use engine::{
    CognitiveEngine, EngineBuilder, IngestAck, NoPeerBaseline, PeerBaseline, ProfileView,
    ReviewOutcome, SessionEndSummary, StaticPeerBaseline, SweepReport,
};
pub use error::{EngineError, EngineResult};
pub use estimator::StabilityEstimate;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use normalizer::SignalRejection;
pub use profile::{LearnerProfile, MemoryProfileStore, ProfileSnapshot, ProfileStore, StoreError};
pub use session::SessionSnapshot;
pub use struggle::StruggleState;
pub use types::*;

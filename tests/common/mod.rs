#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;

use cognitive_engine::cognitive::{
    AlertSink, CognitiveEngine, DeliveryError, EngineConfig, InterventionEvent, InterventionSink,
    RiskAlert,
};
use cognitive_engine::state::AppState;

/// Captures everything the engine hands to its external collaborators.
#[derive(Default)]
pub struct RecordingSink {
    pub interventions: Mutex<Vec<InterventionEvent>>,
    pub alerts: Mutex<Vec<RiskAlert>>,
}

#[async_trait]
impl InterventionSink for RecordingSink {
    async fn deliver(&self, event: &InterventionEvent) -> Result<(), DeliveryError> {
        self.interventions.lock().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn publish(&self, alert: &RiskAlert) -> Result<(), DeliveryError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

pub fn engine_with(config: EngineConfig) -> (Arc<CognitiveEngine>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let engine = CognitiveEngine::builder(config)
        .intervention_sink(Arc::clone(&sink) as Arc<dyn InterventionSink>)
        .alert_sink(Arc::clone(&sink) as Arc<dyn AlertSink>)
        .build();
    (Arc::new(engine), sink)
}

pub fn test_engine() -> (Arc<CognitiveEngine>, Arc<RecordingSink>) {
    engine_with(EngineConfig::default())
}

pub fn create_test_app() -> (Router, Arc<CognitiveEngine>) {
    let (engine, _) = test_engine();
    let app = cognitive_engine::create_app(AppState::new(Arc::clone(&engine), "memory"));
    (app, engine)
}

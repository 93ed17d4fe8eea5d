use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cognitive::difficulty::DifficultyAdjustment;
use crate::cognitive::error::EngineError;
use crate::cognitive::metrics::EngineMetrics;
use crate::cognitive::risk::RiskTransition;
use crate::cognitive::types::{InterventionEvent, RiskAlert};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("collaborator answered {0}")]
    Status(u16),
    #[error("channel closed")]
    ChannelClosed,
}

/// Everything the engine announces to in-process listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    #[serde(rename = "INTERVENTION_TRIGGERED")]
    InterventionTriggered(InterventionEvent),

    #[serde(rename = "RISK_ALERT_OPENED")]
    RiskAlertOpened(RiskAlert),

    #[serde(rename = "RISK_ALERT_CLOSED")]
    RiskAlertClosed(RiskAlert),

    #[serde(rename = "DIFFICULTY_ADJUSTED", rename_all = "camelCase")]
    DifficultyAdjusted {
        learner_id: String,
        adjustment: DifficultyAdjustment,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InterventionTriggered(_) => "INTERVENTION_TRIGGERED",
            Self::RiskAlertOpened(_) => "RISK_ALERT_OPENED",
            Self::RiskAlertClosed(_) => "RISK_ALERT_CLOSED",
            Self::DifficultyAdjusted { .. } => "DIFFICULTY_ADJUSTED",
        }
    }

    pub fn learner_id(&self) -> &str {
        match self {
            Self::InterventionTriggered(e) => &e.learner_id,
            Self::RiskAlertOpened(a) | Self::RiskAlertClosed(a) => &a.learner_id,
            Self::DifficultyAdjusted { learner_id, .. } => learner_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "engine event published"),
            Err(_) => debug!(event_type, "engine event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// External chat/intervention collaborator.
#[async_trait]
pub trait InterventionSink: Send + Sync {
    async fn deliver(&self, event: &InterventionEvent) -> Result<(), DeliveryError>;
}

/// External dashboard collaborator fed with alert openings and closings.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &RiskAlert) -> Result<(), DeliveryError>;
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(resp.status().as_u16()))
        }
    }
}

#[async_trait]
impl InterventionSink for WebhookSink {
    async fn deliver(&self, event: &InterventionEvent) -> Result<(), DeliveryError> {
        self.post(event).await
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn publish(&self, alert: &RiskAlert) -> Result<(), DeliveryError> {
        self.post(alert).await
    }
}

/// Sends once, retries once after `delay`, then gives up with a warning.
pub async fn send_with_retry<F, Fut>(
    what: &'static str,
    delay: Duration,
    metrics: &EngineMetrics,
    mut send: F,
) -> Result<(), EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    match send().await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(what, error = %e, "delivery failed, retrying once"),
    }
    tokio::time::sleep(delay).await;
    match send().await {
        Ok(()) => Ok(()),
        Err(e) => {
            metrics.record_delivery_failure();
            warn!(what, error = %e, "delivery dropped after retry");
            Err(EngineError::DeliveryFailure(format!("{what}: {e}")))
        }
    }
}

/// Fans engine output out to the in-process bus and, when configured, to the
/// external collaborators. External sends run on their own task so callers
/// never wait on them.
#[derive(Clone)]
pub struct Notifier {
    bus: EventBus,
    interventions: Option<Arc<dyn InterventionSink>>,
    alerts: Option<Arc<dyn AlertSink>>,
    metrics: Arc<EngineMetrics>,
    retry_delay: Duration,
}

impl Notifier {
    pub fn new(bus: EventBus, metrics: Arc<EngineMetrics>, retry_delay: Duration) -> Self {
        Self {
            bus,
            interventions: None,
            alerts: None,
            metrics,
            retry_delay,
        }
    }

    pub fn with_intervention_sink(mut self, sink: Arc<dyn InterventionSink>) -> Self {
        self.interventions = Some(sink);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn intervention(&self, event: InterventionEvent) {
        self.metrics.record_intervention();
        self.bus.publish(EngineEvent::InterventionTriggered(event.clone()));

        let Some(sink) = self.interventions.clone() else {
            return;
        };
        let metrics = Arc::clone(&self.metrics);
        let delay = self.retry_delay;
        tokio::spawn(async move {
            let _ = send_with_retry("intervention", delay, &metrics, || sink.deliver(&event)).await;
        });
    }

    pub fn risk(&self, transition: &RiskTransition) {
        let alert = transition.alert().clone();
        match transition {
            RiskTransition::Opened(_) => {
                self.metrics.record_alert_opened();
                self.bus.publish(EngineEvent::RiskAlertOpened(alert.clone()));
            }
            RiskTransition::Closed(_) => {
                self.metrics.record_alert_closed();
                self.bus.publish(EngineEvent::RiskAlertClosed(alert.clone()));
            }
        }

        let Some(sink) = self.alerts.clone() else {
            return;
        };
        let metrics = Arc::clone(&self.metrics);
        let delay = self.retry_delay;
        tokio::spawn(async move {
            let _ = send_with_retry("risk-alert", delay, &metrics, || sink.publish(&alert)).await;
        });
    }

    pub fn difficulty(&self, learner_id: &str, adjustment: DifficultyAdjustment) {
        self.metrics.record_difficulty_adjustment();
        self.bus.publish(EngineEvent::DifficultyAdjusted {
            learner_id: learner_id.to_string(),
            adjustment,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event() -> InterventionEvent {
        InterventionEvent {
            learner_id: "ana".into(),
            context_id: "p1".into(),
            session_id: "s1".into(),
            triggered_at: Utc::now(),
            score: 1.35,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_single_failure() {
        let metrics = EngineMetrics::new();
        let calls = AtomicU32::new(0);
        let result = send_with_retry("intervention", Duration::from_millis(1), &metrics, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(DeliveryError::Status(503))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().delivery_failures, 0);
    }

    #[tokio::test]
    async fn test_second_failure_is_dropped_and_counted() {
        let metrics = EngineMetrics::new();
        let calls = AtomicU32::new(0);
        let result = send_with_retry("alert", Duration::from_millis(1), &metrics, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DeliveryError::ChannelClosed) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::DeliveryFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_event_bus_fans_out() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::InterventionTriggered(event()));

        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::InterventionTriggered(event()));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "INTERVENTION_TRIGGERED");
        assert_eq!(received.learner_id(), "ana");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(EngineEvent::InterventionTriggered(event())).unwrap();
        assert_eq!(json["type"], "INTERVENTION_TRIGGERED");
        assert_eq!(json["payload"]["learnerId"], "ana");
    }
}

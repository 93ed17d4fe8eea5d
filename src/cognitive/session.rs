//! Per-session actors.
//!
//! Each (learner, context) pair gets one task that owns its struggle detector.
//! Signals reach it through a bounded mailbox and sit in a short reorder
//! buffer so that a burst delivered out of order is applied by timestamp.
//! Once released, a signal older than the session watermark is rejected as
//! out of order and an exact replay is dropped as a duplicate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::cognitive::config::{SessionParams, StruggleParams};
use crate::cognitive::delivery::Notifier;
use crate::cognitive::error::{EngineError, EngineResult};
use crate::cognitive::metrics::EngineMetrics;
use crate::cognitive::normalizer::SignalRejection;
use crate::cognitive::struggle::{ResolveReason, StruggleDetector, StruggleState};
use crate::cognitive::types::{
    ms_to_datetime, now_ms, InterventionEvent, NormalizedSignal, SessionKey, SignalFingerprint,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub learner_id: String,
    pub context_id: String,
    pub session_id: String,
    pub state: StruggleState,
    pub score: f64,
    pub raw_score: f64,
    pub intervention_fired: bool,
    pub episodes: u32,
    pub generation: u32,
    pub applied: u64,
    pub buffered: usize,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub watermark_ms: Option<i64>,
    pub resolve_reason: Option<ResolveReason>,
}

#[derive(Debug)]
pub enum SessionCommand {
    Signal(NormalizedSignal),
    Flush(oneshot::Sender<SessionSnapshot>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    End {
        reason: ResolveReason,
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<F>(&self, make: F) -> Option<SessionSnapshot>
    where
        F: FnOnce(oneshot::Sender<SessionSnapshot>) -> SessionCommand,
    {
        let (tx, rx) = oneshot::channel();
        self.sender.send(make(tx)).await.ok()?;
        rx.await.ok()
    }
}

struct Buffered {
    arrival: u64,
    signal: NormalizedSignal,
}

struct SessionActor {
    key: SessionKey,
    session_id: String,
    params: SessionParams,
    struggle: StruggleParams,
    detector: StruggleDetector,
    generation: u32,
    buffer: Vec<Buffered>,
    arrivals: u64,
    flush_at: Option<Instant>,
    last_activity: Instant,
    resolved_at: Option<Instant>,
    watermark_ms: Option<i64>,
    watermark_at: Option<Instant>,
    seen: HashSet<SignalFingerprint>,
    seen_order: VecDeque<SignalFingerprint>,
    applied: u64,
    out_of_order: u64,
    duplicates: u64,
    metrics: Arc<EngineMetrics>,
    notifier: Notifier,
}

impl SessionActor {
    fn new(
        key: SessionKey,
        session_id: String,
        params: SessionParams,
        struggle: StruggleParams,
        metrics: Arc<EngineMetrics>,
        notifier: Notifier,
    ) -> Self {
        Self {
            key,
            session_id,
            detector: StruggleDetector::new(struggle.clone()),
            params,
            struggle,
            generation: 1,
            buffer: Vec::new(),
            arrivals: 0,
            flush_at: None,
            last_activity: Instant::now(),
            resolved_at: None,
            watermark_ms: None,
            watermark_at: None,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            applied: 0,
            out_of_order: 0,
            duplicates: 0,
            metrics,
            notifier,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<SessionCommand>) {
        debug!(learner_id = %self.key.learner_id, context_id = %self.key.context_id, "session actor started");
        loop {
            let idle_deadline = match self.resolved_at {
                Some(at) => at + Duration::from_millis(self.params.resolved_grace_ms),
                None => self.last_activity + Duration::from_millis(self.params.idle_timeout_ms),
            };
            let flush_at = self.flush_at;
            let expires_at = self.expiry_deadline();

            tokio::select! {
                command = mailbox.recv() => {
                    let Some(command) = command else { break };
                    if self.handle(command) {
                        break;
                    }
                }
                _ = sleep_until(flush_at.unwrap_or(idle_deadline)), if flush_at.is_some() => {
                    self.release();
                }
                _ = sleep_until(expires_at.unwrap_or(idle_deadline)), if expires_at.is_some() => {
                    self.release();
                    self.expire();
                }
                _ = sleep_until(idle_deadline) => {
                    if self.resolved_at.is_some() {
                        break;
                    }
                    self.release();
                    self.detector.resolve(now_ms(), ResolveReason::Timeout);
                    self.resolved_at = Some(Instant::now());
                    info!(learner_id = %self.key.learner_id, context_id = %self.key.context_id, "session timed out");
                }
            }
        }
        mailbox.close();
        debug!(learner_id = %self.key.learner_id, context_id = %self.key.context_id, "session actor stopped");
    }

    /// Signal time is assumed to advance with the local clock after the
    /// latest applied signal.
    fn expiry_deadline(&self) -> Option<Instant> {
        if self.resolved_at.is_some() {
            return None;
        }
        let started = self.detector.started_ms()?;
        let watermark = self.watermark_ms?;
        let applied_at = self.watermark_at?;
        let remaining = (started + self.detector.max_session_ms() - watermark).max(0);
        Some(applied_at + Duration::from_millis(remaining as u64))
    }

    fn expire(&mut self) {
        let (Some(watermark), Some(applied_at)) = (self.watermark_ms, self.watermark_at) else {
            return;
        };
        let at_ms = watermark + applied_at.elapsed().as_millis() as i64;
        if self.detector.check_expiry(at_ms) {
            self.resolved_at = Some(Instant::now());
            info!(learner_id = %self.key.learner_id, context_id = %self.key.context_id, "session reached max duration");
        }
    }

    /// Returns `true` when the actor should stop.
    fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Signal(signal) => {
                self.last_activity = Instant::now();
                self.arrivals += 1;
                self.buffer.push(Buffered {
                    arrival: self.arrivals,
                    signal,
                });
                if self.flush_at.is_none() {
                    self.flush_at = Some(Instant::now() + Duration::from_millis(self.params.reorder_hold_ms));
                }
                false
            }
            SessionCommand::Flush(reply) => {
                self.release();
                let _ = reply.send(self.snapshot());
                false
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                false
            }
            SessionCommand::End { reason, reply } => {
                self.release();
                self.detector.resolve(now_ms(), reason);
                let _ = reply.send(self.snapshot());
                true
            }
        }
    }

    fn release(&mut self) {
        self.flush_at = None;
        if self.buffer.is_empty() {
            return;
        }
        let mut batch = std::mem::take(&mut self.buffer);
        batch.sort_by(|a, b| {
            a.signal
                .timestamp_ms
                .cmp(&b.signal.timestamp_ms)
                .then(a.arrival.cmp(&b.arrival))
        });
        for item in batch {
            self.apply(item.signal);
        }
    }

    fn remember(&mut self, fingerprint: SignalFingerprint) {
        self.seen.insert(fingerprint);
        self.seen_order.push_back(fingerprint);
        while self.seen_order.len() > self.params.dedupe_capacity.max(1) {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }

    fn apply(&mut self, signal: NormalizedSignal) {
        let ts = signal.timestamp_ms;
        let fingerprint = signal.signal.fingerprint(ts);

        if self.seen.contains(&fingerprint) {
            self.duplicates += 1;
            self.metrics.record_rejection(&SignalRejection::Duplicate);
            debug!(session_id = %self.session_id, ts, "duplicate signal ignored");
            return;
        }
        if let Some(watermark) = self.watermark_ms.filter(|w| ts < *w) {
            self.out_of_order += 1;
            let rejection = SignalRejection::OutOfOrder {
                timestamp_ms: ts,
                watermark_ms: watermark,
            };
            self.metrics.record_rejection(&rejection);
            debug!(session_id = %self.session_id, code = rejection.code(), reason = %rejection, "signal dropped");
            return;
        }

        self.remember(fingerprint);
        self.watermark_ms = Some(ts);
        self.watermark_at = Some(Instant::now());
        self.applied += 1;

        if self.detector.state() == StruggleState::Resolved {
            self.detector = StruggleDetector::new(self.struggle.clone());
            self.generation += 1;
            self.resolved_at = None;
            self.session_id = signal.session_id.clone();
        }

        if let Some(trigger) = self.detector.apply(ts, &signal.signal) {
            self.notifier.intervention(InterventionEvent {
                learner_id: self.key.learner_id.clone(),
                context_id: self.key.context_id.clone(),
                session_id: self.session_id.clone(),
                triggered_at: ms_to_datetime(trigger.at_ms),
                score: trigger.score,
            });
            self.detector.mark_intervened(ts);
            info!(
                learner_id = %self.key.learner_id,
                context_id = %self.key.context_id,
                score = trigger.score,
                episode = trigger.episode,
                "struggle intervention triggered"
            );
        }

        if self.detector.state() == StruggleState::Resolved && self.resolved_at.is_none() {
            self.resolved_at = Some(Instant::now());
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            learner_id: self.key.learner_id.clone(),
            context_id: self.key.context_id.clone(),
            session_id: self.session_id.clone(),
            state: self.detector.state(),
            score: self.detector.score_at(now_ms().max(self.watermark_ms.unwrap_or(0))),
            raw_score: self.detector.raw_score(),
            intervention_fired: self.detector.intervention_fired(),
            episodes: self.detector.episodes(),
            generation: self.generation,
            applied: self.applied,
            buffered: self.buffer.len(),
            out_of_order: self.out_of_order,
            duplicates: self.duplicates,
            watermark_ms: self.watermark_ms,
            resolve_reason: self.detector.resolve_reason(),
        }
    }
}

/// Routes signals to session actors, spawning one on first contact.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    params: SessionParams,
    struggle: StruggleParams,
    metrics: Arc<EngineMetrics>,
    notifier: Notifier,
}

impl SessionRegistry {
    pub fn new(
        params: SessionParams,
        struggle: StruggleParams,
        metrics: Arc<EngineMetrics>,
        notifier: Notifier,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            params,
            struggle,
            metrics,
            notifier,
        }
    }

    fn handle_for(&self, key: &SessionKey, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(key).filter(|h| !h.is_closed()) {
            return handle.clone();
        }

        let (sender, mailbox) = mpsc::channel(self.params.mailbox_capacity.max(1));
        let actor = SessionActor::new(
            key.clone(),
            session_id.to_string(),
            self.params.clone(),
            self.struggle.clone(),
            Arc::clone(&self.metrics),
            self.notifier.clone(),
        );
        tokio::spawn(actor.run(mailbox));

        let handle = SessionHandle { sender };
        sessions.insert(key.clone(), handle.clone());
        handle
    }

    fn existing(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.lock().get(key).cloned()
    }

    /// Queues a validated signal on its session. Waits when the mailbox is full.
    pub async fn dispatch(&self, signal: NormalizedSignal) -> EngineResult<()> {
        let key = signal.key.clone();
        let session_id = signal.session_id.clone();
        let handle = self.handle_for(&key, &session_id);
        match handle.sender.send(SessionCommand::Signal(signal)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(SessionCommand::Signal(signal))) => {
                // The actor stopped between lookup and send; start a fresh one.
                let handle = self.handle_for(&key, &session_id);
                handle
                    .sender
                    .send(SessionCommand::Signal(signal))
                    .await
                    .map_err(|_| EngineError::SessionClosed)
            }
            Err(_) => Err(EngineError::SessionClosed),
        }
    }

    /// Releases any buffered signals and returns the resulting state.
    pub async fn flush(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let handle = self.existing(key)?;
        handle.request(SessionCommand::Flush).await
    }

    pub async fn snapshot(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let handle = self.existing(key)?;
        handle.request(SessionCommand::Snapshot).await
    }

    /// Tears the session down. The actor applies what it holds, resolves and exits.
    pub async fn end(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let handle = self.sessions.lock().remove(key)?;
        handle
            .request(|reply| SessionCommand::End {
                reason: ResolveReason::SessionEnded,
                reply,
            })
            .await
    }

    /// Ends every session of a learner, for deletion.
    pub async fn end_learner(&self, learner_id: &str) -> usize {
        let keys: Vec<SessionKey> = self
            .sessions
            .lock()
            .keys()
            .filter(|k| k.learner_id == learner_id)
            .cloned()
            .collect();
        let mut ended = 0;
        for key in keys {
            if self.end(&key).await.is_some() {
                ended += 1;
            }
        }
        ended
    }

    /// Ends every live session; used on process shutdown.
    pub async fn shutdown(&self) -> usize {
        let keys: Vec<SessionKey> = self.sessions.lock().keys().cloned().collect();
        let mut ended = 0;
        for key in keys {
            if self.end(&key).await.is_some() {
                ended += 1;
            }
        }
        ended
    }

    /// Drops handles of actors that have exited.
    pub fn reap(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_closed());
        before - sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().values().filter(|h| !h.is_closed()).count()
    }
}

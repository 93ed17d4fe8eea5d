use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};

use cognitive_engine::cognitive::struggle::StruggleDetector;
use cognitive_engine::cognitive::{
    now_ms, EngineConfig, InteractionSignal, RawEvent, StruggleState,
};

mod common;

fn held_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.session.reorder_hold_ms = 60_000;
    config
}

fn signal_for(i: u64) -> (&'static str, Value, InteractionSignal) {
    match i % 4 {
        0 => ("hover", json!(31_000 + i), InteractionSignal::Hover { duration_ms: 31_000 + i }),
        1 => ("scroll-reversal", json!(1), InteractionSignal::ScrollReversal { count: 1 }),
        2 => ("idle-gap", json!(20_000), InteractionSignal::IdleGap { gap_ms: 20_000 }),
        _ => ("keystroke-burst", json!(30), InteractionSignal::KeystrokeBurst { keys: 30 }),
    }
}

fn raw(kind: &str, value: Value, timestamp: i64) -> RawEvent {
    RawEvent {
        session_id: "sess-1".into(),
        learner_id: "ivy".into(),
        context_id: "lesson-3".into(),
        kind: kind.into(),
        value,
        timestamp,
    }
}

#[tokio::test]
async fn test_shuffled_burst_matches_sequential_application() {
    let (engine, _) = common::engine_with(held_config());
    let base = now_ms() - 300_000;

    let mut ordered: Vec<(i64, &'static str, Value, InteractionSignal)> = (0..50u64)
        .map(|i| {
            let (kind, value, signal) = signal_for(i);
            (base + i as i64 * 4_000, kind, value, signal)
        })
        .collect();

    let mut arrivals: Vec<RawEvent> = ordered
        .iter()
        .map(|(ts, kind, value, _)| raw(kind, value.clone(), *ts))
        .collect();
    // Ten exact replays ride along with the burst.
    let replays: Vec<RawEvent> = arrivals.iter().step_by(5).cloned().collect();
    arrivals.extend(replays);
    arrivals.shuffle(&mut StdRng::seed_from_u64(7));

    for event in arrivals {
        let ack = engine.ingest(event).await;
        assert!(ack.accepted, "{:?}", ack.code);
    }

    let snapshot = engine.flush_session("ivy", "lesson-3").await.unwrap();

    let mut reference = StruggleDetector::new(engine.config().struggle.clone());
    ordered.sort_by_key(|(ts, ..)| *ts);
    for (ts, _, _, signal) in &ordered {
        if reference.apply(*ts, signal).is_some() {
            reference.mark_intervened(*ts);
        }
    }

    assert_eq!(snapshot.applied, 50);
    assert_eq!(snapshot.duplicates, 10);
    assert_eq!(snapshot.out_of_order, 0);
    assert_eq!(snapshot.state, reference.state());
    assert_eq!(snapshot.episodes, reference.episodes());
    assert!((snapshot.raw_score - reference.raw_score()).abs() < 1e-9);
    assert_eq!(snapshot.intervention_fired, reference.intervention_fired());
    assert_eq!(engine.metrics().snapshot().duplicate_signals, 10);
}

#[tokio::test]
async fn test_late_signal_after_release_is_out_of_order() {
    let (engine, _) = common::engine_with(held_config());
    let base = now_ms() - 60_000;

    engine.ingest(raw("keystroke-burst", json!(30), base + 10_000)).await;
    engine.flush_session("ivy", "lesson-3").await.unwrap();

    let ack = engine.ingest(raw("keystroke-burst", json!(30), base)).await;
    assert!(ack.accepted);
    let snapshot = engine.flush_session("ivy", "lesson-3").await.unwrap();

    assert_eq!(snapshot.applied, 1);
    assert_eq!(snapshot.out_of_order, 1);
    assert_eq!(snapshot.watermark_ms, Some(base + 10_000));
    assert_eq!(engine.metrics().snapshot().rejected_out_of_order, 1);
}

#[tokio::test]
async fn test_sustained_struggle_fires_one_intervention() {
    let (engine, sink) = common::engine_with(held_config());
    let base = now_ms() - 120_000;

    for i in 0..6 {
        engine
            .ingest(raw("hover", json!(40_000), base + i * 2_000))
            .await;
    }
    let snapshot = engine.flush_session("ivy", "lesson-3").await.unwrap();
    assert_eq!(snapshot.state, StruggleState::Intervened);
    assert_eq!(snapshot.episodes, 1);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let delivered = sink.interventions.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].learner_id, "ivy");
    assert_eq!(delivered[0].context_id, "lesson-3");
    assert_eq!(engine.metrics().snapshot().interventions_emitted, 1);
}

#[tokio::test]
async fn test_review_signal_updates_schedule_and_resolves_session() {
    let (engine, _) = common::engine_with(held_config());
    let at = now_ms() - 5_000;

    let ack = engine
        .ingest(raw(
            "review-submitted",
            json!({"itemId": "verb-1", "contentType": "procedural", "correct": true, "latencyMs": 3000}),
            at,
        ))
        .await;
    assert!(ack.accepted);
    let review = ack.review.unwrap();
    assert!(review.applied);
    assert_eq!(review.review_id, format!("sess-1:verb-1:{at}"));

    let snapshot = engine.flush_session("ivy", "lesson-3").await.unwrap();
    assert_eq!(snapshot.state, StruggleState::Resolved);

    let ended = engine.end_session("ivy", "lesson-3", None).await.unwrap();
    assert!(ended.session.is_some());
    assert!(ended.alerts.is_empty());
    assert!(engine.session_snapshot("ivy", "lesson-3").await.is_none());
}

#[tokio::test]
async fn test_stale_review_signal_is_rejected_and_skips_the_session() {
    let (engine, _) = common::engine_with(held_config());
    let at = now_ms() - 10_000;
    let wrong = json!({"itemId": "verb-2", "contentType": "procedural", "correct": false, "latencyMs": 4000});

    let first = engine.ingest(raw("review-submitted", wrong.clone(), at)).await;
    assert!(first.accepted);
    assert!(first.review.unwrap().applied);

    let stale = engine.ingest(raw("review-submitted", wrong, at - 5_000)).await;
    assert!(!stale.accepted);
    assert_eq!(stale.code.as_deref(), Some("STALE_REVIEW"));
    assert!(stale.review.is_none());

    let snapshot = engine.flush_session("ivy", "lesson-3").await.unwrap();
    assert_eq!(snapshot.applied, 1);
    assert_eq!(snapshot.out_of_order, 0);
    assert!((snapshot.raw_score - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn test_rejected_signals_are_acknowledged_not_raised() {
    let (engine, _) = common::test_engine();

    let ack = engine.ingest(raw("telepathy", json!(1), now_ms())).await;
    assert!(!ack.accepted);
    assert_eq!(ack.code.as_deref(), Some("UNKNOWN_KIND"));

    let ack = engine.ingest(raw("hover", json!("long"), now_ms())).await;
    assert_eq!(ack.code.as_deref(), Some("MALFORMED_PAYLOAD"));

    let ack = engine.ingest(raw("hover", json!(1_000), now_ms() + 3_600_000)).await;
    assert_eq!(ack.code.as_deref(), Some("INVALID_TIMESTAMP"));

    assert_eq!(engine.metrics().snapshot().signals_rejected(), 3);
    assert_eq!(engine.sessions().active_sessions(), 0);
}

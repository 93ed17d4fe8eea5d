//! Property tests for the scheduler and the struggle score.
//!
//! - Every scheduled gap respects the minimum gap and the maximum horizon.
//! - Idle time never raises the struggle score and decays it toward zero.
//! - Appending a signal never lowers the raw score below its decayed value.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use cognitive_engine::cognitive::config::{SchedulerParams, StruggleParams};
use cognitive_engine::cognitive::scheduler::SpacedRepetitionScheduler;
use cognitive_engine::cognitive::struggle::StruggleDetector;
use cognitive_engine::cognitive::{ContentType, InteractionSignal};

const T0: i64 = 1_700_000_000_000;

fn arb_signal() -> impl Strategy<Value = InteractionSignal> {
    prop_oneof![
        (0u64..=120_000).prop_map(|duration_ms| InteractionSignal::Hover { duration_ms }),
        (1u32..=4).prop_map(|count| InteractionSignal::ScrollReversal { count }),
        (0u64..=90_000).prop_map(|gap_ms| InteractionSignal::IdleGap { gap_ms }),
        (0u32..=80).prop_map(|keys| InteractionSignal::KeystrokeBurst { keys }),
    ]
}

fn arb_stream() -> impl Strategy<Value = Vec<(i64, InteractionSignal)>> {
    prop::collection::vec((0i64..=20_000, arb_signal()), 1..40).prop_map(|steps| {
        let mut at = T0;
        steps
            .into_iter()
            .map(|(gap, signal)| {
                at += gap;
                (at, signal)
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_scheduled_gap_stays_within_bounds(
        outcomes in prop::collection::vec(any::<bool>(), 1..60),
        stability in 1.0f64..6_000.0,
        spacing_hours in 1i64..400,
    ) {
        let params = SchedulerParams::default();
        let scheduler = SpacedRepetitionScheduler::new(params.clone());
        let mut item = scheduler.new_item("item", ContentType::Mathematical);
        let mut at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for (i, correct) in outcomes.into_iter().enumerate() {
            let decision = scheduler.schedule(&mut item, at, &format!("r{i}"), correct, stability);
            let gap = decision.next_due_at - at;
            prop_assert!(gap >= Duration::hours(params.min_gap_hours as i64));
            prop_assert!(gap <= Duration::hours(params.max_horizon_hours as i64));
            prop_assert!(decision.interval_hours >= params.min_gap_hours);
            prop_assert!(decision.interval_hours <= params.max_horizon_hours);
            at += Duration::hours(spacing_hours);
        }
    }

    #[test]
    fn prop_idle_time_only_decays_the_score(
        stream in arb_stream(),
        idle_offsets in prop::collection::vec(0i64..=600_000, 1..10),
    ) {
        let mut detector = StruggleDetector::new(StruggleParams::default());
        for (at, signal) in &stream {
            detector.apply(*at, signal);
        }
        let last = detector.last_signal_ms().unwrap_or(T0);
        let at_last = detector.score_at(last);

        let mut idle_offsets = idle_offsets;
        idle_offsets.sort_unstable();
        let mut previous = at_last;
        for offset in idle_offsets {
            let score = detector.score_at(last + offset);
            prop_assert!(score <= previous + 1e-12);
            prop_assert!(score >= 0.0);
            previous = score;
        }

        let far = detector.score_at(last + 3_600_000);
        prop_assert!(far <= at_last * 1e-6 + 1e-12);
    }

    #[test]
    fn prop_signals_never_push_score_below_decayed_value(stream in arb_stream()) {
        let params = StruggleParams::default();
        let ceiling = params.score_ceiling;
        let mut detector = StruggleDetector::new(params);
        for (at, signal) in &stream {
            let before = detector.score_at(*at);
            detector.apply(*at, signal);
            prop_assert!(detector.raw_score() + 1e-12 >= before.min(ceiling));
            prop_assert!(detector.raw_score() <= ceiling + 1e-12);
        }
    }
}

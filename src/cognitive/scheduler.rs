use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cognitive::config::SchedulerParams;
use crate::cognitive::types::{ContentType, DueItem};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Per-item review state kept inside the learner profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSchedule {
    pub item_id: String,
    pub content_type: ContentType,
    pub review_count: u32,
    pub correct_streak: u32,
    pub lapses: u32,
    pub interval_hours: f64,
    pub last_review_at: Option<DateTime<Utc>>,
    pub last_review_id: Option<String>,
    pub next_due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDecision {
    pub interval_hours: f64,
    pub next_due_at: DateTime<Utc>,
    pub capped_by_retention: bool,
}

/// Where an incoming review sits relative to the last one applied to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOrder {
    Fresh,
    Replay,
    Stale { last_reviewed_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct SpacedRepetitionScheduler {
    params: SchedulerParams,
}

impl SpacedRepetitionScheduler {
    pub fn new(params: SchedulerParams) -> Self {
        Self { params }
    }

    pub fn new_item(&self, item_id: &str, content_type: ContentType) -> ItemSchedule {
        ItemSchedule {
            item_id: item_id.to_string(),
            content_type,
            review_count: 0,
            correct_streak: 0,
            lapses: 0,
            interval_hours: self.params.base_interval_hours,
            last_review_at: None,
            last_review_id: None,
            next_due_at: None,
        }
    }

    pub fn order_of(&self, item: &ItemSchedule, review_id: &str, reviewed_at: DateTime<Utc>) -> ReviewOrder {
        match item.last_review_at {
            Some(last) if reviewed_at <= last => {
                if item.last_review_id.as_deref() == Some(review_id) {
                    ReviewOrder::Replay
                } else {
                    ReviewOrder::Stale { last_reviewed_at: last }
                }
            }
            _ => ReviewOrder::Fresh,
        }
    }

    /// Hours until predicted retention under stability `s` reaches the floor.
    pub fn retention_horizon_hours(&self, stability_hours: f64) -> f64 {
        let floor = self.params.retention_floor.clamp(1e-6, 1.0 - 1e-6);
        stability_hours.max(0.0) * (1.0 / floor).ln()
    }

    pub fn schedule(
        &self,
        item: &mut ItemSchedule,
        reviewed_at: DateTime<Utc>,
        review_id: &str,
        correct: bool,
        stability_hours: f64,
    ) -> ScheduleDecision {
        let p = &self.params;

        let proposed = if correct {
            item.correct_streak = item.correct_streak.saturating_add(1);
            item.interval_hours * p.growth_factor
        } else {
            item.correct_streak = 0;
            item.lapses = item.lapses.saturating_add(1);
            item.interval_hours * p.contraction_factor
        };

        let horizon = self.retention_horizon_hours(stability_hours);
        let capped_by_retention = horizon < proposed;
        let interval = proposed
            .min(horizon)
            .clamp(p.min_gap_hours, p.max_horizon_hours.max(p.min_gap_hours));

        let next_due_at = reviewed_at + Duration::milliseconds((interval * MS_PER_HOUR).round() as i64);

        item.review_count = item.review_count.saturating_add(1);
        item.interval_hours = interval;
        item.last_review_at = Some(reviewed_at);
        item.last_review_id = Some(review_id.to_string());
        item.next_due_at = Some(next_due_at);

        ScheduleDecision {
            interval_hours: interval,
            next_due_at,
            capped_by_retention,
        }
    }

    pub fn due_items<'a, I>(items: I, content_type: ContentType, before: Option<DateTime<Utc>>) -> Vec<DueItem>
    where
        I: IntoIterator<Item = &'a ItemSchedule>,
    {
        let mut due: Vec<DueItem> = items
            .into_iter()
            .filter(|item| item.content_type == content_type)
            .filter_map(|item| {
                let due_at = item.next_due_at?;
                if before.is_some_and(|cutoff| due_at > cutoff) {
                    return None;
                }
                Some(DueItem {
                    item_id: item.item_id.clone(),
                    due_at,
                })
            })
            .collect();
        due.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.item_id.cmp(&b.item_id)));
        due
    }
}

impl Default for SpacedRepetitionScheduler {
    fn default() -> Self {
        Self::new(SchedulerParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_correct_then_incorrect_intervals() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut item = scheduler.new_item("A", ContentType::Textual);

        let first = scheduler.schedule(&mut item, t0(), "r1", true, 720.0);
        assert!((first.interval_hours - 46.8).abs() < 1e-9);
        assert_eq!(first.next_due_at, t0() + Duration::milliseconds(168_480_000));

        let day1 = t0() + Duration::days(1);
        let second = scheduler.schedule(&mut item, day1, "r2", false, 720.0);
        assert!((second.interval_hours - 28.08).abs() < 1e-9);
        assert_eq!(second.next_due_at, day1 + Duration::milliseconds(101_088_000));
        assert_eq!(item.lapses, 1);
        assert_eq!(item.correct_streak, 0);
    }

    #[test]
    fn test_retention_floor_shortens_interval() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut item = scheduler.new_item("B", ContentType::Visual);
        item.interval_hours = 400.0;
        let decision = scheduler.schedule(&mut item, t0(), "r1", true, 1000.0);
        let horizon = 1000.0 * (1.0f64 / 0.85).ln();
        assert!(decision.capped_by_retention);
        assert!((decision.interval_hours - horizon).abs() < 1e-9);
    }

    #[test]
    fn test_minimum_gap_wins_over_retention_cap() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut item = scheduler.new_item("C", ContentType::Mathematical);
        let decision = scheduler.schedule(&mut item, t0(), "r1", false, 6.0);
        assert_eq!(decision.interval_hours, 24.0);
        assert_eq!(decision.next_due_at, t0() + Duration::hours(24));
    }

    #[test]
    fn test_max_horizon() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut item = scheduler.new_item("D", ContentType::Procedural);
        item.interval_hours = 2800.0;
        let decision = scheduler.schedule(&mut item, t0(), "r1", true, 1_000_000.0);
        assert_eq!(decision.interval_hours, 2880.0);
    }

    #[test]
    fn test_review_order() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut item = scheduler.new_item("E", ContentType::Textual);
        assert_eq!(scheduler.order_of(&item, "r1", t0()), ReviewOrder::Fresh);

        scheduler.schedule(&mut item, t0(), "r1", true, 720.0);
        assert_eq!(scheduler.order_of(&item, "r1", t0()), ReviewOrder::Replay);
        assert_eq!(
            scheduler.order_of(&item, "r0", t0() - Duration::hours(1)),
            ReviewOrder::Stale { last_reviewed_at: t0() }
        );
        assert_eq!(
            scheduler.order_of(&item, "r2", t0() + Duration::seconds(1)),
            ReviewOrder::Fresh
        );
    }

    #[test]
    fn test_due_items_sorted_and_filtered() {
        let scheduler = SpacedRepetitionScheduler::default();
        let mut a = scheduler.new_item("a", ContentType::Textual);
        let mut b = scheduler.new_item("b", ContentType::Textual);
        let mut c = scheduler.new_item("c", ContentType::Visual);
        let untouched = scheduler.new_item("d", ContentType::Textual);
        scheduler.schedule(&mut a, t0() + Duration::days(2), "1", true, 720.0);
        scheduler.schedule(&mut b, t0(), "2", true, 720.0);
        scheduler.schedule(&mut c, t0(), "3", true, 720.0);

        let items = [a, b, c, untouched];
        let due = SpacedRepetitionScheduler::due_items(items.iter(), ContentType::Textual, None);
        let ids: Vec<_> = due.iter().map(|d| d.item_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let cutoff = t0() + Duration::days(3);
        let due = SpacedRepetitionScheduler::due_items(items.iter(), ContentType::Textual, Some(cutoff));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].item_id, "b");
    }
}

//! Per-session statistics and the shutdown summary

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use radropi_core::{Category, CategoryCounts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Totals {
    enqueued: u64,
    records_written: u64,
    detections: CategoryCounts,
    images_saved: u64,
    write_failures: u64,
    queue_drops: u64,
    first_detection: Option<DateTime<Utc>>,
    last_detection: Option<DateTime<Utc>>,
}

/// Counters shared between the logger front end and its writer
#[derive(Debug)]
pub struct SessionStats {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    totals: Mutex<Totals>,
}

/// Session statistics as exported to `exports/session_<ts>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_s: f64,
    pub enqueued: u64,
    pub records_written: u64,
    pub detections: CategoryCounts,
    pub images_saved: u64,
    pub write_failures: u64,
    pub queue_drops: u64,
    pub first_detection: Option<DateTime<Utc>>,
    pub last_detection: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at,
            totals: Mutex::new(Totals::default()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn record_enqueued(&self) {
        self.totals.lock().enqueued += 1;
    }

    pub(crate) fn record_written(&self, category: Category, at: DateTime<Utc>) {
        let mut totals = self.totals.lock();
        totals.records_written += 1;
        totals.detections.increment(category);
        totals.first_detection.get_or_insert(at);
        totals.last_detection = Some(at);
    }

    pub(crate) fn record_image(&self) {
        self.totals.lock().images_saved += 1;
    }

    pub(crate) fn record_failure(&self) {
        self.totals.lock().write_failures += 1;
    }

    pub(crate) fn record_drop(&self) {
        self.totals.lock().queue_drops += 1;
    }

    pub fn write_failures(&self) -> u64 {
        self.totals.lock().write_failures
    }

    pub fn queue_drops(&self) -> u64 {
        self.totals.lock().queue_drops
    }

    pub fn detections(&self) -> CategoryCounts {
        self.totals.lock().detections
    }

    pub fn summary(&self, ended_at: DateTime<Utc>) -> SessionSummary {
        let totals = self.totals.lock();
        let duration_s = (ended_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at,
            duration_s,
            enqueued: totals.enqueued,
            records_written: totals.records_written,
            detections: totals.detections,
            images_saved: totals.images_saved,
            write_failures: totals.write_failures,
            queue_drops: totals.queue_drops,
            first_detection: totals.first_detection,
            last_detection: totals.last_detection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_totals() {
        let start = Utc::now();
        let stats = SessionStats::new(start);
        stats.record_enqueued();
        stats.record_enqueued();
        stats.record_written(Category::Meteor, start);
        stats.record_written(Category::Asteroid, start + chrono::Duration::seconds(3));
        stats.record_image();
        stats.record_drop();

        let summary = stats.summary(start + chrono::Duration::seconds(10));
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.detections.meteor, 1);
        assert_eq!(summary.detections.asteroid, 1);
        assert_eq!(summary.detections.total(), 2);
        assert_eq!(summary.queue_drops, 1);
        assert_eq!(summary.first_detection, Some(start));
        assert_eq!(summary.last_detection, Some(start + chrono::Duration::seconds(3)));
        assert!((summary.duration_s - 10.0).abs() < 1e-9);
        assert_eq!(summary.session_id, stats.session_id());
    }

    #[test]
    fn test_summary_before_start_has_zero_duration() {
        let start = Utc::now();
        let stats = SessionStats::new(start);
        let summary = stats.summary(start - chrono::Duration::seconds(1));
        assert_eq!(summary.duration_s, 0.0);
    }
}

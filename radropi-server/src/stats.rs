//! Pipeline counters, mirrored to the `metrics` facade

use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by the orchestrator's tasks.
///
/// Every per-cycle fault that is absorbed instead of propagated ends up here.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_acquired: AtomicU64,
    frames_dropped: AtomicU64,
    acquisition_errors: AtomicU64,
    frame_errors: AtomicU64,
    cycles: AtomicU64,
    regions: AtomicU64,
    tracks_created: AtomicU64,
    tracks_confirmed: AtomicU64,
    steering_commands: AtomicU64,
    saturations: AtomicU64,
    servo_failures: AtomicU64,
    parks: AtomicU64,
    entries_logged: AtomicU64,
    log_drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_acquired: u64,
    pub frames_dropped: u64,
    pub acquisition_errors: u64,
    pub frame_errors: u64,
    pub cycles: u64,
    pub regions: u64,
    pub tracks_created: u64,
    pub tracks_confirmed: u64,
    pub steering_commands: u64,
    pub saturations: u64,
    pub servo_failures: u64,
    pub parks: u64,
    pub entries_logged: u64,
    pub log_drops: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        bump(&self.frames_acquired, 1);
        counter!("radropi_frames_acquired_total").increment(1);
    }

    pub fn record_frame_dropped(&self) {
        bump(&self.frames_dropped, 1);
        counter!("radropi_frames_dropped_total").increment(1);
    }

    pub fn record_acquisition_error(&self) {
        bump(&self.acquisition_errors, 1);
        counter!("radropi_acquisition_errors_total").increment(1);
    }

    pub fn record_frame_error(&self) {
        bump(&self.frame_errors, 1);
        counter!("radropi_frame_errors_total").increment(1);
    }

    pub fn record_cycle(&self, regions: usize) {
        bump(&self.cycles, 1);
        bump(&self.regions, regions as u64);
        counter!("radropi_cycles_total").increment(1);
        counter!("radropi_regions_total").increment(regions as u64);
    }

    pub fn record_track_created(&self) {
        bump(&self.tracks_created, 1);
        counter!("radropi_tracks_created_total").increment(1);
    }

    pub fn record_track_confirmed(&self) {
        bump(&self.tracks_confirmed, 1);
        counter!("radropi_tracks_confirmed_total").increment(1);
    }

    pub fn record_steering(&self, saturated: bool) {
        bump(&self.steering_commands, 1);
        counter!("radropi_steering_commands_total").increment(1);
        if saturated {
            bump(&self.saturations, 1);
            counter!("radropi_servo_saturations_total").increment(1);
        }
    }

    pub fn record_servo_failure(&self) {
        bump(&self.servo_failures, 1);
        counter!("radropi_servo_failures_total").increment(1);
    }

    pub fn record_park(&self) {
        bump(&self.parks, 1);
        counter!("radropi_servo_parks_total").increment(1);
    }

    pub fn record_logged(&self) {
        bump(&self.entries_logged, 1);
        counter!("radropi_entries_logged_total").increment(1);
    }

    pub fn record_log_drop(&self) {
        bump(&self.log_drops, 1);
        counter!("radropi_log_drops_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_acquired: load(&self.frames_acquired),
            frames_dropped: load(&self.frames_dropped),
            acquisition_errors: load(&self.acquisition_errors),
            frame_errors: load(&self.frame_errors),
            cycles: load(&self.cycles),
            regions: load(&self.regions),
            tracks_created: load(&self.tracks_created),
            tracks_confirmed: load(&self.tracks_confirmed),
            steering_commands: load(&self.steering_commands),
            saturations: load(&self.saturations),
            servo_failures: load(&self.servo_failures),
            parks: load(&self.parks),
            entries_logged: load(&self.entries_logged),
            log_drops: load(&self.log_drops),
        }
    }
}

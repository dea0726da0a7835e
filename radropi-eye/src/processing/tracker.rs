//! Multi-object tracking

use crate::config::TrackingConfig;
use chrono::{DateTime, Utc};
use radropi_core::{
    BoundingBox, Category, Classification, Region, TrackId, TrackSnapshot, TrackState,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Lifecycle notifications produced by one update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackEvent {
    Created(TrackId),
    Confirmed(TrackId),
    CategoryChanged {
        id: TrackId,
        from: Category,
        to: Category,
    },
    Stale(TrackId),
    Removed(TrackId),
}

/// Result of one tracking cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    pub primary: Option<TrackId>,
    pub events: Vec<TrackEvent>,
}

/// A tracked object, owned by the manager's arena
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    bbox: BoundingBox,
    /// Pixels per second
    velocity: (f32, f32),
    velocity_known: bool,
    history: VecDeque<Classification>,
    category: Category,
    confidence: f32,
    state: TrackState,
    age: u32,
    hits: u32,
    lifetime: u32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl Track {
    fn new(id: TrackId, region: &Region, classification: Classification, now: DateTime<Utc>) -> Self {
        let mut history = VecDeque::new();
        history.push_back(classification);
        Self {
            id,
            bbox: region.bbox,
            velocity: (0.0, 0.0),
            velocity_known: false,
            history,
            category: classification.category,
            confidence: classification.confidence,
            state: TrackState::Tentative,
            age: 0,
            hits: 1,
            lifetime: 0,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    fn is_live(&self) -> bool {
        self.state != TrackState::Stale
    }

    fn elapsed_secs(&self, now: DateTime<Utc>) -> f32 {
        let micros = (now - self.last_seen).num_microseconds().unwrap_or(0);
        (micros as f32 / 1_000_000.0).max(0.0)
    }

    fn predicted_center(&self, elapsed: f32) -> (f32, f32) {
        let (cx, cy) = self.bbox.center();
        (cx + self.velocity.0 * elapsed, cy + self.velocity.1 * elapsed)
    }

    fn speed(&self) -> f32 {
        self.velocity.0.hypot(self.velocity.1)
    }

    /// Majority vote over the history; ties go to the most recent category
    fn vote(&self) -> (Category, f32) {
        let mut counts = [0usize; 3];
        for c in &self.history {
            counts[c.category as usize] += 1;
        }
        let best = counts.iter().copied().max().unwrap_or(0);
        let winner = self
            .history
            .iter()
            .rev()
            .map(|c| c.category)
            .find(|category| counts[*category as usize] == best)
            .unwrap_or(self.category);

        let (sum, n) = self
            .history
            .iter()
            .filter(|c| c.category == winner)
            .fold((0.0f32, 0usize), |(s, n), c| (s + c.confidence, n + 1));
        let confidence = if n > 0 { sum / n as f32 } else { 0.0 };
        (winner, confidence)
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            bbox: self.bbox,
            velocity: self.velocity,
            category: self.category,
            confidence: self.confidence,
            state: self.state,
            age: self.age,
            hits: self.hits,
            lifetime: self.lifetime,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

/// Keeps persistent identities for moving objects across frames.
///
/// Tracks live in an arena ordered by id. Ids come from a monotonically
/// increasing counter and are never handed out twice, so an object that
/// reappears after its track was removed always gets a fresh identity.
/// Only the processing task owns a manager; updates take `&mut self` and
/// contain no await point.
pub struct TrackManager {
    config: TrackingConfig,
    tracks: Vec<Track>,
    next_id: TrackId,
    primary: Option<TrackId>,
    updates: u64,
    created_total: u64,
}

impl TrackManager {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            primary: None,
            updates: 0,
            created_total: 0,
        }
    }

    /// Feed one cycle of classified regions observed at `now`
    pub fn update(&mut self, observations: &[(Region, Classification)], now: DateTime<Utc>) -> TrackUpdate {
        self.updates += 1;
        let mut events = Vec::new();

        let assignments = self.associate(observations, now);
        let mut region_taken = vec![false; observations.len()];
        let mut track_matched = vec![false; self.tracks.len()];
        for &(track_idx, region_idx) in &assignments {
            region_taken[region_idx] = true;
            track_matched[track_idx] = true;
            let (region, classification) = &observations[region_idx];
            self.apply_match(track_idx, region, *classification, now, &mut events);
        }

        for (idx, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.apply_miss(idx, &mut events);
            }
        }

        for (idx, (region, classification)) in observations.iter().enumerate() {
            if !region_taken[idx] {
                self.create(region, *classification, now, &mut events);
            }
        }

        if self.updates % u64::from(self.config.compact_every) == 0 {
            self.compact(&mut events);
        }
        if self.tracks.len() > self.config.max_tracks {
            self.compact(&mut events);
            self.evict(&mut events);
        }

        self.primary = self.select_primary();
        debug!(
            "Tracking {} objects, primary {:?}",
            self.tracks.iter().filter(|t| t.is_live()).count(),
            self.primary
        );

        TrackUpdate {
            primary: self.primary,
            events,
        }
    }

    /// Deterministic greedy assignment of (track index, region index) pairs
    fn associate(&self, observations: &[(Region, Classification)], now: DateTime<Utc>) -> Vec<(usize, usize)> {
        let mut candidates: Vec<(f32, f32, TrackId, usize, usize)> = Vec::new();
        for (track_idx, track) in self.tracks.iter().enumerate() {
            if !track.is_live() {
                continue;
            }
            let elapsed = track.elapsed_secs(now);
            let (px, py) = track.predicted_center(elapsed);
            let gate = self.config.gate_radius + self.config.gate_velocity_factor * track.speed() * elapsed;

            for (region_idx, (region, _)) in observations.iter().enumerate() {
                let (rx, ry) = region.bbox.center();
                let distance = (rx - px).hypot(ry - py);
                if distance.is_finite() && distance <= gate {
                    let area_diff = (region.bbox.area() - track.bbox.area()).abs();
                    candidates.push((distance, area_diff, track.id, region_idx, track_idx));
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.total_cmp(&b.1))
                .then(a.2.cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let mut track_used = vec![false; self.tracks.len()];
        let mut region_used = vec![false; observations.len()];
        let mut assignments = Vec::new();
        for (_, _, _, region_idx, track_idx) in candidates {
            if track_used[track_idx] || region_used[region_idx] {
                continue;
            }
            track_used[track_idx] = true;
            region_used[region_idx] = true;
            assignments.push((track_idx, region_idx));
        }
        assignments
    }

    fn apply_match(
        &mut self,
        idx: usize,
        region: &Region,
        classification: Classification,
        now: DateTime<Utc>,
        events: &mut Vec<TrackEvent>,
    ) {
        let alpha = self.config.velocity_alpha;
        let confirm_hits = self.config.confirm_hits;
        let history_len = self.config.history_len;
        let track = &mut self.tracks[idx];

        let elapsed = track.elapsed_secs(now);
        if elapsed > 0.0 {
            let (ox, oy) = track.bbox.center();
            let (nx, ny) = region.bbox.center();
            let measured = ((nx - ox) / elapsed, (ny - oy) / elapsed);
            if track.velocity_known {
                track.velocity.0 += alpha * (measured.0 - track.velocity.0);
                track.velocity.1 += alpha * (measured.1 - track.velocity.1);
            } else {
                track.velocity = measured;
                track.velocity_known = true;
            }
        }

        track.bbox = region.bbox;
        track.age = 0;
        track.hits += 1;
        track.lifetime += 1;
        track.last_seen = now;

        track.history.push_back(classification);
        while track.history.len() > history_len {
            track.history.pop_front();
        }
        let previous = track.category;
        let (category, confidence) = track.vote();
        track.category = category;
        track.confidence = confidence;
        if category != previous {
            events.push(TrackEvent::CategoryChanged {
                id: track.id,
                from: previous,
                to: category,
            });
        }

        if track.state == TrackState::Tentative && track.hits >= confirm_hits {
            track.state = TrackState::Confirmed;
            info!("Track {} confirmed as {} ({:.2})", track.id, track.category, track.confidence);
            events.push(TrackEvent::Confirmed(track.id));
        }
    }

    fn apply_miss(&mut self, idx: usize, events: &mut Vec<TrackEvent>) {
        let max_age = self.config.max_age;
        let track = &mut self.tracks[idx];
        if !track.is_live() {
            return;
        }
        track.age += 1;
        track.hits = 0;
        track.lifetime += 1;
        if track.age > max_age {
            track.state = TrackState::Stale;
            debug!("Track {} went stale after {} missed cycles", track.id, track.age);
            events.push(TrackEvent::Stale(track.id));
        }
    }

    fn create(&mut self, region: &Region, classification: Classification, now: DateTime<Utc>, events: &mut Vec<TrackEvent>) {
        let id = self.next_id;
        self.next_id += 1;
        self.created_total += 1;

        let mut track = Track::new(id, region, classification, now);
        events.push(TrackEvent::Created(id));
        if track.hits >= self.config.confirm_hits {
            track.state = TrackState::Confirmed;
            events.push(TrackEvent::Confirmed(id));
        }
        debug!("Track {} created at {:?}", id, region.bbox.center());
        // ids are allocated in increasing order, so pushing keeps the arena sorted
        self.tracks.push(track);
    }

    /// Drop stale tracks from the arena
    fn compact(&mut self, events: &mut Vec<TrackEvent>) {
        self.tracks.retain(|track| {
            if track.is_live() {
                true
            } else {
                events.push(TrackEvent::Removed(track.id));
                false
            }
        });
    }

    /// Enforce the track cap by evicting the longest-unmatched tracks
    fn evict(&mut self, events: &mut Vec<TrackEvent>) {
        while self.tracks.len() > self.config.max_tracks {
            let victim = self
                .tracks
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.age.cmp(&b.age).then(b.id.cmp(&a.id)))
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    let track = self.tracks.remove(idx);
                    events.push(TrackEvent::Removed(track.id));
                }
                None => break,
            }
        }
    }

    fn select_primary(&self) -> Option<TrackId> {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed)
            .max_by(|a, b| {
                a.category
                    .priority()
                    .cmp(&b.category.priority())
                    .then(a.confidence.total_cmp(&b.confidence))
                    .then(a.lifetime.cmp(&b.lifetime))
                    .then(b.id.cmp(&a.id))
            })
            .map(|t| t.id)
    }

    /// All tracks in the arena, in id order, stale ones included until compaction
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Number of tracks that can still be matched
    pub fn live_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn snapshot(&self, id: TrackId) -> Option<TrackSnapshot> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| self.tracks[idx].snapshot())
    }

    pub fn primary(&self) -> Option<TrackId> {
        self.primary
    }

    /// Tracks ever created in this run
    pub fn created_total(&self) -> u64 {
        self.created_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn region_at(cx: f32, cy: f32, size: f32) -> Region {
        Region {
            bbox: BoundingBox::new(cx - size / 2.0, cy - size / 2.0, size, size),
            area: (size * size) as u32,
            intensity: 100.0,
            peak: 255.0,
            mean_brightness: 200.0,
        }
    }

    fn meteor(conf: f32) -> Classification {
        Classification::new(Category::Meteor, conf)
    }

    fn tick(start: DateTime<Utc>, n: i64) -> DateTime<Utc> {
        start + Duration::milliseconds(100 * n)
    }

    #[test]
    fn test_single_object_keeps_identity() {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        for i in 0..10 {
            let obs = [(region_at(10.0 + 10.0 * i as f32, 10.0, 6.0), meteor(0.9))];
            manager.update(&obs, tick(start, i));
        }
        assert_eq!(manager.created_total(), 1);
        assert_eq!(manager.tracks().len(), 1);
        let snapshot = manager.snapshot(1).unwrap();
        assert_eq!(snapshot.state, TrackState::Confirmed);
        assert_eq!(snapshot.hits, 10);
        assert!((snapshot.velocity.0 - 100.0).abs() < 1.0);
        assert_eq!(manager.primary(), Some(1));
    }

    #[test]
    fn test_confirmation_after_k_hits() {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        let obs = [(region_at(50.0, 50.0, 4.0), meteor(0.9))];

        let first = manager.update(&obs, tick(start, 0));
        assert_eq!(first.events, vec![TrackEvent::Created(1)]);
        assert_eq!(first.primary, None);

        let second = manager.update(&obs, tick(start, 1));
        assert!(second.events.is_empty());
        assert_eq!(second.primary, None);

        let third = manager.update(&obs, tick(start, 2));
        assert_eq!(third.events, vec![TrackEvent::Confirmed(1)]);
        assert_eq!(third.primary, Some(1));
    }

    #[test]
    fn test_stale_then_new_identity() {
        let config = TrackingConfig {
            max_age: 2,
            compact_every: 1,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        let obs = [(region_at(50.0, 50.0, 4.0), meteor(0.9))];
        manager.update(&obs, tick(start, 0));

        let mut saw_stale = false;
        let mut saw_removed = false;
        for i in 1..=3 {
            let update = manager.update(&[], tick(start, i));
            saw_stale |= update.events.contains(&TrackEvent::Stale(1));
            saw_removed |= update.events.contains(&TrackEvent::Removed(1));
        }
        assert!(saw_stale && saw_removed);
        assert!(manager.tracks().is_empty());

        let update = manager.update(&obs, tick(start, 4));
        assert_eq!(update.events, vec![TrackEvent::Created(2)]);
    }

    #[test]
    fn test_stale_track_never_matched() {
        let config = TrackingConfig {
            max_age: 0,
            compact_every: 100,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        let obs = [(region_at(50.0, 50.0, 4.0), meteor(0.9))];
        manager.update(&obs, tick(start, 0));
        manager.update(&[], tick(start, 1));
        assert_eq!(manager.tracks()[0].state(), TrackState::Stale);

        manager.update(&obs, tick(start, 2));
        assert_eq!(manager.created_total(), 2);
        assert_eq!(manager.live_count(), 1);
    }

    #[test]
    fn test_miss_resets_hits() {
        let config = TrackingConfig {
            confirm_hits: 3,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        let obs = [(region_at(50.0, 50.0, 4.0), meteor(0.9))];
        manager.update(&obs, tick(start, 0));
        manager.update(&obs, tick(start, 1));
        manager.update(&[], tick(start, 2));
        manager.update(&obs, tick(start, 3));
        assert_eq!(manager.snapshot(1).unwrap().state, TrackState::Tentative);
        manager.update(&obs, tick(start, 4));
        manager.update(&obs, tick(start, 5));
        assert_eq!(manager.snapshot(1).unwrap().state, TrackState::Confirmed);
    }

    #[test]
    fn test_category_vote_and_tie_break() {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        let region = region_at(50.0, 50.0, 4.0);

        manager.update(&[(region, meteor(0.8))], tick(start, 0));
        let update = manager.update(&[(region, Classification::new(Category::Asteroid, 0.6))], tick(start, 1));
        // one each, most recent wins
        assert!(update.events.contains(&TrackEvent::CategoryChanged {
            id: 1,
            from: Category::Meteor,
            to: Category::Asteroid,
        }));
        let snapshot = manager.snapshot(1).unwrap();
        assert_eq!(snapshot.category, Category::Asteroid);
        assert!((snapshot.confidence - 0.6).abs() < 1e-6);

        manager.update(&[(region, meteor(0.6))], tick(start, 2));
        let snapshot = manager.snapshot(1).unwrap();
        assert_eq!(snapshot.category, Category::Meteor);
        assert!((snapshot.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_greedy_association_prefers_nearest() {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        manager.update(
            &[(region_at(20.0, 20.0, 4.0), meteor(0.9)), (region_at(60.0, 20.0, 4.0), meteor(0.9))],
            tick(start, 0),
        );
        // regions swapped in input order; identities follow position
        manager.update(
            &[(region_at(62.0, 20.0, 4.0), meteor(0.9)), (region_at(22.0, 20.0, 4.0), meteor(0.9))],
            tick(start, 1),
        );
        assert_eq!(manager.snapshot(1).unwrap().bbox.center(), (22.0, 20.0));
        assert_eq!(manager.snapshot(2).unwrap().bbox.center(), (62.0, 20.0));
        assert_eq!(manager.created_total(), 2);
    }

    #[test]
    fn test_region_outside_gate_creates_track() {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        manager.update(&[(region_at(20.0, 20.0, 4.0), meteor(0.9))], tick(start, 0));
        manager.update(&[(region_at(200.0, 20.0, 4.0), meteor(0.9))], tick(start, 1));
        assert_eq!(manager.created_total(), 2);
    }

    #[test]
    fn test_primary_prefers_priority_then_confidence() {
        let config = TrackingConfig {
            confirm_hits: 1,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        let update = manager.update(
            &[
                (region_at(20.0, 20.0, 4.0), meteor(0.99)),
                (region_at(120.0, 20.0, 4.0), Classification::new(Category::Asteroid, 0.5)),
                (region_at(220.0, 20.0, 4.0), Classification::new(Category::NonMeteor, 1.0)),
            ],
            tick(start, 0),
        );
        assert_eq!(update.primary, Some(2));
    }

    #[test]
    fn test_primary_tie_prefers_longer_lifetime() {
        let config = TrackingConfig {
            confirm_hits: 1,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        manager.update(&[(region_at(200.0, 20.0, 4.0), meteor(0.9))], tick(start, 0));
        let update = manager.update(
            &[(region_at(20.0, 20.0, 4.0), meteor(0.9)), (region_at(200.0, 20.0, 4.0), meteor(0.9))],
            tick(start, 1),
        );
        assert_eq!(update.primary, Some(1));
    }

    #[test]
    fn test_max_tracks_evicts_oldest_unmatched() {
        let config = TrackingConfig {
            max_tracks: 2,
            compact_every: 1000,
            ..TrackingConfig::default()
        };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        manager.update(&[(region_at(20.0, 20.0, 4.0), meteor(0.9))], tick(start, 0));
        manager.update(&[(region_at(120.0, 20.0, 4.0), meteor(0.9))], tick(start, 1));
        let update = manager.update(
            &[(region_at(120.0, 20.0, 4.0), meteor(0.9)), (region_at(220.0, 20.0, 4.0), meteor(0.9))],
            tick(start, 2),
        );
        assert!(update.events.contains(&TrackEvent::Removed(1)));
        let ids: Vec<TrackId> = manager.tracks().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}

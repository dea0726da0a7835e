//! Track manager properties over generated region streams

use chrono::{Duration, Utc};
use proptest::prelude::*;
use radropi_core::{BoundingBox, Category, Classification, Region, TrackId};
use radropi_eye::{TrackEvent, TrackManager, TrackingConfig};

fn region(cx: f32, cy: f32) -> Region {
    Region {
        bbox: BoundingBox::new(cx - 2.0, cy - 2.0, 4.0, 4.0),
        area: 16,
        intensity: 60.0,
        peak: 255.0,
        mean_brightness: 180.0,
    }
}

proptest! {
    #[test]
    fn created_ids_strictly_increase(
        frames in prop::collection::vec(
            prop::collection::vec((0.0f32..640.0, 0.0f32..480.0), 0..6),
            1..40,
        )
    ) {
        let config = TrackingConfig { max_age: 2, compact_every: 3, ..TrackingConfig::default() };
        let mut manager = TrackManager::new(config);
        let start = Utc::now();
        let mut last_created: TrackId = 0;
        let mut removed: Vec<TrackId> = Vec::new();

        for (i, points) in frames.iter().enumerate() {
            let observations: Vec<(Region, Classification)> = points
                .iter()
                .map(|&(x, y)| (region(x, y), Classification::new(Category::Meteor, 0.7)))
                .collect();
            let update = manager.update(&observations, start + Duration::milliseconds(100 * i as i64));
            for event in update.events {
                match event {
                    TrackEvent::Created(id) => {
                        prop_assert!(id > last_created);
                        prop_assert!(!removed.contains(&id));
                        last_created = id;
                    }
                    TrackEvent::Removed(id) => removed.push(id),
                    _ => {}
                }
            }
            let ids: Vec<TrackId> = manager.tracks().iter().map(|t| t.id()).collect();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            if let Some(primary) = update.primary {
                prop_assert!(manager.snapshot(primary).is_some());
            }
        }
        prop_assert_eq!(manager.created_total(), last_created);
    }

    #[test]
    fn object_within_gate_keeps_one_track(
        step_x in -20.0f32..20.0,
        step_y in -20.0f32..20.0,
        frames in 2usize..30,
    ) {
        let mut manager = TrackManager::new(TrackingConfig::default());
        let start = Utc::now();
        for i in 0..frames {
            let obs = [(
                region(320.0 + step_x * i as f32, 240.0 + step_y * i as f32),
                Classification::new(Category::Asteroid, 0.8),
            )];
            manager.update(&obs, start + Duration::milliseconds(100 * i as i64));
        }
        prop_assert_eq!(manager.created_total(), 1);
    }
}

#[test]
fn primary_independent_of_region_order() {
    let start = Utc::now();
    let older = (region(100.0, 100.0), Classification::new(Category::Meteor, 0.9));
    let newer = (region(300.0, 100.0), Classification::new(Category::Meteor, 0.9));

    let run = |swap: bool| {
        let mut manager = TrackManager::new(TrackingConfig::default());
        manager.update(&[older], start);
        let mut primary = None;
        for i in 1..6 {
            let observations = if swap { [newer, older] } else { [older, newer] };
            let update = manager.update(&observations, start + Duration::milliseconds(100 * i));
            primary = update.primary.and_then(|id| manager.snapshot(id)).map(|s| s.bbox.center());
        }
        primary
    };

    assert_eq!(run(false), Some((100.0, 100.0)));
    assert_eq!(run(true), Some((100.0, 100.0)));
}

//! Derived path drawing for the followed track.
//!
//! Two gizmo polylines, both gated on an active follow and the layer's
//! path toggle: the recorded track (authoritative fixes collected at each
//! commit, fading with age) and, where a layer can compute one, a planned
//! course ahead (orbit samples for satellites).

use bevy::prelude::*;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;

use crate::core::coordinates::great_circle_destination;
use crate::traffic::TrafficLayer;
use crate::traffic::follow::CameraFollow;
use crate::traffic::store::Tracks;
use crate::traffic::LayerSettings;

#[derive(Clone)]
pub struct TrailPoint {
    pub position: Vec3,
    pub timestamp: DateTime<Utc>,
}

/// Recorded authoritative fixes of the currently followed track.
#[derive(Resource)]
pub struct TrailBuffer<K: Send + Sync + 'static> {
    pub points: Vec<TrailPoint>,
    pub for_id: Option<String>,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> Default for TrailBuffer<K> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            for_id: None,
            _marker: PhantomData,
        }
    }
}

/// Future course for the followed track, filled in by layers that can
/// predict one. Ignored while `for_id` does not match the follow.
#[derive(Resource)]
pub struct PlannedPath<K: Send + Sync + 'static> {
    pub points: Vec<Vec3>,
    pub for_id: Option<String>,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> Default for PlannedPath<K> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            for_id: None,
            _marker: PhantomData,
        }
    }
}

/// Shared path styling and retention limits.
#[derive(Resource, Clone)]
pub struct PathConfig {
    /// Minimum seconds between recorded trail points.
    pub min_spacing_secs: f32,
    pub max_age_secs: f32,
    pub max_points: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            min_spacing_secs: 5.0,
            max_age_secs: 900.0,
            max_points: 512,
        }
    }
}

fn should_append(last: Option<&TrailPoint>, at: DateTime<Utc>, min_spacing_secs: f32) -> bool {
    match last {
        None => true,
        Some(point) => {
            at.signed_duration_since(point.timestamp).num_milliseconds() as f32 / 1000.0
                >= min_spacing_secs
        }
    }
}

fn prune(points: &mut Vec<TrailPoint>, now: DateTime<Utc>, max_age_secs: f32, max_points: usize) {
    let max_age_millis = (max_age_secs * 1000.0) as i64;
    points.retain(|point| {
        now.signed_duration_since(point.timestamp).num_milliseconds() <= max_age_millis
    });
    if points.len() > max_points {
        let excess = points.len() - max_points;
        points.drain(0..excess);
    }
}

/// Collect the followed track's authoritative fixes, one per commit.
pub fn record_trail<K: TrafficLayer>(
    tracks: Res<Tracks<K>>,
    follow: Res<CameraFollow>,
    settings: Res<LayerSettings<K>>,
    config: Res<PathConfig>,
    mut trail: ResMut<TrailBuffer<K>>,
    mut last_generation: Local<u64>,
) {
    let followed = follow.locked_id(K::KIND).map(str::to_string);
    if trail.for_id != followed {
        trail.points.clear();
        trail.for_id = followed.clone();
    }
    let Some(id) = followed else {
        return;
    };
    if !settings.paths_enabled {
        trail.points.clear();
        return;
    }
    if tracks.generation() == *last_generation {
        return;
    }
    *last_generation = tracks.generation();

    // While the track is out of the feed the trail simply stops growing.
    let Some(slot) = tracks.get(&id) else {
        return;
    };
    let at = slot.kinematics.updated_at;
    if should_append(trail.points.last(), at, config.min_spacing_secs) {
        trail.points.push(TrailPoint {
            position: slot.kinematics.position.to_bevy_km(),
            timestamp: at,
        });
    }
    prune(&mut trail.points, Utc::now(), config.max_age_secs, config.max_points);
}

/// Project the followed track's course ahead along the great circle,
/// re-anchored at every commit. Layers with a real predictor (orbiters)
/// fill [`PlannedPath`] from their worker instead of registering this.
pub fn plan_course_arc<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    follow: Res<CameraFollow>,
    tracks: Res<Tracks<K>>,
    mut planned: ResMut<PlannedPath<K>>,
    mut last_generation: Local<u64>,
) {
    let followed = follow.locked_id(K::KIND);
    if planned.for_id.as_deref() != followed {
        planned.points.clear();
        planned.for_id = followed.map(str::to_string);
    }
    let Some(id) = followed else {
        return;
    };
    if !settings.paths_enabled {
        planned.points.clear();
        return;
    }
    if tracks.generation() == *last_generation && !planned.points.is_empty() {
        return;
    }
    *last_generation = tracks.generation();

    let Some(slot) = tracks.get(id) else {
        return;
    };
    let (Some(speed), Some(heading)) = (slot.kinematics.speed_m_s, slot.kinematics.heading_deg)
    else {
        planned.points.clear();
        return;
    };

    // Half an hour ahead at the current speed, clamped to stay drawable.
    let range_km = (speed * 1800.0 / 1000.0).clamp(20.0, 2000.0);
    const SAMPLES: usize = 32;
    let start = slot.kinematics.position;
    planned.points.clear();
    for i in 0..=SAMPLES {
        let dist = range_km * i as f64 / SAMPLES as f64;
        planned
            .points
            .push(great_circle_destination(&start, heading, dist).to_bevy_km());
    }
}

/// Draw the recorded trail (fading with age) and any planned course.
pub fn draw_paths<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    follow: Res<CameraFollow>,
    tracks: Res<Tracks<K>>,
    config: Res<PathConfig>,
    trail: Res<TrailBuffer<K>>,
    planned: Res<PlannedPath<K>>,
    mut gizmos: Gizmos,
) {
    if !settings.visible || !settings.paths_enabled {
        return;
    }
    let Some(id) = follow.locked_id(K::KIND) else {
        return;
    };
    let base_color = tracks
        .get(id)
        .map(|slot| slot.tag.color())
        .unwrap_or(Color::srgb(0.6, 0.6, 0.6));
    let srgba = base_color.to_srgba();

    let now = Utc::now();
    for window in trail.points.windows(2) {
        let age_secs = now
            .signed_duration_since(window[0].timestamp)
            .num_milliseconds() as f32
            / 1000.0;
        let alpha = (1.0 - age_secs / config.max_age_secs).clamp(0.1, 1.0);
        let faded = Color::srgba(srgba.red, srgba.green, srgba.blue, alpha);
        gizmos.line(window[0].position, window[1].position, faded);
    }

    if planned.for_id.as_deref() == Some(id) {
        let dim = Color::srgba(srgba.red, srgba.green, srgba.blue, 0.35);
        for window in planned.points.windows(2) {
            gizmos.line(window[0], window[1], dim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn point(secs: i64) -> TrailPoint {
        TrailPoint {
            position: Vec3::ZERO,
            timestamp: t(secs),
        }
    }

    #[test]
    fn test_should_append_respects_spacing() {
        assert!(should_append(None, t(0), 5.0));
        assert!(!should_append(Some(&point(0)), t(3), 5.0));
        assert!(should_append(Some(&point(0)), t(5), 5.0));
    }

    #[test]
    fn test_prune_drops_old_and_excess_points() {
        let mut points: Vec<TrailPoint> = (0..10).map(|i| point(i * 10)).collect();
        // Points older than 60s relative to t(100) go away: 0..=30 stamps.
        prune(&mut points, t(100), 60.0, 100);
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].timestamp, t(40));

        prune(&mut points, t(100), 60.0, 3);
        assert_eq!(points.len(), 3);
        // Oldest trimmed first.
        assert_eq!(points[0].timestamp, t(70));
    }
}

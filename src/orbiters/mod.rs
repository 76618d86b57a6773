//! Live orbiter layer, propagated from Celestrak element sets.
//!
//! The worker owns the SGP4 propagators and streams position snapshots like
//! any other feed. The one extra wrinkle is the derived path: instead of a
//! great-circle guess the worker answers `PlanPath` commands with a real
//! one-orbit propagation for the followed object.

use bevy::prelude::*;

pub mod feed;
pub mod tle;

use crate::traffic::class::ClassTag;
use crate::traffic::paths::PlannedPath;
use crate::traffic::{CameraFollow, LayerKind, LayerSettings, LayerTuning, TrackLayerPlugin, TrafficLayer};

use feed::{OrbiterChannels, OrbiterCommand};

/// Seconds between orbit path refreshes while a lock is held. The Earth
/// turns under the orbit, so the Earth-fixed path drifts and must be redrawn.
const PATH_REFRESH_SECS: f32 = 60.0;

/// Marker for everything belonging to the orbiter layer.
#[derive(Component, Default)]
pub struct Orbiters;

impl TrafficLayer for Orbiters {
    const KIND: LayerKind = LayerKind::Orbiters;
    // Positions come from local propagation, so the feed never goes quiet;
    // the horizon only matters when the TLE refresh starts failing.
    const TUNING: LayerTuning = LayerTuning {
        bulk_interval_secs: 1.0,
        horizon_secs: 120.0,
        min_speed_m_s: 1.0,
        icon_scale_km: 60.0,
        label_range_km: 25_000.0,
        follow_distance_km: 2_000.0,
        auto_unlock_after_secs: None,
    };
    const TAGS: &'static [ClassTag] = &[
        ClassTag::LeoSatellite,
        ClassTag::MeoSatellite,
        ClassTag::GeoSatellite,
        ClassTag::EllipticalOrbiter,
    ];
}

pub struct OrbitersPlugin;

impl Plugin for OrbitersPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(TrackLayerPlugin::<Orbiters>::default())
            .add_systems(Startup, feed::setup_orbiter_worker)
            .add_systems(Update, (request_orbit_path, apply_orbit_paths));
    }
}

/// Asks the worker for a fresh one-orbit path when the followed orbiter
/// changes, and again on a timer while the lock is held.
fn request_orbit_path(
    follow: Res<CameraFollow>,
    settings: Res<LayerSettings<Orbiters>>,
    channels: Option<Res<OrbiterChannels>>,
    time: Res<Time>,
    mut refresh: Local<Option<Timer>>,
    mut prev: Local<Option<String>>,
) {
    let Some(channels) = channels else { return };
    let timer = refresh
        .get_or_insert_with(|| Timer::from_seconds(PATH_REFRESH_SECS, TimerMode::Repeating));
    timer.tick(time.delta());

    if !settings.paths_enabled {
        // Forget the target so re-enabling paths requests immediately.
        *prev = None;
        return;
    }

    let followed = follow.locked_id(LayerKind::Orbiters).map(str::to_string);
    let changed = *prev != followed;
    *prev = followed.clone();

    let Some(id) = followed else { return };
    if changed || timer.just_finished() {
        if let Ok(norad) = id.parse::<u64>() {
            let _ = channels.cmd_tx.send(OrbiterCommand::PlanPath { norad });
        }
    }
}

/// Drains planned orbits from the worker into the layer's path resource,
/// dropping answers for targets the camera has already left.
fn apply_orbit_paths(
    channels: Option<Res<OrbiterChannels>>,
    follow: Res<CameraFollow>,
    mut planned: ResMut<PlannedPath<Orbiters>>,
) {
    let Some(channels) = channels else { return };
    let Ok(rx) = channels.path_rx.lock() else { return };
    while let Ok(track) = rx.try_recv() {
        if follow.locked_id(LayerKind::Orbiters) != Some(track.id.as_str()) {
            continue;
        }
        planned.points = track.points.iter().map(|g| g.to_bevy_km()).collect();
        planned.for_id = Some(track.id);
    }
}

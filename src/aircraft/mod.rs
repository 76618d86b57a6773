//! Live aircraft layer, fed by ADS-B position reports.

use bevy::prelude::*;

pub mod feed;

use crate::traffic::class::ClassTag;
use crate::traffic::paths;
use crate::traffic::{LayerKind, LayerTuning, TrackLayerPlugin, TrafficLayer};

/// Marker for everything belonging to the aircraft layer.
#[derive(Component, Default)]
pub struct Aircraft;

impl TrafficLayer for Aircraft {
    const KIND: LayerKind = LayerKind::Aircraft;
    // Fast movers: short horizon, reckon every second.
    const TUNING: LayerTuning = LayerTuning {
        bulk_interval_secs: 1.0,
        horizon_secs: 120.0,
        min_speed_m_s: 1.0,
        icon_scale_km: 30.0,
        label_range_km: 3_000.0,
        follow_distance_km: 200.0,
        auto_unlock_after_secs: None,
    };
    const TAGS: &'static [ClassTag] = &[
        ClassTag::LightAircraft,
        ClassTag::Airliner,
        ClassTag::HeavyAirliner,
        ClassTag::HighPerformance,
        ClassTag::Rotorcraft,
    ];
}

pub struct AircraftPlugin;

impl Plugin for AircraftPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(TrackLayerPlugin::<Aircraft>::default())
            .add_systems(Startup, feed::setup_aircraft_worker)
            .add_systems(Update, paths::plan_course_arc::<Aircraft>);
    }
}

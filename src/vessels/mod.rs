//! Live vessel layer, fed by AIS position reports.

use bevy::prelude::*;

pub mod feed;

use crate::traffic::class::ClassTag;
use crate::traffic::paths;
use crate::traffic::{LayerKind, LayerTuning, TrackLayerPlugin, TrafficLayer};

/// Marker for everything belonging to the vessel layer.
#[derive(Component, Default)]
pub struct Vessels;

impl TrafficLayer for Vessels {
    const KIND: LayerKind = LayerKind::Vessels;
    // Slow movers: long horizon, relaxed bulk cadence.
    const TUNING: LayerTuning = LayerTuning {
        bulk_interval_secs: 2.0,
        horizon_secs: 300.0,
        min_speed_m_s: 0.3,
        icon_scale_km: 25.0,
        label_range_km: 2_000.0,
        follow_distance_km: 150.0,
        auto_unlock_after_secs: None,
    };
    const TAGS: &'static [ClassTag] = &[
        ClassTag::CargoShip,
        ClassTag::TankerShip,
        ClassTag::PassengerShip,
        ClassTag::HighSpeedCraft,
        ClassTag::FishingVessel,
        ClassTag::TugOrPilot,
    ];
}

pub struct VesselsPlugin;

impl Plugin for VesselsPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(TrackLayerPlugin::<Vessels>::default())
            .add_systems(Startup, feed::setup_vessel_worker)
            .add_systems(Update, paths::plan_course_arc::<Vessels>);
    }
}

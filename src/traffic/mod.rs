//! Generic live-traffic layer machinery.
//!
//! Aircraft, vessels and orbiters all run the same pipeline: a worker thread
//! posts full snapshots into a channel, `ingest_feed` commits them to the
//! layer's track store and reconciles icons and labels, dead reckoning moves
//! everything between snapshots, and occlusion hides whatever the globe is
//! in front of. The layer-specific parts (feed parsing, classification,
//! tunables) hang off the [`TrafficLayer`] marker type.

use bevy::prelude::*;
use std::marker::PhantomData;

pub mod class;
pub mod follow;
pub mod occlusion;
pub mod paths;
pub mod pick;
pub mod reckon;
pub mod store;
pub mod sync;

pub use class::ClassTag;
pub use follow::{CameraFollow, FollowProxy};
pub use store::{TrackFilter, Tracks};

use crate::feed::FeedStatus;
use paths::{PathConfig, PlannedPath, TrailBuffer};

/// Which traffic family a layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Aircraft,
    Vessels,
    Orbiters,
}

/// Per-layer tunables, fixed at compile time per marker type.
#[derive(Debug, Clone, Copy)]
pub struct LayerTuning {
    /// Seconds between bulk dead-reckoning passes over the whole layer.
    pub bulk_interval_secs: f32,
    /// Extrapolation horizon; a track older than this freezes in place.
    pub horizon_secs: f32,
    /// Tracks slower than this are not extrapolated at all.
    pub min_speed_m_s: f64,
    /// Icon cone height in world km.
    pub icon_scale_km: f32,
    /// Labels only draw inside this camera distance.
    pub label_range_km: f32,
    /// Initial camera offset beyond a newly followed object.
    pub follow_distance_km: f32,
    /// Release the follow after the track has been missing this long;
    /// `None` holds the lock until the user lets go.
    pub auto_unlock_after_secs: Option<f32>,
}

/// Marker component tying a layer's entities, resources and systems
/// together. One zero-sized type per traffic family.
pub trait TrafficLayer: Component + Default + Send + Sync + 'static {
    const KIND: LayerKind;
    const TUNING: LayerTuning;
    /// Classes this layer can produce, used to build its material set.
    const TAGS: &'static [ClassTag];
}

/// Runtime switches for one layer.
#[derive(Resource)]
pub struct LayerSettings<K: TrafficLayer> {
    pub visible: bool,
    pub labels_enabled: bool,
    pub paths_enabled: bool,
    pub filter: TrackFilter,
    pub tuning: LayerTuning,
    /// One-shot request to drop every track and primitive of the layer.
    pub clear_requested: bool,
    _marker: PhantomData<K>,
}

impl<K: TrafficLayer> Default for LayerSettings<K> {
    fn default() -> Self {
        Self {
            visible: true,
            labels_enabled: true,
            paths_enabled: true,
            filter: TrackFilter::default(),
            tuning: K::TUNING,
            clear_requested: false,
            _marker: PhantomData,
        }
    }
}

/// Repeating timer driving the layer's bulk reckoning and occlusion passes.
#[derive(Resource, Deref, DerefMut)]
pub struct BulkTimer<K: TrafficLayer> {
    #[deref]
    timer: Timer,
    _marker: PhantomData<K>,
}

impl<K: TrafficLayer> Default for BulkTimer<K> {
    fn default() -> Self {
        Self {
            timer: Timer::from_seconds(K::TUNING.bulk_interval_secs, TimerMode::Repeating),
            _marker: PhantomData,
        }
    }
}

/// Tear a layer down on request: every icon, label and proxy goes, the
/// store empties, and a follow held on this layer is released.
pub fn clear_layer<K: TrafficLayer>(
    mut settings: ResMut<LayerSettings<K>>,
    mut tracks: ResMut<Tracks<K>>,
    mut trail: ResMut<TrailBuffer<K>>,
    mut planned: ResMut<PlannedPath<K>>,
    mut follow: ResMut<CameraFollow>,
    mut commands: Commands,
) {
    if !settings.clear_requested {
        return;
    }
    settings.clear_requested = false;

    if follow.locked_id(K::KIND).is_some() {
        follow.unlock();
    }

    let removed = tracks.clear();
    info!("{:?} layer cleared, {} tracks dropped", K::KIND, removed.len());
    for gone in removed {
        if let Some(icon) = gone.icon {
            commands.entity(icon).despawn();
        }
        if let Some(label) = gone.label {
            commands.entity(label).despawn();
        }
        if let Some(proxy) = gone.proxy {
            // Despawned here, so the release queue must not touch it again.
            follow.forget_release(proxy);
            commands.entity(proxy).despawn();
        }
    }

    trail.points.clear();
    trail.for_id = None;
    planned.points.clear();
    planned.for_id = None;
}

/// Global pieces shared by every layer: the follow state machine, path
/// styling and the globe-click release. Add once.
pub struct TrafficPlugin;

impl Plugin for TrafficPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CameraFollow>()
            .init_resource::<PathConfig>()
            .add_systems(Update, (follow::follow_camera, pick::unlock_on_globe_click));
    }
}

/// Full per-layer pipeline. Add once per [`TrafficLayer`] marker; the
/// layer's feed plugin supplies the worker channel separately.
pub struct TrackLayerPlugin<K: TrafficLayer>(PhantomData<K>);

impl<K: TrafficLayer> Default for TrackLayerPlugin<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K: TrafficLayer> Plugin for TrackLayerPlugin<K> {
    fn build(&self, app: &mut App) {
        app.init_resource::<Tracks<K>>()
            .init_resource::<LayerSettings<K>>()
            .init_resource::<FeedStatus<K>>()
            .init_resource::<BulkTimer<K>>()
            .init_resource::<TrailBuffer<K>>()
            .init_resource::<PlannedPath<K>>()
            .add_systems(Startup, sync::setup_layer_assets::<K>)
            .add_systems(
                Update,
                (
                    sync::ingest_feed::<K>,
                    sync::refresh_label_text::<K>,
                    follow::watch_followed_track::<K>,
                    reckon::reckon_followed::<K>,
                    reckon::reckon_bulk::<K>,
                    sync::apply_layer_visibility::<K>,
                    occlusion::update_visibility::<K>,
                    sync::position_labels::<K>,
                    paths::record_trail::<K>,
                    paths::draw_paths::<K>,
                    follow::cleanup_released_proxies::<K>,
                )
                    .chain(),
            )
            .add_systems(
                Update,
                (
                    pick::handle_icon_clicks::<K>,
                    sync::report_feed_status::<K>,
                    clear_layer::<K>,
                ),
            );
    }
}

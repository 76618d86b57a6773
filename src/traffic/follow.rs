//! Camera lock-on for a single tracked object.
//!
//! A follow never rides on the icon entity directly. Clicking an icon locks
//! the camera onto the track's proxy, a mesh-less anchor that the reckoning
//! systems keep positioned alongside the icon. If the track then drops out
//! of the feed its icon and label are despawned as usual, but the proxy
//! stays where it was and the camera keeps a stable target. The proxy is
//! only despawned once the follow has ended and the track is gone.

use bevy::prelude::*;
use bevy_panorbit_camera::PanOrbitCamera;
use chrono::{DateTime, Utc};

use crate::traffic::store::Tracks;
use crate::traffic::{LayerKind, LayerSettings, TrafficLayer};

/// Marker for follow anchor entities.
#[derive(Component)]
pub struct FollowProxy;

/// A proxy whose follow has ended, waiting for its layer to decide whether
/// the entity can go.
#[derive(Debug)]
pub struct FollowRelease {
    pub kind: LayerKind,
    pub id: String,
    pub proxy: Entity,
}

#[derive(Debug, Default)]
enum FollowState {
    #[default]
    Unlocked,
    Locked {
        kind: LayerKind,
        id: String,
        proxy: Entity,
        distance_km: f32,
        /// Set when the followed id fell out of the feed.
        vanished_at: Option<DateTime<Utc>>,
    },
}

/// Global follow state machine. At most one lock at a time across all
/// layers; locking a new target releases the previous one.
#[derive(Resource)]
pub struct CameraFollow {
    state: FollowState,
    /// Per-frame blend toward the target view, normalized to 60 fps.
    pub smooth_factor: f32,
    pending_release: Vec<FollowRelease>,
}

impl Default for CameraFollow {
    fn default() -> Self {
        Self {
            state: FollowState::Unlocked,
            smooth_factor: 0.15,
            pending_release: Vec::new(),
        }
    }
}

impl CameraFollow {
    /// Lock onto a track. Locking the target already followed is a no-op;
    /// locking a different one releases the old proxy first.
    pub fn lock(&mut self, kind: LayerKind, id: &str, proxy: Entity, distance_km: f32) {
        if let FollowState::Locked {
            kind: cur_kind,
            id: cur_id,
            ..
        } = &self.state
        {
            if *cur_kind == kind && cur_id == id {
                return;
            }
        }
        self.unlock();
        self.state = FollowState::Locked {
            kind,
            id: id.to_string(),
            proxy,
            distance_km,
            vanished_at: None,
        };
    }

    /// Drop the lock. The proxy is handed to the pending release queue; its
    /// layer despawns it once the track is truly gone.
    pub fn unlock(&mut self) {
        if let FollowState::Locked {
            kind, id, proxy, ..
        } = std::mem::take(&mut self.state)
        {
            self.pending_release.push(FollowRelease { kind, id, proxy });
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, FollowState::Locked { .. })
    }

    pub fn is_locked_on(&self, kind: LayerKind, id: &str) -> bool {
        match &self.state {
            FollowState::Locked {
                kind: cur_kind,
                id: cur_id,
                ..
            } => *cur_kind == kind && cur_id == id,
            FollowState::Unlocked => false,
        }
    }

    /// The followed id, if the lock belongs to `kind`.
    pub fn locked_id(&self, kind: LayerKind) -> Option<&str> {
        match &self.state {
            FollowState::Locked {
                kind: cur_kind, id, ..
            } if *cur_kind == kind => Some(id),
            _ => None,
        }
    }

    pub fn proxy(&self) -> Option<Entity> {
        match &self.state {
            FollowState::Locked { proxy, .. } => Some(*proxy),
            FollowState::Unlocked => None,
        }
    }

    /// Configured camera distance beyond the followed object, in km.
    pub fn distance_km(&self) -> Option<f32> {
        match &self.state {
            FollowState::Locked { distance_km, .. } => Some(*distance_km),
            FollowState::Unlocked => None,
        }
    }

    pub fn adjust_distance_km(&mut self, factor: f32) {
        if let FollowState::Locked { distance_km, .. } = &mut self.state {
            *distance_km = (*distance_km * factor).clamp(5.0, 100_000.0);
        }
    }

    pub fn vanished_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            FollowState::Locked { vanished_at, .. } => *vanished_at,
            FollowState::Unlocked => None,
        }
    }

    /// Record that the followed id is missing from the feed. Returns the
    /// time the dropout started.
    pub fn note_vanished(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let FollowState::Locked { vanished_at, .. } = &mut self.state {
            *vanished_at.get_or_insert(now)
        } else {
            now
        }
    }

    pub fn note_reacquired(&mut self) {
        if let FollowState::Locked { vanished_at, .. } = &mut self.state {
            *vanished_at = None;
        }
    }

    /// Take the released proxies belonging to one layer.
    pub fn take_releases(&mut self, kind: LayerKind) -> Vec<FollowRelease> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for rel in self.pending_release.drain(..) {
            if rel.kind == kind {
                taken.push(rel);
            } else {
                kept.push(rel);
            }
        }
        self.pending_release = kept;
        taken
    }

    /// Forget a pending release without despawning, for teardown paths that
    /// despawn the proxy themselves.
    pub fn forget_release(&mut self, proxy: Entity) {
        self.pending_release.retain(|rel| rel.proxy != proxy);
    }
}

/// Fly the camera with the followed proxy: aim along the proxy's radial and
/// hold the configured distance beyond it, smoothing radius, pitch and yaw
/// toward the target every frame.
pub fn follow_camera(
    follow: Res<CameraFollow>,
    q_proxy: Query<&Transform, With<FollowProxy>>,
    mut q_camera: Query<
        (&mut PanOrbitCamera, &mut Transform),
        (With<Camera3d>, Without<FollowProxy>),
    >,
    time: Res<Time>,
) {
    let Some(proxy) = follow.proxy() else {
        return;
    };
    let Ok(anchor) = q_proxy.get(proxy) else {
        return;
    };
    let Some(offset) = follow.distance_km() else {
        return;
    };

    let anchor_pos = anchor.translation;
    let dir = anchor_pos.normalize_or_zero();
    if dir == Vec3::ZERO {
        return;
    }
    let target_pos = dir * (anchor_pos.length() + offset);
    let target_radius = target_pos.length();

    let direction = target_pos.normalize();
    let target_pitch = direction.y.asin();
    let target_yaw = direction.x.atan2(direction.z);

    if let Ok((mut poc, mut cam_transform)) = q_camera.single_mut() {
        let dt = time.delta_secs();
        let lerp_factor = 1.0 - (1.0 - follow.smooth_factor).powf(dt * 60.0);

        poc.target_radius = target_radius;
        poc.target_pitch = target_pitch;
        poc.target_yaw = target_yaw;
        poc.focus = Vec3::ZERO;

        if let Some(current_radius) = poc.radius {
            poc.radius = Some(current_radius + (target_radius - current_radius) * lerp_factor);
        } else {
            poc.radius = Some(target_radius);
        }

        if let Some(current_pitch) = poc.pitch {
            poc.pitch = Some(current_pitch + (target_pitch - current_pitch) * lerp_factor);
        } else {
            poc.pitch = Some(target_pitch);
        }

        if let Some(current_yaw) = poc.yaw {
            // Wrap so the camera takes the short way around.
            let mut yaw_diff = target_yaw - current_yaw;
            if yaw_diff > std::f32::consts::PI {
                yaw_diff -= 2.0 * std::f32::consts::PI;
            } else if yaw_diff < -std::f32::consts::PI {
                yaw_diff += 2.0 * std::f32::consts::PI;
            }
            poc.yaw = Some(current_yaw + yaw_diff * lerp_factor);
        } else {
            poc.yaw = Some(target_yaw);
        }

        // Write the transform too so the view moves this frame, not next.
        let current_radius = poc.radius.unwrap_or(target_radius);
        let current_pitch = poc.pitch.unwrap_or(target_pitch);
        let current_yaw = poc.yaw.unwrap_or(target_yaw);

        let camera_pos = Vec3::new(
            current_radius * current_pitch.cos() * current_yaw.sin(),
            current_radius * current_pitch.sin(),
            current_radius * current_pitch.cos() * current_yaw.cos(),
        );
        cam_transform.translation = camera_pos;
        cam_transform.look_at(Vec3::ZERO, Vec3::Y);
    }
}

/// Track feed dropout of the followed id and, when the layer is configured
/// for it, release the lock after the grace period.
pub fn watch_followed_track<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    tracks: Res<Tracks<K>>,
    mut follow: ResMut<CameraFollow>,
) {
    let Some(id) = follow.locked_id(K::KIND) else {
        return;
    };
    let id = id.to_string();

    if tracks.contains(&id) {
        follow.note_reacquired();
        return;
    }

    let now = Utc::now();
    if follow.vanished_at().is_none() {
        warn!(
            "followed {:?} track {} dropped out of the feed; holding last position",
            K::KIND,
            id
        );
    }
    let since = follow.note_vanished(now);
    if let Some(limit_secs) = settings.tuning.auto_unlock_after_secs {
        let waited = (now - since).num_milliseconds() as f32 / 1000.0;
        if waited >= limit_secs {
            info!(
                "followed {:?} track {} missing for {:.0}s; releasing camera",
                K::KIND,
                id,
                waited
            );
            follow.unlock();
        }
    }
}

/// Despawn released proxies once their track is gone. A track that came
/// back before the release keeps its proxy.
pub fn cleanup_released_proxies<K: TrafficLayer>(
    mut follow: ResMut<CameraFollow>,
    tracks: Res<Tracks<K>>,
    mut commands: Commands,
) {
    for rel in follow.take_releases(K::KIND) {
        if let Some(slot) = tracks.get(&rel.id) {
            if slot.proxy == Some(rel.proxy) {
                continue;
            }
        }
        if let Ok(mut entity) = commands.get_entity(rel.proxy) {
            entity.despawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_lock_same_target_is_idempotent() {
        let mut follow = CameraFollow::default();
        let proxy = Entity::PLACEHOLDER;
        follow.lock(LayerKind::Aircraft, "abc", proxy, 200.0);
        follow.note_vanished(t0());

        // Re-locking the same target must not reset or release anything.
        follow.lock(LayerKind::Aircraft, "abc", proxy, 200.0);
        assert!(follow.is_locked_on(LayerKind::Aircraft, "abc"));
        assert_eq!(follow.vanished_at(), Some(t0()));
        assert!(follow.take_releases(LayerKind::Aircraft).is_empty());
    }

    #[test]
    fn test_lock_new_target_releases_previous() {
        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Aircraft, "abc", Entity::PLACEHOLDER, 200.0);
        follow.lock(LayerKind::Vessels, "mmsi1", Entity::PLACEHOLDER, 150.0);

        assert!(follow.is_locked_on(LayerKind::Vessels, "mmsi1"));
        let released = follow.take_releases(LayerKind::Aircraft);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, "abc");
    }

    #[test]
    fn test_unlock_queues_release_for_owning_layer() {
        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Orbiters, "25544", Entity::PLACEHOLDER, 2000.0);
        follow.unlock();

        assert!(!follow.is_locked());
        assert!(follow.take_releases(LayerKind::Aircraft).is_empty());
        let released = follow.take_releases(LayerKind::Orbiters);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, "25544");
    }

    #[test]
    fn test_vanish_bookkeeping_keeps_first_timestamp() {
        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Aircraft, "abc", Entity::PLACEHOLDER, 200.0);

        let first = follow.note_vanished(t0());
        let later = follow.note_vanished(t0() + chrono::Duration::seconds(30));
        assert_eq!(first, t0());
        assert_eq!(later, t0());

        follow.note_reacquired();
        assert_eq!(follow.vanished_at(), None);
    }

    #[test]
    fn test_locked_id_is_layer_scoped() {
        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Vessels, "mmsi1", Entity::PLACEHOLDER, 150.0);
        assert_eq!(follow.locked_id(LayerKind::Vessels), Some("mmsi1"));
        assert_eq!(follow.locked_id(LayerKind::Aircraft), None);
    }

    #[test]
    fn test_followed_proxy_survives_batch_absence() {
        use crate::core::coordinates::Geodetic;
        use crate::feed::FeedRecord;
        use crate::traffic::class::ClassTag;
        use crate::traffic::store::{TrackFilter, TrackStore};

        let mut store = TrackStore::default();
        let rec = FeedRecord {
            id: "abc".to_string(),
            name: None,
            lat_deg: 10.0,
            lon_deg: 20.0,
            alt_m: 9_000.0,
            speed_m_s: Some(200.0),
            heading_deg: Some(90.0),
            timestamp: t0(),
            tag: ClassTag::Airliner,
        };
        store.commit(vec![rec], &TrackFilter::default());
        let proxy = Entity::PLACEHOLDER;
        store.get_mut("abc").unwrap().proxy = Some(proxy);

        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Aircraft, "abc", proxy, 200.0);

        // The next snapshot omits the track. The ingest pass must keep the
        // proxy alive because the follow still points at it.
        let summary = store.commit(Vec::new(), &TrackFilter::default());
        assert_eq!(summary.removed.len(), 1);
        assert_eq!(summary.removed[0].proxy, Some(proxy));
        assert!(follow.is_locked_on(LayerKind::Aircraft, "abc"));
        assert_eq!(follow.proxy(), Some(proxy));

        // Its last committed position is still usable for the camera.
        let last = Geodetic::from_degrees(10.0, 20.0, 9_000.0).unwrap();
        assert!((last.to_bevy_km().length() - 6380.0).abs() < 5.0);

        // Release with the track still absent: only now may the proxy go.
        follow.unlock();
        let released = follow.take_releases(LayerKind::Aircraft);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].proxy, proxy);
        assert!(!store.contains("abc"));
    }

    #[test]
    fn test_adjust_distance_clamps() {
        let mut follow = CameraFollow::default();
        follow.lock(LayerKind::Aircraft, "abc", Entity::PLACEHOLDER, 200.0);
        follow.adjust_distance_km(0.000_01);
        assert_eq!(follow.distance_km(), Some(5.0));
        follow.adjust_distance_km(1.0e9);
        assert_eq!(follow.distance_km(), Some(100_000.0));
    }
}

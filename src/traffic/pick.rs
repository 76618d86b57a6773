//! Pointer picking: click an icon to follow it, click open globe to let go.

use bevy::picking::events::{Click, Pointer};
use bevy::prelude::*;

use crate::globe::GlobeSurface;
use crate::traffic::follow::{CameraFollow, FollowProxy};
use crate::traffic::store::Tracks;
use crate::traffic::sync::{TrackIcon, TrackId};
use crate::traffic::{LayerSettings, TrafficLayer};

/// Lock the camera onto a clicked icon, creating its follow anchor on demand.
pub fn handle_icon_clicks<K: TrafficLayer>(
    mut click_events: MessageReader<Pointer<Click>>,
    q_icons: Query<(&TrackId, &Transform), (With<TrackIcon>, With<K>)>,
    mut tracks: ResMut<Tracks<K>>,
    mut follow: ResMut<CameraFollow>,
    settings: Res<LayerSettings<K>>,
    mut commands: Commands,
) {
    for ev in click_events.read() {
        let Ok((track_id, tf)) = q_icons.get(ev.entity) else {
            continue;
        };
        let id = track_id.0.clone();
        let Some(slot) = tracks.get_mut(&id) else {
            continue;
        };
        let proxy = match slot.proxy {
            Some(proxy) => proxy,
            None => {
                let proxy = commands
                    .spawn((
                        Transform::from_translation(tf.translation),
                        FollowProxy,
                        K::default(),
                    ))
                    .id();
                slot.proxy = Some(proxy);
                proxy
            }
        };
        follow.lock(K::KIND, &id, proxy, settings.tuning.follow_distance_km);
        info!(
            "picked {:?} [{}] {} ({})",
            K::KIND,
            slot.tag.label(),
            id,
            slot.name.as_deref().unwrap_or("unnamed")
        );
    }
}

/// Clicking the bare globe releases whatever is followed.
pub fn unlock_on_globe_click(
    mut click_events: MessageReader<Pointer<Click>>,
    q_globe: Query<(), With<GlobeSurface>>,
    mut follow: ResMut<CameraFollow>,
) {
    for ev in click_events.read() {
        if q_globe.contains(ev.entity) && follow.is_locked() {
            info!("follow released");
            follow.unlock();
        }
    }
}

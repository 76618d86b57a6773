//! Horizon culling: hide icons and labels when the globe is in front of them.
//!
//! The geometric test is a segment/sphere intersection from the camera to
//! each icon. A full pass over a layer runs right after that layer's bulk
//! reckon tick and after every commit; in between, only the followed track
//! is re-checked each frame so it cannot flicker while skimming the limb.

use bevy::prelude::*;
use std::collections::HashMap;

use crate::core::coordinates::{EARTH_RADIUS_KM, globe_occluded};
use crate::globe::MainCamera;
use crate::traffic::follow::CameraFollow;
use crate::traffic::store::Tracks;
use crate::traffic::sync::{LabelOf, TrackIcon, TrackLabel};
use crate::traffic::{BulkTimer, LayerSettings, TrafficLayer};

/// Test against a slightly sunken sphere so f32 jitter on surface objects
/// (ships at zero altitude) cannot land them inside the globe.
const OCCLUSION_CLEARANCE_KM: f64 = 2.0;

pub fn update_visibility<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    timer: Res<BulkTimer<K>>,
    follow: Res<CameraFollow>,
    tracks: Res<Tracks<K>>,
    mut last_generation: Local<u64>,
    q_camera: Query<&GlobalTransform, With<MainCamera>>,
    mut q_icons: Query<
        (Entity, &Transform, &mut Visibility),
        (With<TrackIcon>, With<K>, Without<TrackLabel>),
    >,
    mut q_labels: Query<
        (&mut Visibility, &LabelOf),
        (With<TrackLabel>, With<K>, Without<TrackIcon>),
    >,
) {
    if !settings.visible {
        return;
    }
    let Ok(cam) = q_camera.single() else {
        return;
    };

    // A settings flip reapplies blanket visibility just before this system,
    // so follow it with a full pass to restore the geometric result.
    let mut full_pass = timer.just_finished() || settings.is_changed();
    if tracks.generation() != *last_generation {
        // Fresh commit: icons may have snapped across the globe.
        *last_generation = tracks.generation();
        full_pass = true;
    }
    let followed_icon = follow
        .locked_id(K::KIND)
        .and_then(|id| tracks.get(id))
        .and_then(|slot| slot.icon);
    if !full_pass && followed_icon.is_none() {
        return;
    }

    let viewer = cam.translation().as_dvec3();
    let radius = EARTH_RADIUS_KM - OCCLUSION_CLEARANCE_KM;
    let range_sq = settings.tuning.label_range_km * settings.tuning.label_range_km;
    let cam_pos = cam.translation();

    // Icon visibility this pass, kept around for the matching labels.
    let mut fresh: HashMap<Entity, (bool, f32)> = HashMap::new();

    if full_pass {
        for (entity, tf, mut vis) in q_icons.iter_mut() {
            let visible = !globe_occluded(viewer, tf.translation.as_dvec3(), radius);
            *vis = if visible {
                Visibility::Visible
            } else {
                Visibility::Hidden
            };
            fresh.insert(entity, (visible, cam_pos.distance_squared(tf.translation)));
        }
    } else if let Some(icon) = followed_icon {
        if let Ok((entity, tf, mut vis)) = q_icons.get_mut(icon) {
            let visible = !globe_occluded(viewer, tf.translation.as_dvec3(), radius);
            *vis = if visible {
                Visibility::Visible
            } else {
                Visibility::Hidden
            };
            fresh.insert(entity, (visible, cam_pos.distance_squared(tf.translation)));
        }
    }

    if fresh.is_empty() {
        return;
    }
    for (mut vis, anchor) in q_labels.iter_mut() {
        let Some(&(icon_visible, dist_sq)) = fresh.get(&anchor.0) else {
            continue;
        };
        *vis = if icon_visible && settings.labels_enabled && dist_sq <= range_sq {
            Visibility::Visible
        } else {
            Visibility::Hidden
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::DVec3;

    #[test]
    fn test_clearance_keeps_surface_track_under_camera_visible() {
        // A ship at exactly sea level straight below the camera, with a bit
        // of f32 noise pushing it under the ideal sphere.
        let viewer = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM * 4.0);
        let ship = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM - 0.01);
        assert!(!globe_occluded(
            viewer,
            ship,
            EARTH_RADIUS_KM - OCCLUSION_CLEARANCE_KM
        ));
    }

    #[test]
    fn test_clearance_still_hides_far_side_surface_track() {
        let viewer = DVec3::new(0.0, 0.0, EARTH_RADIUS_KM * 4.0);
        let ship = DVec3::new(0.0, 0.0, -EARTH_RADIUS_KM);
        assert!(globe_occluded(
            viewer,
            ship,
            EARTH_RADIUS_KM - OCCLUSION_CLEARANCE_KM
        ));
    }
}

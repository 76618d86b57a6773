//! Scene synchronization: mirror the track arena into icons and labels.
//!
//! One ingest pass per layer drains the feed channel, commits each snapshot
//! to the store and then walks the outcome: spawn primitives for new tracks,
//! snap transforms of survivors to the fresh authoritative fix, despawn what
//! left. Everything is incremental; an unchanged track costs one transform
//! write and nothing else.

use bevy::mesh::{ConeAnchor, ConeMeshBuilder};
use bevy::picking::Pickable;
use bevy::prelude::*;
use chrono::Utc;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::feed::{FeedInbox, FeedMessage, FeedStatus};
use crate::globe::MainCamera;
use crate::traffic::class::ClassTag;
use crate::traffic::follow::CameraFollow;
use crate::traffic::store::Tracks;
use crate::traffic::{LayerSettings, TrafficLayer};

/// Marker for icon entities (the 3D cone at the track position).
#[derive(Component)]
pub struct TrackIcon;

/// Marker for the UI text label of a track.
#[derive(Component)]
pub struct TrackLabel;

/// Which icon a label is anchored to.
#[derive(Component)]
pub struct LabelOf(pub Entity);

/// Upstream id of the track an icon belongs to.
#[derive(Component, Clone)]
pub struct TrackId(pub String);

/// Tag the icon was last styled with, so material swaps only happen on change.
#[derive(Component)]
pub struct IconClass(pub ClassTag);

/// Shared render assets for one layer: a single unit cone plus one emissive
/// material per class, so the whole layer batches into a handful of draws.
#[derive(Resource)]
pub struct LayerAssets<K: Send + Sync + 'static> {
    pub icon_mesh: Handle<Mesh>,
    materials: HashMap<ClassTag, Handle<StandardMaterial>>,
    fallback: Handle<StandardMaterial>,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> LayerAssets<K> {
    pub fn material(&self, tag: ClassTag) -> Handle<StandardMaterial> {
        self.materials.get(&tag).unwrap_or(&self.fallback).clone()
    }
}

pub fn setup_layer_assets<K: TrafficLayer>(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // Unit-height cone, tip along +Y; per-track scale comes from the transform.
    let icon_mesh = meshes.add(ConeMeshBuilder::new(0.35, 1.0, 12).anchor(ConeAnchor::Base));

    let mut tag_materials = HashMap::new();
    for &tag in K::TAGS {
        let srgba = tag.color().to_srgba();
        tag_materials.insert(
            tag,
            materials.add(StandardMaterial {
                base_color: tag.color(),
                emissive: LinearRgba::new(
                    srgba.red * 2.0,
                    srgba.green * 2.0,
                    srgba.blue * 2.0,
                    1.0,
                ),
                unlit: true,
                ..default()
            }),
        );
    }
    let fallback = materials.add(StandardMaterial {
        base_color: ClassTag::Unclassified.color(),
        unlit: true,
        ..default()
    });

    commands.insert_resource(LayerAssets::<K> {
        icon_mesh,
        materials: tag_materials,
        fallback,
        _marker: PhantomData,
    });
}

/// Transform for an icon at a Bevy world position: sit on the position,
/// point the tip along the course over ground, or straight up off the globe
/// when no heading is known.
pub fn icon_transform(world_km: Vec3, heading_deg: Option<f64>, scale_km: f32) -> Transform {
    let mut up = world_km.normalize_or_zero();
    if up.length_squared() < 1e-6 {
        up = Vec3::Y;
    }

    let rotation = match heading_deg {
        Some(heading) => {
            // Tangent frame: Bevy +Y is the north pole axis.
            let east = Vec3::Y.cross(up);
            if east.length_squared() < 1e-10 {
                // On the pole the compass degenerates; point away from the globe.
                Quat::from_rotation_arc(Vec3::Y, up)
            } else {
                let east = east.normalize();
                let north = up.cross(east);
                let heading_rad = (heading as f32).to_radians();
                let dir = north * heading_rad.cos() + east * heading_rad.sin();
                Quat::from_rotation_arc(Vec3::Y, dir)
            }
        }
        None => Quat::from_rotation_arc(Vec3::Y, up),
    };

    Transform {
        translation: world_km,
        rotation,
        scale: Vec3::splat(scale_km),
    }
}

fn label_line(id: &str, name: Option<&str>) -> String {
    match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => id.to_string(),
    }
}

/// Drain the layer's feed channel and reconcile the scene with every
/// snapshot received this frame.
pub fn ingest_feed<K: TrafficLayer>(
    inbox: Option<Res<FeedInbox<K>>>,
    mut status: ResMut<FeedStatus<K>>,
    mut tracks: ResMut<Tracks<K>>,
    settings: Res<LayerSettings<K>>,
    follow: Res<CameraFollow>,
    assets: Res<LayerAssets<K>>,
    mut transforms: Query<&mut Transform>,
    mut q_icon_class: Query<
        (&mut IconClass, &mut MeshMaterial3d<StandardMaterial>),
        With<TrackIcon>,
    >,
    mut commands: Commands,
) {
    let Some(inbox) = inbox else { return };
    for msg in inbox.drain() {
        match msg {
            FeedMessage::Failure { error } => {
                warn!("{:?} feed error: {}", K::KIND, error);
                status.last_error = Some(error);
            }
            FeedMessage::Snapshot {
                records,
                fetched_at,
            } => {
                let received = records.len();
                let summary = tracks.commit(records, &settings.filter);
                status.last_snapshot_at = Some(fetched_at);
                status.last_snapshot_len = received;
                status.dropped_last_snapshot = summary.dropped;
                status.last_error = None;
                debug!(
                    "{:?} snapshot: {} records ({} new, {} updated, {} removed, {} dropped)",
                    K::KIND,
                    received,
                    summary.created,
                    summary.updated,
                    summary.removed.len(),
                    summary.dropped
                );

                for gone in &summary.removed {
                    if let Some(icon) = gone.icon {
                        commands.entity(icon).despawn();
                    }
                    if let Some(label) = gone.label {
                        commands.entity(label).despawn();
                    }
                    if let Some(proxy) = gone.proxy {
                        // A followed proxy outlives its track; the follow
                        // module despawns it after release.
                        if !follow.is_locked_on(K::KIND, &gone.id) {
                            commands.entity(proxy).despawn();
                        }
                    }
                }

                let icon_vis = if settings.visible {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                };
                let label_vis = if settings.visible && settings.labels_enabled {
                    Visibility::Visible
                } else {
                    Visibility::Hidden
                };

                for (id, slot) in tracks.iter_mut() {
                    let world = slot.kinematics.position.to_bevy_km();
                    let tf = icon_transform(
                        world,
                        slot.kinematics.heading_deg,
                        settings.tuning.icon_scale_km,
                    );
                    match slot.icon {
                        Some(icon) => {
                            // Snap back to the authoritative fix; bulk
                            // reckoning extrapolates from here again.
                            if let Ok(mut t) = transforms.get_mut(icon) {
                                *t = tf;
                            }
                            if let Ok((mut class, mut material)) = q_icon_class.get_mut(icon) {
                                if class.0 != slot.tag {
                                    class.0 = slot.tag;
                                    material.0 = assets.material(slot.tag);
                                    // Vessels reclassify when metadata joins.
                                    if let Some(label) = slot.label {
                                        commands.entity(label).insert(TextColor(slot.tag.color()));
                                    }
                                }
                            }
                        }
                        None => {
                            let icon = commands
                                .spawn((
                                    Mesh3d(assets.icon_mesh.clone()),
                                    MeshMaterial3d(assets.material(slot.tag)),
                                    tf,
                                    icon_vis,
                                    K::default(),
                                    TrackIcon,
                                    TrackId(id.clone()),
                                    IconClass(slot.tag),
                                    Pickable::default(),
                                ))
                                .id();
                            slot.icon = Some(icon);

                            let label = commands
                                .spawn((
                                    Text::new(label_line(id, slot.name.as_deref())),
                                    TextFont {
                                        font_size: 11.0,
                                        ..default()
                                    },
                                    TextColor(slot.tag.color()),
                                    Node {
                                        position_type: PositionType::Absolute,
                                        left: Val::Px(-10_000.0),
                                        top: Val::Px(0.0),
                                        ..default()
                                    },
                                    label_vis,
                                    K::default(),
                                    TrackLabel,
                                    LabelOf(icon),
                                ))
                                .id();
                            slot.label = Some(label);
                            slot.name_dirty = false;

                            // A follow may already be waiting on this id
                            // from before a feed dropout: hand it back its
                            // anchor instead of spawning a second one.
                            if slot.proxy.is_none() && follow.is_locked_on(K::KIND, id) {
                                slot.proxy = follow.proxy();
                            }
                        }
                    }
                    if let Some(proxy) = slot.proxy {
                        if let Ok(mut t) = transforms.get_mut(proxy) {
                            t.translation = world;
                        }
                    }
                }
            }
        }
    }
}

/// Rewrite label text after a late name arrives (AIS metadata, TLE rename).
pub fn refresh_label_text<K: TrafficLayer>(
    mut tracks: ResMut<Tracks<K>>,
    mut q_text: Query<&mut Text, With<TrackLabel>>,
) {
    for (id, slot) in tracks.iter_mut() {
        if !slot.name_dirty {
            continue;
        }
        let Some(label) = slot.label else {
            continue;
        };
        if let Ok(mut text) = q_text.get_mut(label) {
            *text = Text::new(label_line(id, slot.name.as_deref()));
            slot.name_dirty = false;
        }
    }
}

/// Pin each visible label next to its icon's screen position.
pub fn position_labels<K: TrafficLayer>(
    q_camera: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    q_icons: Query<&GlobalTransform, (With<TrackIcon>, With<K>)>,
    mut q_labels: Query<(&mut Node, &Visibility, &LabelOf), (With<TrackLabel>, With<K>)>,
) {
    let Ok((camera, cam_transform)) = q_camera.single() else {
        return;
    };
    for (mut node, vis, anchor) in q_labels.iter_mut() {
        if *vis == Visibility::Hidden {
            continue;
        }
        let Ok(icon_tf) = q_icons.get(anchor.0) else {
            continue;
        };
        match camera.world_to_viewport(cam_transform, icon_tf.translation()) {
            Ok(screen) => {
                node.left = Val::Px(screen.x + 10.0);
                node.top = Val::Px(screen.y - 12.0);
            }
            Err(_) => {
                // Behind the camera; park it offscreen until it comes back.
                node.left = Val::Px(-10_000.0);
            }
        }
    }
}

/// Push a visibility toggle out to every primitive of the layer.
pub fn apply_layer_visibility<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    mut q_icons: Query<&mut Visibility, (With<TrackIcon>, With<K>, Without<TrackLabel>)>,
    mut q_labels: Query<&mut Visibility, (With<TrackLabel>, With<K>, Without<TrackIcon>)>,
) {
    if !settings.is_changed() {
        return;
    }
    let icon_vis = if settings.visible {
        Visibility::Visible
    } else {
        Visibility::Hidden
    };
    let label_vis = if settings.visible && settings.labels_enabled {
        Visibility::Visible
    } else {
        Visibility::Hidden
    };
    for mut vis in q_icons.iter_mut() {
        *vis = icon_vis;
    }
    for mut vis in q_labels.iter_mut() {
        *vis = label_vis;
    }
}

/// Periodic one-line health report per layer.
pub fn report_feed_status<K: TrafficLayer>(
    status: Res<FeedStatus<K>>,
    tracks: Res<Tracks<K>>,
    time: Res<Time>,
    mut timer: Local<Option<Timer>>,
) {
    let timer = timer.get_or_insert_with(|| Timer::from_seconds(30.0, TimerMode::Repeating));
    timer.tick(time.delta());
    if !timer.just_finished() {
        return;
    }
    match status.last_snapshot_at {
        Some(at) => {
            let age_secs = (Utc::now() - at).num_seconds();
            info!(
                "{:?}: {} tracks, snapshot {}s old, {} dropped last batch",
                K::KIND,
                tracks.len(),
                age_secs,
                status.dropped_last_snapshot
            );
        }
        None => info!("{:?}: waiting for first snapshot", K::KIND),
    }
}

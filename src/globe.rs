//! Minimal globe scene: a procedural Earth sphere, a sun light and the
//! pan-orbit camera the follow systems steer.

use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::light::{GlobalAmbientLight, SunDisk};
use bevy::picking::Pickable;
use bevy::prelude::*;
use bevy_panorbit_camera::PanOrbitCamera;

use crate::core::coordinates::EARTH_RADIUS_KM;

/// Marker for the pickable Earth surface; clicking it releases the follow.
#[derive(Component)]
pub struct GlobeSurface;

/// Marker for the scene camera, used by the viewport and occlusion math.
#[derive(Component)]
pub struct MainCamera;

pub struct GlobePlugin;

impl Plugin for GlobePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_scene);
    }
}

fn setup_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // Keep the night side readable; icons are unlit but the globe is not.
    commands.insert_resource(GlobalAmbientLight {
        brightness: 150.0,
        ..default()
    });

    let globe = meshes.add(Sphere::new(EARTH_RADIUS_KM as f32).mesh().ico(6).unwrap());
    commands.spawn((
        Mesh3d(globe),
        MeshMaterial3d(materials.add(StandardMaterial {
            base_color: Color::srgb(0.05, 0.14, 0.22),
            perceptual_roughness: 1.0,
            ..default()
        })),
        Transform::from_xyz(0.0, 0.0, 0.0),
        Pickable::default(),
        GlobeSurface,
        Name::new("Globe"),
    ));

    let initial_distance = 25_000.0; // ~4x Earth's radius

    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            // World units are kilometers; the default far plane clips the scene.
            near: 1.0,
            far: 250_000.0,
            ..default()
        }),
        Camera {
            order: 0,
            clear_color: ClearColorConfig::Custom(Color::BLACK),
            ..default()
        },
        PanOrbitCamera {
            focus: Vec3::ZERO,
            radius: Some(initial_distance),
            yaw: Some(0.0),
            pitch: Some(0.0),
            force_update: true,
            ..default()
        },
        MainCamera,
        Tonemapping::TonyMcMapface,
        Transform::from_xyz(0.0, 0.0, initial_distance).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    let sun_distance = 150_000.0;
    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            ..default()
        },
        SunDisk::EARTH,
        Transform::from_xyz(0.0, 0.0, sun_distance).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}

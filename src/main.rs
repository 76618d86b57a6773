use bevy::picking::prelude::*;
use bevy::prelude::*;
use bevy::render::RenderPlugin;
use bevy::render::settings::{RenderCreation, WgpuSettings};
use bevy::window::{PresentMode, Window, WindowPlugin};

use bevy_panorbit_camera::PanOrbitCameraPlugin;

#[cfg(feature = "dev")]
use bevy::dev_tools::fps_overlay::FpsOverlayPlugin;

mod aircraft;
mod controls;
mod core;
mod feed;
mod globe;
mod orbiters;
mod traffic;
mod vessels;

use aircraft::AircraftPlugin;
use controls::ControlsPlugin;
use globe::GlobePlugin;
use orbiters::OrbitersPlugin;
use traffic::TrafficPlugin;
use vessels::VesselsPlugin;

fn main() {
    let mut app = App::new();

    app.add_plugins(
        DefaultPlugins
            .set(WindowPlugin {
                primary_window: Some(Window {
                    title: "Live Traffic Globe".to_string(),
                    present_mode: PresentMode::AutoVsync,
                    ..default()
                }),
                ..default()
            })
            .set(RenderPlugin {
                render_creation: RenderCreation::Automatic(WgpuSettings { ..default() }),
                ..default()
            }),
    );

    #[cfg(feature = "dev")]
    app.add_plugins(FpsOverlayPlugin::default());

    app.add_plugins(PanOrbitCameraPlugin);
    app.add_plugins(MeshPickingPlugin);

    app.add_plugins(GlobePlugin);
    app.add_plugins(TrafficPlugin);
    app.add_plugins(AircraftPlugin);
    app.add_plugins(VesselsPlugin);
    app.add_plugins(OrbitersPlugin);
    app.add_plugins(ControlsPlugin);

    app.run();
}

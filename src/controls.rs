//! Keyboard control surface.
//!
//! Everything the engine exposes programmatically (visibility, labels,
//! derived paths, clear, follow distance) is reachable from the keyboard,
//! so the whole contract stays operable without UI panels.

use bevy::prelude::*;

use crate::aircraft::Aircraft;
use crate::orbiters::Orbiters;
use crate::traffic::{CameraFollow, LayerSettings};
use crate::vessels::Vessels;

pub struct ControlsPlugin;

impl Plugin for ControlsPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, keyboard_controls);
    }
}

fn onoff(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

/// - `1` / `2` / `3` toggle the aircraft / vessel / orbiter layers
/// - `L` toggles labels, `P` toggles derived paths
/// - `+` / `-` move the follow camera closer or farther
/// - `X` clears all layers, `Esc` releases the follow
pub fn keyboard_controls(
    input: Res<ButtonInput<KeyCode>>,
    mut aircraft: ResMut<LayerSettings<Aircraft>>,
    mut vessels: ResMut<LayerSettings<Vessels>>,
    mut orbiters: ResMut<LayerSettings<Orbiters>>,
    mut follow: ResMut<CameraFollow>,
) {
    if input.just_pressed(KeyCode::Digit1) {
        aircraft.visible = !aircraft.visible;
        info!("aircraft layer {}", onoff(aircraft.visible));
    }
    if input.just_pressed(KeyCode::Digit2) {
        vessels.visible = !vessels.visible;
        info!("vessel layer {}", onoff(vessels.visible));
    }
    if input.just_pressed(KeyCode::Digit3) {
        orbiters.visible = !orbiters.visible;
        info!("orbiter layer {}", onoff(orbiters.visible));
    }

    if input.just_pressed(KeyCode::KeyL) {
        let show = !aircraft.labels_enabled;
        aircraft.labels_enabled = show;
        vessels.labels_enabled = show;
        orbiters.labels_enabled = show;
        info!("labels {}", onoff(show));
    }
    if input.just_pressed(KeyCode::KeyP) {
        let show = !aircraft.paths_enabled;
        aircraft.paths_enabled = show;
        vessels.paths_enabled = show;
        orbiters.paths_enabled = show;
        info!("derived paths {}", onoff(show));
    }

    if input.just_pressed(KeyCode::KeyX) {
        aircraft.clear_requested = true;
        vessels.clear_requested = true;
        orbiters.clear_requested = true;
        info!("clearing all layers");
    }

    if input.just_pressed(KeyCode::Escape) && follow.is_locked() {
        info!("follow released");
        follow.unlock();
    }

    if input.just_pressed(KeyCode::Equal) || input.just_pressed(KeyCode::NumpadAdd) {
        follow.adjust_distance_km(0.8);
    }
    if input.just_pressed(KeyCode::Minus) || input.just_pressed(KeyCode::NumpadSubtract) {
        follow.adjust_distance_km(1.25);
    }
}

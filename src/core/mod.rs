//! Shared math for the globe scene.
//!
//! Geodetic coordinates, ECEF/Bevy frame mapping, sidereal time and the
//! horizon occlusion test live here so every traffic layer agrees on them.

pub mod coordinates;

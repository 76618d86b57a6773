//! Dead reckoning between authoritative fixes.
//!
//! Feeds refresh every few seconds at best, so between commits every track
//! coasts along its last reported course. The followed track is advanced
//! every frame for smooth camera motion; everything else moves on the
//! layer's bulk timer.

use bevy::prelude::*;
use chrono::{DateTime, Utc};

use crate::core::coordinates::{Geodetic, normalize_lon_deg};
use crate::traffic::follow::CameraFollow;
use crate::traffic::store::{Kinematics, Tracks};
use crate::traffic::sync::icon_transform;
use crate::traffic::{BulkTimer, LayerSettings, TrafficLayer};

/// Meters per degree of latitude on the spherical model. Also the meters
/// per degree of longitude at the equator.
pub const METERS_PER_DEG: f64 = 111_320.0;

/// Advance a fix along its last known course using a locally-flat model:
/// the north component moves latitude, the east component moves longitude
/// shrunk by cos(latitude).
///
/// The fix is returned unchanged when the track is too old (at or past
/// `horizon_secs`), too slow, missing course data, or timestamped in the
/// future. Altitude is held; the feeds carry no usable vertical rate.
pub fn extrapolate(
    kin: &Kinematics,
    now: DateTime<Utc>,
    horizon_secs: f64,
    min_speed_m_s: f64,
) -> Geodetic {
    let last = kin.position;
    let (Some(speed), Some(heading)) = (kin.speed_m_s, kin.heading_deg) else {
        return last;
    };
    if speed < min_speed_m_s {
        return last;
    }
    let dt = (now - kin.updated_at).num_milliseconds() as f64 / 1000.0;
    if dt <= 0.0 || dt >= horizon_secs {
        return last;
    }

    let heading_rad = heading.to_radians();
    let north_m = heading_rad.cos() * speed * dt;
    let east_m = heading_rad.sin() * speed * dt;

    let lat_deg = (last.lat_deg + north_m / METERS_PER_DEG).clamp(-90.0, 90.0);
    let cos_lat = last.lat_deg.to_radians().cos();
    let lon_deg = if cos_lat.abs() < 1e-6 {
        // On the pole east and west stop meaning anything.
        last.lon_deg
    } else {
        normalize_lon_deg(last.lon_deg + east_m / (METERS_PER_DEG * cos_lat))
    };

    Geodetic {
        lat_deg,
        lon_deg,
        alt_m: last.alt_m,
    }
}

/// Periodic whole-layer pass: advance every track except the followed one
/// (which moves per frame) and write the results straight into the scene
/// transforms.
pub fn reckon_bulk<K: TrafficLayer>(
    time: Res<Time>,
    mut timer: ResMut<BulkTimer<K>>,
    settings: Res<LayerSettings<K>>,
    follow: Res<CameraFollow>,
    tracks: Res<Tracks<K>>,
    mut transforms: Query<&mut Transform>,
) {
    if !settings.visible {
        // Layer suspended: the timer holds so re-enabling resumes cleanly.
        return;
    }
    timer.tick(time.delta());
    if !timer.just_finished() {
        return;
    }

    let now = Utc::now();
    let tuning = settings.tuning;
    for (id, slot) in tracks.iter() {
        if follow.is_locked_on(K::KIND, id) {
            continue;
        }
        let pos = extrapolate(
            &slot.kinematics,
            now,
            tuning.horizon_secs.into(),
            tuning.min_speed_m_s,
        );
        let world = pos.to_bevy_km();
        if let Some(icon) = slot.icon {
            if let Ok(mut tf) = transforms.get_mut(icon) {
                *tf = icon_transform(world, slot.kinematics.heading_deg, tuning.icon_scale_km);
            }
        }
        if let Some(proxy) = slot.proxy {
            if let Ok(mut tf) = transforms.get_mut(proxy) {
                tf.translation = world;
            }
        }
    }
}

/// Per-frame pass for the followed track only.
pub fn reckon_followed<K: TrafficLayer>(
    settings: Res<LayerSettings<K>>,
    follow: Res<CameraFollow>,
    tracks: Res<Tracks<K>>,
    mut transforms: Query<&mut Transform>,
) {
    let Some(id) = follow.locked_id(K::KIND) else {
        return;
    };
    if !settings.visible {
        return;
    }
    let tuning = settings.tuning;
    let now = Utc::now();
    // A vanished followed track has no slot; its proxy simply keeps the
    // last transform it was given.
    let Some(slot) = tracks.get(id) else {
        return;
    };
    let pos = extrapolate(
        &slot.kinematics,
        now,
        tuning.horizon_secs.into(),
        tuning.min_speed_m_s,
    );
    let world = pos.to_bevy_km();
    if let Some(icon) = slot.icon {
        if let Ok(mut tf) = transforms.get_mut(icon) {
            *tf = icon_transform(world, slot.kinematics.heading_deg, tuning.icon_scale_km);
        }
    }
    if let Some(proxy) = slot.proxy {
        if let Ok(mut tf) = transforms.get_mut(proxy) {
            tf.translation = world;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPSILON: f64 = 1e-9;

    fn fix(lat: f64, lon: f64, speed: Option<f64>, heading: Option<f64>) -> Kinematics {
        Kinematics {
            position: Geodetic {
                lat_deg: lat,
                lon_deg: lon,
                alt_m: 10_000.0,
            },
            speed_m_s: speed,
            heading_deg: heading,
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn after(kin: &Kinematics, secs: f64) -> DateTime<Utc> {
        kin.updated_at + chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    #[test]
    fn test_eastward_at_equator_matches_flat_earth_rate() {
        // 100 m/s due east for 10 s is 1000 m, which at the equator is
        // 1000 / 111320 = 0.008983 degrees of longitude.
        let kin = fix(0.0, 0.0, Some(100.0), Some(90.0));
        let pos = extrapolate(&kin, after(&kin, 10.0), 120.0, 1.0);
        let expected = 1000.0 / METERS_PER_DEG;
        assert!((pos.lon_deg - expected).abs() < expected * 0.01);
        assert!(pos.lat_deg.abs() < EPSILON);
        assert!((pos.alt_m - 10_000.0).abs() < EPSILON);
    }

    #[test]
    fn test_northward_changes_latitude_only() {
        let kin = fix(45.0, 10.0, Some(200.0), Some(0.0));
        let pos = extrapolate(&kin, after(&kin, 30.0), 120.0, 1.0);
        assert!(pos.lat_deg > 45.0);
        assert!((pos.lon_deg - 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_longitude_rate_doubles_at_sixty_north() {
        let eq = fix(0.0, 0.0, Some(100.0), Some(90.0));
        let north = fix(60.0, 0.0, Some(100.0), Some(90.0));
        let d_eq = extrapolate(&eq, after(&eq, 10.0), 120.0, 1.0).lon_deg;
        let d_north = extrapolate(&north, after(&north, 10.0), 120.0, 1.0).lon_deg;
        // cos(60 deg) = 0.5, so the same ground distance covers twice the
        // longitude.
        assert!((d_north / d_eq - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_freezes_exactly_at_horizon() {
        let kin = fix(10.0, 20.0, Some(250.0), Some(45.0));
        let at_horizon = extrapolate(&kin, after(&kin, 120.0), 120.0, 1.0);
        assert!((at_horizon.lat_deg - 10.0).abs() < EPSILON);
        assert!((at_horizon.lon_deg - 20.0).abs() < EPSILON);

        let past_horizon = extrapolate(&kin, after(&kin, 500.0), 120.0, 1.0);
        assert!((past_horizon.lat_deg - 10.0).abs() < EPSILON);

        let just_inside = extrapolate(&kin, after(&kin, 119.9), 120.0, 1.0);
        assert!((just_inside.lat_deg - 10.0).abs() > EPSILON);
    }

    #[test]
    fn test_slow_mover_holds_position() {
        let kin = fix(10.0, 20.0, Some(0.2), Some(90.0));
        let pos = extrapolate(&kin, after(&kin, 60.0), 120.0, 1.0);
        assert!((pos.lon_deg - 20.0).abs() < EPSILON);
    }

    #[test]
    fn test_missing_course_holds_position() {
        let no_speed = fix(10.0, 20.0, None, Some(90.0));
        let no_heading = fix(10.0, 20.0, Some(100.0), None);
        assert_eq!(extrapolate(&no_speed, after(&no_speed, 10.0), 120.0, 1.0), no_speed.position);
        assert_eq!(
            extrapolate(&no_heading, after(&no_heading, 10.0), 120.0, 1.0),
            no_heading.position
        );
    }

    #[test]
    fn test_future_timestamp_holds_position() {
        let kin = fix(10.0, 20.0, Some(100.0), Some(90.0));
        let pos = extrapolate(&kin, after(&kin, -5.0), 120.0, 1.0);
        assert_eq!(pos, kin.position);
    }

    #[test]
    fn test_longitude_wraps_across_dateline() {
        let kin = fix(0.0, 179.999, Some(300.0), Some(90.0));
        let pos = extrapolate(&kin, after(&kin, 60.0), 120.0, 1.0);
        assert!(pos.lon_deg < 0.0, "lon should wrap, got {}", pos.lon_deg);
        assert!(pos.lon_deg > -180.5);
    }

    #[test]
    fn test_pole_keeps_longitude() {
        let kin = fix(90.0, 45.0, Some(100.0), Some(90.0));
        let pos = extrapolate(&kin, after(&kin, 10.0), 120.0, 1.0);
        assert!((pos.lon_deg - 45.0).abs() < EPSILON);
        assert!(pos.lat_deg <= 90.0);
    }

    #[test]
    fn test_latitude_clamped_at_pole() {
        let kin = fix(89.9999, 0.0, Some(5000.0), Some(0.0));
        let pos = extrapolate(&kin, after(&kin, 100.0), 120.0, 1.0);
        assert!(pos.lat_deg <= 90.0);
    }
}

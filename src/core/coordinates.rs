//! Geodetic and Earth-frame math shared by every traffic layer.
//!
//! Covers the geodetic (lat/lon/alt) position type and its validation, the
//! spherical-Earth mapping into Bevy world space (kilometers), sidereal time
//! for TEME -> ECEF rotation, and the segment/globe occlusion test used to
//! hide icons behind the horizon.

use bevy::math::{DVec3, Vec3};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Spherical Earth radius used for all rendering math.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Earth rotation rate in rad/s (IAU value), for TEME velocity conversion.
pub const EARTH_ROTATION_RAD_PER_S: f64 = 7.292_115_0e-5;

#[derive(Debug)]
pub struct CoordError {
    pub msg: String,
}

/// A validated geodetic position. Latitude and longitude in degrees,
/// altitude in meters above the spherical sea level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Geodetic {
    /// Validates ranges and finiteness. Feed records that fail here are
    /// dropped by the ingest path rather than propagated.
    pub fn from_degrees(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Result<Self, CoordError> {
        if !lat_deg.is_finite() || !(-90.0..=90.0).contains(&lat_deg) {
            return Err(CoordError {
                msg: format!("Invalid latitude: {:?}", lat_deg),
            });
        }
        if !lon_deg.is_finite() || !(-180.0..=180.0).contains(&lon_deg) {
            return Err(CoordError {
                msg: format!("Invalid longitude: {:?}", lon_deg),
            });
        }
        if !alt_m.is_finite() {
            return Err(CoordError {
                msg: format!("Invalid altitude: {:?}", alt_m),
            });
        }
        Ok(Geodetic {
            lat_deg,
            lon_deg,
            alt_m,
        })
    }

    /// Geocentric ECEF position in kilometers.
    pub fn to_ecef_km(&self) -> DVec3 {
        let lat = self.lat_deg.to_radians();
        let lon = self.lon_deg.to_radians();
        let r = EARTH_RADIUS_KM + self.alt_m / 1000.0;
        let mut cos_lat = lat.cos();
        // Clamp the residual ring radius at the poles so 90 deg maps exactly
        // onto the axis instead of a mm-scale circle.
        if (std::f64::consts::FRAC_PI_2 - lat.abs()).abs() < 1e-7 {
            cos_lat = 0.0;
        }
        DVec3::new(cos_lat * lon.cos() * r, cos_lat * lon.sin() * r, lat.sin() * r)
    }

    /// Bevy world position in kilometers (f32 at the render edge).
    pub fn to_bevy_km(&self) -> Vec3 {
        ecef_to_bevy_km(self.to_ecef_km())
    }
}

/// Inverse of [`Geodetic::to_ecef_km`] on the spherical model.
pub fn ecef_to_geodetic(ecef_km: DVec3) -> Geodetic {
    let r = ecef_km.length();
    if r == 0.0 {
        return Geodetic {
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_m: -EARTH_RADIUS_KM * 1000.0,
        };
    }
    Geodetic {
        lat_deg: (ecef_km.z / r).asin().to_degrees(),
        lon_deg: ecef_km.y.atan2(ecef_km.x).to_degrees(),
        alt_m: (r - EARTH_RADIUS_KM) * 1000.0,
    }
}

/// Wraps a longitude into [-180, 180).
pub fn normalize_lon_deg(lon_deg: f64) -> f64 {
    let mut lon = (lon_deg + 180.0) % 360.0;
    if lon < 0.0 {
        lon += 360.0;
    }
    lon - 180.0
}

/// Destination point along a great circle given an initial compass bearing
/// and a distance over ground. Altitude is carried through unchanged.
pub fn great_circle_destination(start: &Geodetic, bearing_deg: f64, distance_km: f64) -> Geodetic {
    let lat1 = start.lat_deg.to_radians();
    let lon1 = start.lon_deg.to_radians();
    let bearing = bearing_deg.to_radians();
    let delta = distance_km / EARTH_RADIUS_KM;

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    Geodetic {
        lat_deg: lat2.to_degrees().clamp(-90.0, 90.0),
        lon_deg: normalize_lon_deg(lon2.to_degrees()),
        alt_m: start.alt_m,
    }
}

/// Remap ECEF axes to Bevy world coordinates in kilometers.
/// Mapping: Bevy (x, y, z) = (ECEF.y, ECEF.z, ECEF.x)
pub fn ecef_to_bevy_km(ecef: DVec3) -> Vec3 {
    Vec3::new(ecef.y as f32, ecef.z as f32, ecef.x as f32)
}

/// Inverse of [`ecef_to_bevy_km`].
pub fn bevy_to_ecef_km(world: Vec3) -> DVec3 {
    DVec3::new(world.z as f64, world.x as f64, world.y as f64)
}

/// True if the straight segment from `viewer_km` to `target_km` dips into the
/// sphere of `radius_km` around the origin, i.e. the globe hides the target.
///
/// Solves |V + t u|^2 = R^2 for the segment parameter t and reports a hit
/// only for roots strictly inside the segment. Grazing contact at either
/// endpoint does not count, so a target sitting exactly on the surface
/// beneath the viewer stays visible.
pub fn globe_occluded(viewer_km: DVec3, target_km: DVec3, radius_km: f64) -> bool {
    let u = target_km - viewer_km;

    // (u.u) t^2 + 2 (V.u) t + (V.V - R^2) = 0
    let a = u.length_squared();
    if a == 0.0 {
        return false;
    }
    let b = 2.0_f64 * viewer_km.dot(u);
    let c_term = viewer_km.length_squared() - radius_km * radius_km;

    let discr = b * b - 4.0_f64 * a * c_term;
    if discr < 0.0 {
        return false;
    }

    let sqrt_d = discr.sqrt();
    let t1 = (-b - sqrt_d) / (2.0_f64 * a);
    let t2 = (-b + sqrt_d) / (2.0_f64 * a);

    let eps = 1e-6_f64;
    (t1 > eps && t1 < 1.0 - eps) || (t2 > eps && t2 < 1.0 - eps)
}

// ========================= Time and frame rotation =========================

/// Compute the Julian Date (UTC) for a given timestamp.
/// Uses the standard Gregorian calendar to JD conversion.
pub fn julian_date_utc(t: DateTime<Utc>) -> f64 {
    let mut y = t.year();
    let mut m = t.month() as i32;
    let d = t.day() as i32;

    let hour = t.hour() as f64;
    let minute = t.minute() as f64;
    let sec = t.second() as f64 + (t.nanosecond() as f64) * 1e-9_f64;
    let day_fraction = (hour + (minute + sec / 60.0) / 60.0) / 24.0;

    if m <= 2 {
        y -= 1;
        m += 12;
    }

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    let jd0 = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * ((m + 1) as f64)).floor()
        + d as f64
        + b
        - 1524.5;

    jd0 + day_fraction
}

/// Greenwich Mean Sidereal Time (radians) using the IAU 1982 polynomial.
/// Assumes UT1 ~= UTC, which is plenty for visualization.
pub fn gmst_rad(t: DateTime<Utc>) -> f64 {
    let jd = julian_date_utc(t);
    let t_cent = (jd - 2451545.0) / 36525.0; // Julian centuries from J2000.0

    let gmst_sec =
        67310.54841 + (876600.0 * 3600.0 + 8640184.812866) * t_cent + 0.093104 * t_cent * t_cent
            - 6.2e-6 * t_cent * t_cent * t_cent;

    let sec_in_day = 86400.0_f64;
    let mut s = gmst_sec % sec_in_day;
    if s < 0.0 {
        s += sec_in_day;
    }

    s * (std::f64::consts::TAU / sec_in_day)
}

/// Rotate ECI (TEME) -> ECEF by GMST about the Z axis.
pub fn eci_to_ecef_km(eci: DVec3, gmst: f64) -> DVec3 {
    let (s, c) = gmst.sin_cos();
    let x = c * eci.x + s * eci.y;
    let y = -s * eci.x + c * eci.y;
    DVec3::new(x, y, eci.z)
}

/// Rotate a TEME velocity into the rotating ECEF frame. The frame rotation
/// contributes -omega x r on top of the rotated inertial velocity.
pub fn eci_to_ecef_velocity_km_s(v_eci: DVec3, r_ecef_km: DVec3, gmst: f64) -> DVec3 {
    let omega = DVec3::new(0.0, 0.0, EARTH_ROTATION_RAD_PER_S);
    eci_to_ecef_km(v_eci, gmst) - omega.cross(r_ecef_km)
}

/// Horizontal ground-track speed (m/s) and compass bearing (degrees, 0 = north,
/// 90 = east) of an ECEF velocity at an ECEF position.
pub fn ground_track_of_ecef_velocity(r_ecef_km: DVec3, v_ecef_km_s: DVec3) -> (f64, f64) {
    let up = r_ecef_km.normalize_or_zero();
    let mut east = DVec3::Z.cross(up);
    if east.length_squared() < 1e-12 {
        // Directly over a pole; pick an arbitrary east.
        east = DVec3::Y;
    }
    let east = east.normalize();
    let north = up.cross(east);

    let v_east = v_ecef_km_s.dot(east);
    let v_north = v_ecef_km_s.dot(north);
    let speed_m_s = (v_east * v_east + v_north * v_north).sqrt() * 1000.0;
    let mut bearing_deg = v_east.atan2(v_north).to_degrees();
    if bearing_deg < 0.0 {
        bearing_deg += 360.0;
    }
    (speed_m_s, bearing_deg)
}

// =================================== Tests ===================================

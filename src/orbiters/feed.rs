//! Orbiter feed worker: Celestrak group TLEs propagated with SGP4.
//!
//! Unlike the other feeds there is no upstream position stream; the worker
//! fetches the element set (disk-cached, refreshed every few hours), builds
//! one SGP4 propagator per object and then emits complete position
//! snapshots on its own clock. A command channel lets the ECS side ask for
//! a full future orbit of one object when it becomes the follow target.

use bevy::math::DVec3;
use bevy::prelude::*;
use chrono::{DateTime, Duration, Utc};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use super::Orbiters;
use super::tle::{CachedGroup, GroupCache, GroupTle, parse_group};
use crate::core::coordinates::{
    EARTH_RADIUS_KM, ecef_to_geodetic, eci_to_ecef_km, eci_to_ecef_velocity_km_s, Geodetic,
    gmst_rad, ground_track_of_ecef_velocity,
};
use crate::feed::{FeedInbox, FeedMessage, FeedRecord, fetch_body};
use crate::traffic::class::ClassTag;

const GROUP: &str = "active";
const TLE_URL: &str = "https://celestrak.org/NORAD/elements/gp.php?GROUP=active&FORMAT=tle";
/// Seconds between emitted position snapshots.
const SAMPLE_SECS: u64 = 2;
/// Refresh the element set this often; also the disk cache expiry.
const TLE_MAX_AGE_HOURS: i64 = 6;
/// Samples along one requested future orbit.
const PATH_SAMPLES: u32 = 128;

/// Standard gravitational parameter of Earth, km^3/s^2.
const MU_KM3_S2: f64 = 398_600.4418;

/// Commands for the orbiter worker thread.
#[derive(Debug)]
pub enum OrbiterCommand {
    /// Propagate one full orbit ahead for the given object.
    PlanPath { norad: u64 },
}

/// A future orbit returned by the worker.
pub struct PlannedTrack {
    pub id: String,
    pub points: Vec<Geodetic>,
}

/// Resource with the command and path channels of the orbiter worker.
#[derive(Resource)]
pub struct OrbiterChannels {
    pub cmd_tx: Sender<OrbiterCommand>,
    pub path_rx: Arc<Mutex<Receiver<PlannedTrack>>>,
}

pub fn setup_orbiter_worker(mut commands: Commands) {
    let (inbox, channels) = start_orbiter_worker();
    println!("[INIT] Orbit worker started");
    commands.insert_resource(inbox);
    commands.insert_resource(channels);
}

struct Orbiter {
    norad: u64,
    name: Option<String>,
    constants: sgp4::Constants,
    epoch_utc: DateTime<Utc>,
    period_min: f64,
    tag: ClassTag,
}

fn start_orbiter_worker() -> (FeedInbox<Orbiters>, OrbiterChannels) {
    let (snap_tx, snap_rx) = mpsc::channel::<FeedMessage>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<OrbiterCommand>();
    let (path_tx, path_rx) = mpsc::channel::<PlannedTrack>();

    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async move {
            let client = reqwest::Client::new();
            let cache = match GroupCache::new(TLE_MAX_AGE_HOURS) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    eprintln!("[TLE] no disk cache available: {e:#}");
                    None
                }
            };

            let mut orbiters: Vec<Orbiter> = Vec::new();
            let mut loaded_at: Option<Instant> = None;

            loop {
                let stale = loaded_at
                    .map(|t| t.elapsed().as_secs() as i64 >= TLE_MAX_AGE_HOURS * 3600)
                    .unwrap_or(true);
                if stale {
                    match load_group_text(&client, cache.as_ref()).await {
                        Ok(text) => {
                            orbiters = build_propagators(&text);
                            loaded_at = Some(Instant::now());
                            println!("[TLE] {} propagators from group '{}'", orbiters.len(), GROUP);
                        }
                        Err(e) => {
                            eprintln!("[TLE] group load failed: {e:#}");
                            if orbiters.is_empty() {
                                if snap_tx
                                    .send(FeedMessage::Failure {
                                        error: e.to_string(),
                                    })
                                    .is_err()
                                {
                                    break;
                                }
                                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                                continue;
                            }
                            // Keep flying on the stale element set.
                            loaded_at = Some(Instant::now());
                        }
                    }
                }

                while let Ok(cmd) = cmd_rx.try_recv() {
                    match cmd {
                        OrbiterCommand::PlanPath { norad } => {
                            if let Some(orb) = orbiters.iter().find(|o| o.norad == norad) {
                                let track = plan_orbit_path(orb, Utc::now());
                                if path_tx.send(track).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }

                let records = sample_snapshot(&orbiters, Utc::now());
                if snap_tx
                    .send(FeedMessage::Snapshot {
                        records,
                        fetched_at: Utc::now(),
                    })
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(SAMPLE_SECS)).await;
            }
        });
    });

    (
        FeedInbox::new(snap_rx),
        OrbiterChannels {
            cmd_tx,
            path_rx: Arc::new(Mutex::new(path_rx)),
        },
    )
}

/// Group text from disk cache when fresh, otherwise the network, falling
/// back to a stale cache entry if the fetch fails.
async fn load_group_text(
    client: &reqwest::Client,
    cache: Option<&GroupCache>,
) -> anyhow::Result<String> {
    if let Some(cache) = cache {
        match cache.read(GROUP) {
            Ok(Some(entry)) if cache.is_valid(&entry) => {
                println!("[TLE] using cached group '{}'", GROUP);
                return Ok(entry.text);
            }
            Ok(_) => {}
            Err(e) => eprintln!("[TLE] cache read failed: {e:#}"),
        }
    }

    match fetch_body(client, TLE_URL).await {
        Ok(text) => {
            if let Some(cache) = cache {
                let entry = CachedGroup {
                    group: GROUP.to_string(),
                    text: text.clone(),
                    fetched_at: Utc::now(),
                };
                if let Err(e) = cache.write(&entry) {
                    eprintln!("[TLE] cache write failed: {e:#}");
                }
            }
            Ok(text)
        }
        Err(fetch_err) => {
            if let Some(cache) = cache {
                if let Ok(Some(entry)) = cache.read(GROUP) {
                    eprintln!("[TLE] fetch failed, using stale cache: {fetch_err:#}");
                    return Ok(entry.text);
                }
            }
            Err(fetch_err)
        }
    }
}

fn build_propagators(text: &str) -> Vec<Orbiter> {
    let parsed = parse_group(text);
    let mut out = Vec::with_capacity(parsed.len());
    let mut rejected = 0usize;
    for tle in &parsed {
        match propagator_from_tle(tle) {
            Some(orbiter) => out.push(orbiter),
            None => rejected += 1,
        }
    }
    if rejected > 0 {
        eprintln!("[SGP4] {} element sets rejected", rejected);
    }
    out
}

fn propagator_from_tle(tle: &GroupTle) -> Option<Orbiter> {
    let elements =
        sgp4::Elements::from_tle(tle.name.clone(), tle.line1.as_bytes(), tle.line2.as_bytes())
            .ok()?;
    let constants = sgp4::Constants::from_elements(&elements).ok()?;
    if elements.mean_motion <= 0.0 {
        return None;
    }
    Some(Orbiter {
        norad: tle.norad,
        name: tle.name.clone(),
        constants,
        epoch_utc: tle.epoch_utc,
        period_min: 1440.0 / elements.mean_motion,
        tag: classify(elements.mean_motion, elements.eccentricity),
    })
}

/// Orbit regime from the mean motion (via semi-major axis) and eccentricity.
pub fn classify(mean_motion_rev_day: f64, eccentricity: f64) -> ClassTag {
    if !(mean_motion_rev_day > 0.0) {
        return ClassTag::Unclassified;
    }
    if eccentricity > 0.25 {
        return ClassTag::EllipticalOrbiter;
    }
    let n_rad_s = mean_motion_rev_day * std::f64::consts::TAU / 86_400.0;
    let a_km = (MU_KM3_S2 / (n_rad_s * n_rad_s)).cbrt();
    let mean_alt_km = a_km - EARTH_RADIUS_KM;
    if mean_alt_km < 2_000.0 {
        ClassTag::LeoSatellite
    } else if mean_alt_km < 35_000.0 {
        ClassTag::MeoSatellite
    } else {
        ClassTag::GeoSatellite
    }
}

fn minutes_since_epoch(now: DateTime<Utc>, epoch: DateTime<Utc>) -> f64 {
    let delta = now - epoch;
    delta.num_seconds() as f64 / 60.0 + delta.subsec_nanos() as f64 / 60.0 / 1.0e9
}

/// TEME state at `at` mapped into a geodetic record with ground speed and
/// bearing. `None` when the propagator rejects the time (decayed object).
fn sample_orbiter(orb: &Orbiter, at: DateTime<Utc>, gmst: f64) -> Option<FeedRecord> {
    let mins = minutes_since_epoch(at, orb.epoch_utc);
    let state = orb.constants.propagate(sgp4::MinutesSinceEpoch(mins)).ok()?;

    let teme = DVec3::new(state.position[0], state.position[1], state.position[2]);
    let v_teme = DVec3::new(state.velocity[0], state.velocity[1], state.velocity[2]);
    let ecef = eci_to_ecef_km(teme, gmst);
    let geo = ecef_to_geodetic(ecef);
    let v_ecef = eci_to_ecef_velocity_km_s(v_teme, ecef, gmst);
    let (speed_m_s, bearing_deg) = ground_track_of_ecef_velocity(ecef, v_ecef);

    Some(FeedRecord {
        id: orb.norad.to_string(),
        name: orb.name.clone(),
        lat_deg: geo.lat_deg,
        lon_deg: geo.lon_deg,
        alt_m: geo.alt_m,
        speed_m_s: Some(speed_m_s),
        heading_deg: Some(bearing_deg),
        timestamp: at,
        tag: orb.tag,
    })
}

fn sample_snapshot(orbiters: &[Orbiter], now: DateTime<Utc>) -> Vec<FeedRecord> {
    let gmst = gmst_rad(now);
    orbiters
        .iter()
        .filter_map(|orb| sample_orbiter(orb, now, gmst))
        .collect()
}

/// One full orbit ahead of `now`, in the Earth-fixed frame the viewer sees,
/// so every future sample uses the sidereal time of its own instant.
fn plan_orbit_path(orb: &Orbiter, now: DateTime<Utc>) -> PlannedTrack {
    let mut points = Vec::with_capacity(PATH_SAMPLES as usize + 1);
    let period_ms = (orb.period_min * 60_000.0) as i64;
    for i in 0..=PATH_SAMPLES {
        let at = now + Duration::milliseconds(period_ms * i as i64 / PATH_SAMPLES as i64);
        let mins = minutes_since_epoch(at, orb.epoch_utc);
        let Ok(state) = orb.constants.propagate(sgp4::MinutesSinceEpoch(mins)) else {
            continue;
        };
        let teme = DVec3::new(state.position[0], state.position[1], state.position[2]);
        let ecef = eci_to_ecef_km(teme, gmst_rad(at));
        points.push(ecef_to_geodetic(ecef));
    }
    PlannedTrack {
        id: orb.norad.to_string(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbiters::tle::epoch_from_line1;
    use chrono::TimeZone;

    const ISS_L1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const ISS_L2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn iss() -> Orbiter {
        let tle = GroupTle {
            norad: 25544,
            name: Some("ISS (ZARYA)".to_string()),
            line1: ISS_L1.to_string(),
            line2: ISS_L2.to_string(),
            epoch_utc: epoch_from_line1(ISS_L1).unwrap(),
        };
        propagator_from_tle(&tle).expect("ISS TLE must build")
    }

    #[test]
    fn test_classify_orbit_regimes() {
        assert_eq!(classify(15.72, 0.0006), ClassTag::LeoSatellite);
        assert_eq!(classify(2.0056, 0.001), ClassTag::MeoSatellite); // GPS-like
        assert_eq!(classify(1.0027, 0.0002), ClassTag::GeoSatellite);
        assert_eq!(classify(2.0064, 0.74), ClassTag::EllipticalOrbiter); // Molniya-like
        assert_eq!(classify(0.0, 0.0), ClassTag::Unclassified);
    }

    #[test]
    fn test_minutes_since_epoch() {
        let epoch = Utc.with_ymd_and_hms(2008, 9, 20, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2008, 9, 20, 13, 30, 0).unwrap();
        assert!((minutes_since_epoch(now, epoch) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_orbiter_near_epoch_is_leo() {
        let orb = iss();
        let at = orb.epoch_utc + Duration::minutes(10);
        let rec = sample_orbiter(&orb, at, gmst_rad(at)).expect("propagation near epoch");

        assert_eq!(rec.id, "25544");
        assert_eq!(rec.tag, ClassTag::LeoSatellite);
        // LEO altitude band and inclination-bounded latitude.
        assert!(rec.alt_m > 250_000.0 && rec.alt_m < 500_000.0, "alt {}", rec.alt_m);
        assert!(rec.lat_deg.abs() <= 52.0);
        // Orbital ground speed is in the 7 km/s range.
        let speed = rec.speed_m_s.unwrap();
        assert!(speed > 6_000.0 && speed < 8_500.0, "speed {}", speed);
        let bearing = rec.heading_deg.unwrap();
        assert!((0.0..360.0).contains(&bearing));
    }

    #[test]
    fn test_plan_orbit_path_covers_one_period() {
        let orb = iss();
        let now = orb.epoch_utc + Duration::minutes(5);
        let track = plan_orbit_path(&orb, now);

        assert_eq!(track.id, "25544");
        assert_eq!(track.points.len(), PATH_SAMPLES as usize + 1);
        // Every sample stays in the LEO shell.
        for p in &track.points {
            assert!(p.alt_m > 200_000.0 && p.alt_m < 600_000.0);
        }
        // First point matches an instantaneous sample at the same time.
        let rec = sample_orbiter(&orb, now, gmst_rad(now)).unwrap();
        assert!((track.points[0].lat_deg - rec.lat_deg).abs() < 1e-6);
        assert!((track.points[0].lon_deg - rec.lon_deg).abs() < 1e-6);
    }
}

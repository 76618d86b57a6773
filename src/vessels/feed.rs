//! AIS feed worker (Digitraffic marine API, Baltic coverage).
//!
//! Positions and vessel metadata live on separate endpoints with very
//! different change rates, so the worker polls locations every cycle and
//! refreshes the metadata table only occasionally, joining the two by MMSI
//! before a snapshot goes out. A vessel whose metadata has not arrived yet
//! shows up unnamed and unclassified; the next snapshot after the metadata
//! refresh quietly upgrades it.

use bevy::prelude::*;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use super::Vessels;
use crate::feed::{FeedInbox, FeedMessage, FeedRecord, fetch_body, get_f64, get_i64, get_string};
use crate::traffic::class::ClassTag;

const LOCATIONS_URL: &str = "https://meri.digitraffic.fi/api/ais/v1/locations";
const METADATA_URL: &str = "https://meri.digitraffic.fi/api/ais/v1/vessels";
const POLL_SECS: u64 = 10;
/// Metadata refresh period, in poll cycles (10 min at a 10 s poll).
const META_EVERY_CYCLES: u64 = 60;

const KNOTS_TO_M_S: f64 = 0.514_444;
/// AIS sentinel values for "not available".
const SOG_UNAVAILABLE_KNOTS: f64 = 102.3;
const HEADING_UNAVAILABLE: f64 = 511.0;

#[derive(Debug, Clone)]
pub struct VesselMeta {
    pub name: Option<String>,
    pub tag: ClassTag,
}

pub fn setup_vessel_worker(mut commands: Commands) {
    let inbox = start_vessel_worker();
    println!("[INIT] AIS worker started");
    commands.insert_resource(inbox);
}

fn start_vessel_worker() -> FeedInbox<Vessels> {
    let (tx, rx) = mpsc::channel::<FeedMessage>();

    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async move {
            let client = reqwest::Client::new();
            let mut meta: HashMap<u64, VesselMeta> = HashMap::new();
            let mut cycle: u64 = 0;

            loop {
                if cycle % META_EVERY_CYCLES == 0 {
                    match fetch_metadata(&client).await {
                        Ok(table) => {
                            println!("[AIS] metadata for {} vessels", table.len());
                            meta = table;
                        }
                        // Keep the stale table; names degrade, positions don't.
                        Err(e) => eprintln!("[AIS] metadata fetch failed: {e:#}"),
                    }
                }
                cycle += 1;

                let msg = match fetch_locations(&client, &meta).await {
                    Ok(records) => FeedMessage::Snapshot {
                        records,
                        fetched_at: Utc::now(),
                    },
                    Err(e) => {
                        eprintln!("[AIS] fetch failed: {e:#}");
                        FeedMessage::Failure {
                            error: e.to_string(),
                        }
                    }
                };
                if tx.send(msg).is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(POLL_SECS)).await;
            }
        });
    });

    FeedInbox::new(rx)
}

async fn fetch_locations(
    client: &reqwest::Client,
    meta: &HashMap<u64, VesselMeta>,
) -> anyhow::Result<Vec<FeedRecord>> {
    let body = fetch_body(client, LOCATIONS_URL).await?;
    parse_locations(&body, meta)
}

async fn fetch_metadata(client: &reqwest::Client) -> anyhow::Result<HashMap<u64, VesselMeta>> {
    let body = fetch_body(client, METADATA_URL).await?;
    parse_metadata(&body)
}

fn parse_locations(
    body: &str,
    meta: &HashMap<u64, VesselMeta>,
) -> anyhow::Result<Vec<FeedRecord>> {
    let root: Value = serde_json::from_str(body)?;
    let Some(features) = root.get("features").and_then(|v| v.as_array()) else {
        anyhow::bail!("response has no features[] array");
    };

    let mut records = Vec::with_capacity(features.len());
    for feature in features {
        let Some(mmsi) = get_i64(feature, "mmsi") else {
            continue;
        };
        // GeoJSON point, [lon, lat] order.
        let Some(coords) = feature
            .get("geometry")
            .and_then(|g| g.get("coordinates"))
            .and_then(|c| c.as_array())
        else {
            continue;
        };
        let (Some(lon), Some(lat)) = (
            coords.first().and_then(|v| v.as_f64()),
            coords.get(1).and_then(|v| v.as_f64()),
        ) else {
            continue;
        };

        let props = feature.get("properties").unwrap_or(&Value::Null);
        let speed_m_s = get_f64(props, "sog")
            .filter(|&sog| sog < SOG_UNAVAILABLE_KNOTS)
            .map(|sog| sog * KNOTS_TO_M_S);
        // Course over ground drives reckoning; bow heading is the fallback.
        let heading_deg = get_f64(props, "cog")
            .filter(|&cog| (0.0..360.0).contains(&cog))
            .or_else(|| get_f64(props, "heading").filter(|&h| h != HEADING_UNAVAILABLE));
        let timestamp = get_i64(props, "timestampExternal")
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let looked_up = meta.get(&(mmsi as u64));
        records.push(FeedRecord {
            id: mmsi.to_string(),
            name: looked_up.and_then(|m| m.name.clone()),
            lat_deg: lat,
            lon_deg: lon,
            alt_m: 0.0,
            speed_m_s,
            heading_deg,
            timestamp,
            tag: looked_up.map(|m| m.tag).unwrap_or(ClassTag::Unclassified),
        });
    }
    Ok(records)
}

fn parse_metadata(body: &str) -> anyhow::Result<HashMap<u64, VesselMeta>> {
    let root: Value = serde_json::from_str(body)?;
    let Some(list) = root.as_array() else {
        anyhow::bail!("metadata response is not an array");
    };

    let mut table = HashMap::with_capacity(list.len());
    for vessel in list {
        let Some(mmsi) = get_i64(vessel, "mmsi") else {
            continue;
        };
        table.insert(
            mmsi as u64,
            VesselMeta {
                name: get_string(vessel, "name").filter(|n| !n.trim().is_empty()),
                tag: classify(get_i64(vessel, "shipType")),
            },
        );
    }
    Ok(table)
}

/// AIS ship type code to a coarse class.
pub fn classify(ship_type: Option<i64>) -> ClassTag {
    match ship_type {
        Some(70..=79) => ClassTag::CargoShip,
        Some(80..=89) => ClassTag::TankerShip,
        Some(60..=69) => ClassTag::PassengerShip,
        Some(40..=49) => ClassTag::HighSpeedCraft,
        Some(30) => ClassTag::FishingVessel,
        Some(31 | 32 | 50 | 52) => ClassTag::TugOrPilot,
        _ => ClassTag::Unclassified,
    }
}

//! ADS-B feed worker (adsb.lol v2).
//!
//! Free-running poll loop on its own thread; every cycle fetches one complete
//! JSON snapshot, converts it to feed records and posts it to the layer's
//! inbox. Fetch failures are reported and the previous snapshot simply stays
//! on screen until the next successful poll.

use bevy::prelude::*;
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;
use std::sync::mpsc;
use std::thread;

use super::Aircraft;
use crate::feed::{FeedInbox, FeedMessage, FeedRecord, fetch_body, get_f64, get_str};
use crate::traffic::class::ClassTag;

/// Worldwide military-filter snapshot; one request covers the whole globe.
const ADSB_URL: &str = "https://api.adsb.lol/v2/mil";
const POLL_SECS: u64 = 10;

const KNOTS_TO_M_S: f64 = 0.514_444;
const FEET_TO_M: f64 = 0.3048;

pub fn setup_aircraft_worker(mut commands: Commands) {
    let inbox = start_aircraft_worker();
    println!("[INIT] ADS-B worker started");
    commands.insert_resource(inbox);
}

fn start_aircraft_worker() -> FeedInbox<Aircraft> {
    let (tx, rx) = mpsc::channel::<FeedMessage>();

    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async move {
            let client = reqwest::Client::new();
            loop {
                let msg = match fetch_aircraft(&client).await {
                    Ok(records) => FeedMessage::Snapshot {
                        records,
                        fetched_at: Utc::now(),
                    },
                    Err(e) => {
                        eprintln!("[ADSB] fetch failed: {e:#}");
                        FeedMessage::Failure {
                            error: e.to_string(),
                        }
                    }
                };
                if tx.send(msg).is_err() {
                    // App side hung up; stop polling.
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(POLL_SECS)).await;
            }
        });
    });

    FeedInbox::new(rx)
}

async fn fetch_aircraft(client: &reqwest::Client) -> anyhow::Result<Vec<FeedRecord>> {
    let body = fetch_body(client, ADSB_URL).await?;
    parse_adsb(&body)
}

fn parse_adsb(body: &str) -> anyhow::Result<Vec<FeedRecord>> {
    let root: Value = serde_json::from_str(body)?;
    let Some(list) = root.get("ac").and_then(|v| v.as_array()) else {
        anyhow::bail!("response has no ac[] array");
    };
    // `now` is the server snapshot time in epoch millis.
    let now = get_f64(&root, "now")
        .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
        .unwrap_or_else(Utc::now);

    let mut records = Vec::with_capacity(list.len());
    for ac in list {
        let Some(hex) = get_str(ac, "hex") else {
            continue;
        };
        // Aircraft heard but not yet position-decoded have no lat/lon.
        let (Some(lat), Some(lon)) = (get_f64(ac, "lat"), get_f64(ac, "lon")) else {
            continue;
        };
        let alt_m = match get_str(ac, "alt_baro") {
            Some("ground") => 0.0,
            _ => get_f64(ac, "alt_baro").unwrap_or(0.0) * FEET_TO_M,
        };
        // seen_pos is seconds since this position was received.
        let age = get_f64(ac, "seen_pos").unwrap_or(0.0);
        let timestamp = now - Duration::milliseconds((age * 1000.0) as i64);

        records.push(FeedRecord {
            id: hex.to_string(),
            name: get_str(ac, "flight")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            lat_deg: lat,
            lon_deg: lon,
            alt_m,
            speed_m_s: get_f64(ac, "gs").map(|kt| kt * KNOTS_TO_M_S),
            heading_deg: get_f64(ac, "track"),
            timestamp,
            tag: classify(get_str(ac, "category")),
        });
    }
    Ok(records)
}

/// ADS-B emitter category (A1..A7) to a coarse class.
pub fn classify(category: Option<&str>) -> ClassTag {
    match category {
        Some("A1") | Some("A2") => ClassTag::LightAircraft,
        Some("A3") | Some("A4") => ClassTag::Airliner,
        Some("A5") => ClassTag::HeavyAirliner,
        Some("A6") => ClassTag::HighPerformance,
        Some("A7") => ClassTag::Rotorcraft,
        _ => ClassTag::Unclassified,
    }
}

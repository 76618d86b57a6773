//! Shared plumbing for live traffic feeds.
//!
//! Each layer runs its fetcher on a plain worker thread (tokio runtime inside,
//! blocking loop outside) and hands complete position snapshots to the ECS
//! through an mpsc channel. The types here are the wire-agnostic contract
//! between those workers and the ingest systems; the per-source fetch and
//! decode code lives with its layer.

use bevy::prelude::*;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{
    Arc, Mutex,
    mpsc::Receiver,
};

use crate::traffic::class::ClassTag;

/// One moving object in a feed snapshot.
///
/// Coordinates arrive unvalidated; the ingest path drops records whose
/// position fails geodetic validation and never lets them reach the scene.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    /// Stable upstream identity (ICAO hex, MMSI, NORAD id).
    pub id: String,
    pub name: Option<String>,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    /// Ground speed in m/s, if the source reports one.
    pub speed_m_s: Option<f64>,
    /// Compass heading in degrees, 0 = north, 90 = east.
    pub heading_deg: Option<f64>,
    /// When the source last heard from the object.
    pub timestamp: DateTime<Utc>,
    /// Assigned by the layer's own rules when the record is built.
    pub tag: ClassTag,
}

/// What a feed worker sends back to the ECS side.
pub enum FeedMessage {
    /// A complete snapshot of everything the source currently tracks.
    /// Objects missing from a snapshot are treated as gone.
    Snapshot {
        records: Vec<FeedRecord>,
        fetched_at: DateTime<Utc>,
    },
    /// Fetch or decode failure. The previous snapshot stays on screen.
    Failure { error: String },
}

/// Receiving end of a layer's feed channel, typed by the layer marker so
/// each layer gets its own resource.
#[derive(Resource)]
pub struct FeedInbox<K: Send + Sync + 'static> {
    rx: Arc<Mutex<Receiver<FeedMessage>>>,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> FeedInbox<K> {
    pub fn new(rx: Receiver<FeedMessage>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            _marker: PhantomData,
        }
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&self) -> Vec<FeedMessage> {
        let mut out = Vec::new();
        if let Ok(rx) = self.rx.lock() {
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
        }
        out
    }
}

/// Rolling health of one feed, updated by ingest and surfaced in logs.
#[derive(Resource)]
pub struct FeedStatus<K: Send + Sync + 'static> {
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_snapshot_len: usize,
    pub dropped_last_snapshot: usize,
    pub last_error: Option<String>,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> Default for FeedStatus<K> {
    fn default() -> Self {
        Self {
            last_snapshot_at: None,
            last_snapshot_len: 0,
            dropped_last_snapshot: 0,
            last_error: None,
            _marker: PhantomData,
        }
    }
}

// ===================== Worker-side fetch and decode helpers =====================

/// GET a URL and return the body, treating non-2xx statuses as errors.
pub async fn fetch_body(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        anyhow::bail!("HTTP {} for {}", status, url);
    }
    Ok(body)
}

pub fn get_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(val)) => Some(val.to_string()),
        Some(other) => other.as_str().map(|s| s.to_string()),
        None => None,
    }
}

pub fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

pub fn get_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key) {
        Some(Value::Number(num)) => num.as_i64(),
        Some(Value::String(val)) => val.parse::<i64>().ok(),
        _ => None,
    }
}

pub fn get_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key) {
        Some(Value::Number(num)) => num.as_f64(),
        Some(Value::String(val)) => val.parse::<f64>().ok(),
        _ => None,
    }
}

//! Authoritative per-layer track arena.
//!
//! Feeds publish complete snapshots; [`TrackStore::commit`] diffs one
//! snapshot against the live set, overwriting kinematics in place for ids
//! that persist and reporting exactly which ids appeared and which scene
//! handles now belong to nobody. The store owns identity and state, the
//! ECS side owns the actual entities; they meet through the `Entity`
//! handles stashed in each slot.

use bevy::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::collections::hash_map::{Entry, HashMap};
use std::marker::PhantomData;

use crate::core::coordinates::Geodetic;
use crate::feed::FeedRecord;
use crate::traffic::class::ClassTag;

/// Last authoritative fix plus the motion fields dead reckoning needs.
#[derive(Debug, Clone)]
pub struct Kinematics {
    pub position: Geodetic,
    pub speed_m_s: Option<f64>,
    pub heading_deg: Option<f64>,
    /// When the source last heard from the object. Never moves backwards.
    pub updated_at: DateTime<Utc>,
}

/// One tracked object and the scene handles attached to it.
///
/// Handles start out `None`; the sync pass spawns entities for new slots
/// and writes them back here. Despawning goes the other way around, via
/// the handles returned from [`TrackStore::commit`].
#[derive(Debug)]
pub struct TrackSlot {
    pub kinematics: Kinematics,
    pub tag: ClassTag,
    pub name: Option<String>,
    pub icon: Option<Entity>,
    pub label: Option<Entity>,
    /// Mesh-less anchor the camera can follow. While a follow is active the
    /// proxy outlives the slot itself; see the follow module.
    pub proxy: Option<Entity>,
    /// Set when the label text no longer matches `name`.
    pub name_dirty: bool,
    last_seen: u64,
}

/// Commit-time admission rules. A record failing these is treated exactly
/// like a record absent from the snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    pub hidden_tags: HashSet<ClassTag>,
    pub min_alt_m: Option<f64>,
    pub max_alt_m: Option<f64>,
}

impl TrackFilter {
    pub fn admits(&self, tag: ClassTag, alt_m: f64) -> bool {
        if self.hidden_tags.contains(&tag) {
            return false;
        }
        if let Some(min) = self.min_alt_m {
            if alt_m < min {
                return false;
            }
        }
        if let Some(max) = self.max_alt_m {
            if alt_m > max {
                return false;
            }
        }
        true
    }
}

/// Scene handles of a track that just left the live set.
#[derive(Debug)]
pub struct RemovedTrack {
    pub id: String,
    pub tag: ClassTag,
    pub icon: Option<Entity>,
    pub label: Option<Entity>,
    pub proxy: Option<Entity>,
}

/// What one snapshot commit did.
#[derive(Debug, Default)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    /// Records whose coordinates failed validation. Dropped silently.
    pub dropped: usize,
    pub removed: Vec<RemovedTrack>,
}

#[derive(Default)]
pub struct TrackStore {
    slots: HashMap<String, TrackSlot>,
    generation: u64,
}

impl TrackStore {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackSlot> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackSlot> {
        self.slots.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrackSlot)> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut TrackSlot)> {
        self.slots.iter_mut()
    }

    /// Commits bump this; downstream systems use it to notice fresh data.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply one complete snapshot.
    ///
    /// Ids present in both snapshot and store keep their slot (and scene
    /// handles) and get their kinematics overwritten. New ids get fresh
    /// slots with no handles. Ids missing from the snapshot, failing
    /// validation or rejected by `filter` leave the store and their
    /// handles come back in the summary for despawning.
    pub fn commit(&mut self, records: Vec<FeedRecord>, filter: &TrackFilter) -> CommitSummary {
        self.generation += 1;
        let generation = self.generation;
        let mut summary = CommitSummary::default();

        for rec in records {
            let position = match Geodetic::from_degrees(rec.lat_deg, rec.lon_deg, rec.alt_m) {
                Ok(p) => p,
                Err(_) => {
                    summary.dropped += 1;
                    continue;
                }
            };
            if !filter.admits(rec.tag, rec.alt_m) {
                continue;
            }
            match self.slots.entry(rec.id) {
                Entry::Occupied(mut entry) => {
                    let slot = entry.get_mut();
                    // A snapshot may carry the same id twice; the last
                    // record wins and counts once.
                    if slot.last_seen != generation {
                        summary.updated += 1;
                    }
                    slot.last_seen = generation;
                    let updated_at = if rec.timestamp > slot.kinematics.updated_at {
                        rec.timestamp
                    } else {
                        slot.kinematics.updated_at
                    };
                    slot.kinematics = Kinematics {
                        position,
                        speed_m_s: rec.speed_m_s,
                        heading_deg: rec.heading_deg,
                        updated_at,
                    };
                    slot.tag = rec.tag;
                    // Sources drop the name between metadata refreshes;
                    // keep the last one we saw.
                    if rec.name.is_some() && rec.name != slot.name {
                        slot.name = rec.name;
                        slot.name_dirty = true;
                    }
                }
                Entry::Vacant(entry) => {
                    summary.created += 1;
                    entry.insert(TrackSlot {
                        kinematics: Kinematics {
                            position,
                            speed_m_s: rec.speed_m_s,
                            heading_deg: rec.heading_deg,
                            updated_at: rec.timestamp,
                        },
                        tag: rec.tag,
                        name: rec.name,
                        icon: None,
                        label: None,
                        proxy: None,
                        name_dirty: true,
                        last_seen: generation,
                    });
                }
            }
        }

        self.slots.retain(|id, slot| {
            if slot.last_seen == generation {
                return true;
            }
            summary.removed.push(RemovedTrack {
                id: id.clone(),
                tag: slot.tag,
                icon: slot.icon,
                label: slot.label,
                proxy: slot.proxy,
            });
            false
        });

        summary
    }

    /// Drop every track, returning all live handles for despawning.
    pub fn clear(&mut self) -> Vec<RemovedTrack> {
        self.generation += 1;
        self.slots
            .drain()
            .map(|(id, slot)| RemovedTrack {
                id,
                tag: slot.tag,
                icon: slot.icon,
                label: slot.label,
                proxy: slot.proxy,
            })
            .collect()
    }
}

/// The arena as a Bevy resource, one per layer.
#[derive(Resource, Deref, DerefMut)]
pub struct Tracks<K: Send + Sync + 'static> {
    #[deref]
    store: TrackStore,
    _marker: PhantomData<K>,
}

impl<K: Send + Sync + 'static> Default for Tracks<K> {
    fn default() -> Self {
        Self {
            store: TrackStore::default(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rec(id: &str, lat: f64, lon: f64, alt: f64, at: DateTime<Utc>) -> FeedRecord {
        FeedRecord {
            id: id.to_string(),
            name: None,
            lat_deg: lat,
            lon_deg: lon,
            alt_m: alt,
            speed_m_s: Some(100.0),
            heading_deg: Some(90.0),
            timestamp: at,
            tag: ClassTag::Airliner,
        }
    }

    #[test]
    fn test_commit_reconciles_to_snapshot_set() {
        let mut store = TrackStore::default();
        let s1 = store.commit(
            vec![rec("a", 10.0, 20.0, 1000.0, ts(0)), rec("b", 11.0, 21.0, 1000.0, ts(0))],
            &TrackFilter::default(),
        );
        assert_eq!(s1.created, 2);
        assert_eq!(s1.updated, 0);
        assert!(s1.removed.is_empty());

        let s2 = store.commit(
            vec![rec("b", 12.0, 22.0, 1000.0, ts(1)), rec("c", 13.0, 23.0, 1000.0, ts(1))],
            &TrackFilter::default(),
        );
        assert_eq!(s2.created, 1);
        assert_eq!(s2.updated, 1);
        assert_eq!(s2.removed.len(), 1);
        assert_eq!(s2.removed[0].id, "a");

        assert_eq!(store.len(), 2);
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_commit_identical_snapshot_is_idempotent() {
        let mut store = TrackStore::default();
        let batch = vec![rec("a", 10.0, 20.0, 1000.0, ts(0)), rec("b", 11.0, 21.0, 1000.0, ts(0))];
        store.commit(batch.clone(), &TrackFilter::default());

        // Simulate the sync pass attaching scene handles.
        let icon = Entity::PLACEHOLDER;
        store.get_mut("a").unwrap().icon = Some(icon);

        let s2 = store.commit(batch, &TrackFilter::default());
        assert_eq!(s2.created, 0);
        assert!(s2.removed.is_empty());
        assert_eq!(s2.updated, 2);
        // Identity stability: the slot and its handles survive.
        assert_eq!(store.get("a").unwrap().icon, Some(icon));
    }

    #[test]
    fn test_commit_drops_invalid_coordinates_silently() {
        let mut store = TrackStore::default();
        let s = store.commit(
            vec![
                rec("ok", 10.0, 20.0, 1000.0, ts(0)),
                rec("bad_lat", 95.0, 20.0, 1000.0, ts(0)),
                rec("bad_lon", 10.0, 200.0, 1000.0, ts(0)),
                rec("bad_alt", 10.0, 20.0, f64::NAN, ts(0)),
            ],
            &TrackFilter::default(),
        );
        assert_eq!(s.created, 1);
        assert_eq!(s.dropped, 3);
        assert_eq!(store.len(), 1);
        assert!(store.contains("ok"));
    }

    #[test]
    fn test_existing_track_with_invalid_update_is_removed_as_absent() {
        let mut store = TrackStore::default();
        store.commit(vec![rec("a", 10.0, 20.0, 1000.0, ts(0))], &TrackFilter::default());

        let s = store.commit(vec![rec("a", f64::NAN, 20.0, 1000.0, ts(1))], &TrackFilter::default());
        assert_eq!(s.dropped, 1);
        assert_eq!(s.removed.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_timestamp_never_regresses() {
        let mut store = TrackStore::default();
        store.commit(vec![rec("a", 10.0, 20.0, 1000.0, ts(100))], &TrackFilter::default());

        // Stale timestamp: position still snaps, clock holds.
        store.commit(vec![rec("a", 50.0, 60.0, 2000.0, ts(50))], &TrackFilter::default());
        let slot = store.get("a").unwrap();
        assert_eq!(slot.kinematics.updated_at, ts(100));
        assert!((slot.kinematics.position.lat_deg - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_ids_in_one_snapshot_last_wins() {
        let mut store = TrackStore::default();
        let s = store.commit(
            vec![rec("a", 10.0, 20.0, 1000.0, ts(0)), rec("a", 30.0, 40.0, 1000.0, ts(0))],
            &TrackFilter::default(),
        );
        assert_eq!(s.created, 1);
        assert_eq!(s.updated, 1);
        assert_eq!(store.len(), 1);
        assert!((store.get("a").unwrap().kinematics.position.lat_deg - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_clears_the_layer() {
        let mut store = TrackStore::default();
        store.commit(
            vec![rec("a", 10.0, 20.0, 1000.0, ts(0)), rec("b", 11.0, 21.0, 1000.0, ts(0))],
            &TrackFilter::default(),
        );
        let s = store.commit(Vec::new(), &TrackFilter::default());
        assert_eq!(s.removed.len(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_filter_rejects_tags_and_altitude_band() {
        let mut store = TrackStore::default();
        store.commit(vec![rec("a", 10.0, 20.0, 1000.0, ts(0))], &TrackFilter::default());

        let mut filter = TrackFilter::default();
        filter.hidden_tags.insert(ClassTag::Airliner);
        // The id is admitted no longer, so it goes out as absent.
        let s = store.commit(vec![rec("a", 10.0, 20.0, 1000.0, ts(1))], &filter);
        assert_eq!(s.removed.len(), 1);
        assert!(store.is_empty());

        let band = TrackFilter {
            hidden_tags: HashSet::new(),
            min_alt_m: Some(500.0),
            max_alt_m: Some(12_000.0),
        };
        let s = store.commit(
            vec![
                rec("low", 0.0, 0.0, 100.0, ts(2)),
                rec("mid", 0.0, 1.0, 5_000.0, ts(2)),
                rec("high", 0.0, 2.0, 20_000.0, ts(2)),
            ],
            &band,
        );
        assert_eq!(s.created, 1);
        assert!(store.contains("mid"));
        assert!(!store.contains("low"));
        assert!(!store.contains("high"));
    }

    #[test]
    fn test_fresh_commit_overrides_extrapolated_motion() {
        use crate::traffic::reckon::extrapolate;

        let mut store = TrackStore::default();
        store.commit(vec![rec("a", 0.0, 0.0, 1000.0, ts(0))], &TrackFilter::default());

        // A bulk tick between refreshes drifts the icon eastward but never
        // writes back into the store.
        let drifted = extrapolate(&store.get("a").unwrap().kinematics, ts(10), 120.0, 1.0);
        assert!(drifted.lon_deg > 0.0);

        // The next snapshot re-anchors exactly at the authoritative fix.
        store.commit(vec![rec("a", 0.0, 0.05, 1000.0, ts(10))], &TrackFilter::default());
        let kin = store.get("a").unwrap().kinematics.clone();
        assert!((kin.position.lon_deg - 0.05).abs() < 1e-9);
        assert_eq!(kin.updated_at, ts(10));

        // The tick after that starts from the new fix, not from the drift.
        let next = extrapolate(&kin, ts(10), 120.0, 1.0);
        assert!((next.lon_deg - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_name_kept_when_snapshot_omits_it() {
        let mut store = TrackStore::default();
        let mut named = rec("a", 10.0, 20.0, 1000.0, ts(0));
        named.name = Some("DLH400".to_string());
        store.commit(vec![named], &TrackFilter::default());

        store.commit(vec![rec("a", 10.5, 20.0, 1000.0, ts(1))], &TrackFilter::default());
        assert_eq!(store.get("a").unwrap().name.as_deref(), Some("DLH400"));
    }

    #[test]
    fn test_clear_returns_every_handle() {
        let mut store = TrackStore::default();
        store.commit(
            vec![rec("a", 10.0, 20.0, 1000.0, ts(0)), rec("b", 11.0, 21.0, 1000.0, ts(0))],
            &TrackFilter::default(),
        );
        store.get_mut("a").unwrap().icon = Some(Entity::PLACEHOLDER);
        store.get_mut("b").unwrap().proxy = Some(Entity::PLACEHOLDER);

        let removed = store.clear();
        assert_eq!(removed.len(), 2);
        assert!(store.is_empty());
        assert!(removed.iter().any(|r| r.icon.is_some()));
        assert!(removed.iter().any(|r| r.proxy.is_some()));
    }
}

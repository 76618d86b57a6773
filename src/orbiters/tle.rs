//! TLE group parsing and disk caching.
//!
//! The orbiter worker pulls whole Celestrak element groups (thousands of
//! objects per response), so the cache stores one JSON file per group name
//! rather than per object, with an age-based expiry matched to how often
//! fresh elements are actually published.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// One object's elements out of a fetched group.
#[derive(Debug, Clone)]
pub struct GroupTle {
    pub norad: u64,
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
    pub epoch_utc: DateTime<Utc>,
}

/// TLE epoch from line 1 (columns 19-32, 1-based): two-digit year plus
/// fractional day of year. Years below 57 are 2000s per convention.
pub fn epoch_from_line1(line1: &str) -> Option<DateTime<Utc>> {
    if line1.len() < 32 {
        return None;
    }
    let field = line1[18..32].trim();
    let (yyddd, frac) = match field.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (field, "0"),
    };
    if yyddd.len() < 3 {
        return None;
    }
    let (yy_str, ddd_str) = yyddd.split_at(2);
    let yy: i32 = yy_str.parse().ok()?;
    let ddd: i64 = ddd_str.trim().parse().ok()?;
    let year = if yy >= 57 { 1900 + yy } else { 2000 + yy };

    let day_frac: f64 = format!("0.{}", frac).parse().ok()?;
    let midnight = chrono::NaiveDate::from_ymd_opt(year, 1, 1)?
        .checked_add_signed(Duration::days(ddd - 1))?
        .and_hms_opt(0, 0, 0)?;
    let offset = Duration::milliseconds((day_frac * 86_400_000.0).round() as i64);
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        midnight + offset,
        Utc,
    ))
}

/// NORAD catalog number from columns 3-7 of either line.
fn norad_from_line(line: &str) -> Option<u64> {
    line.get(2..7)?.trim().parse().ok()
}

/// Parse a 3LE group body: optional name line, then the two element lines.
/// Malformed blocks are skipped, never fatal.
pub fn parse_group(text: &str) -> Vec<GroupTle> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_end_matches(['\r', ' ', '\u{feff}']))
        .filter(|l| !l.is_empty())
        .collect();

    let mut out = Vec::new();
    let mut pending_name: Option<&str> = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
            let line2 = lines[i + 1];
            if let (Some(norad), Some(epoch)) = (norad_from_line(line), epoch_from_line1(line)) {
                // Both lines must agree on the object.
                if norad_from_line(line2) == Some(norad) {
                    out.push(GroupTle {
                        norad,
                        name: pending_name.map(|n| n.trim().to_string()),
                        line1: line.to_string(),
                        line2: line2.to_string(),
                        epoch_utc: epoch,
                    });
                }
            }
            pending_name = None;
            i += 2;
        } else if line.starts_with("2 ") {
            // Stray second line without its first; skip it.
            pending_name = None;
            i += 1;
        } else {
            pending_name = Some(line);
            i += 1;
        }
    }
    out
}

/// Serialized cache entry, one per group, stored as JSON on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedGroup {
    pub group: String,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

/// Disk cache for fetched element groups.
pub struct GroupCache {
    cache_dir: PathBuf,
    expiration_hours: i64,
}

impl GroupCache {
    /// Cache under the platform cache directory (e.g. ~/.cache/bevytraffic/tle/).
    pub fn new(expiration_hours: i64) -> Result<Self, anyhow::Error> {
        let proj_dirs = ProjectDirs::from("", "", "bevytraffic")
            .ok_or_else(|| anyhow::anyhow!("Failed to resolve cache directory"))?;
        Self::new_in_dir(proj_dirs.cache_dir().join("tle"), expiration_hours)
    }

    /// Cache rooted at a specific directory, for tests.
    pub fn new_in_dir(cache_dir: PathBuf, expiration_hours: i64) -> Result<Self, anyhow::Error> {
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            expiration_hours,
        })
    }

    /// Read a cached group. `Ok(None)` is a cache miss; `Err` means the file
    /// exists but cannot be read or parsed.
    pub fn read(&self, group: &str) -> Result<Option<CachedGroup>, anyhow::Error> {
        let path = self.cache_path(group);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn write(&self, entry: &CachedGroup) -> Result<(), anyhow::Error> {
        let path = self.cache_path(&entry.group);
        fs::write(&path, serde_json::to_string(entry)?)?;
        Ok(())
    }

    /// Whether the entry is fresh enough to skip the network.
    pub fn is_valid(&self, entry: &CachedGroup) -> bool {
        Utc::now().signed_duration_since(entry.fetched_at) < Duration::hours(self.expiration_hours)
    }

    fn cache_path(&self, group: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const ISS_L1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const ISS_L2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "bevytraffic-tle-{}-{}-{}",
            test_name,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn test_epoch_from_line1() {
        // 2008 day 264.51782528 = 2008-09-20 12:25:40 UTC (approximately).
        let epoch = epoch_from_line1(ISS_L1).unwrap();
        assert_eq!(epoch.date_naive().to_string(), "2008-09-20");
        let secs_into_day = 0.51782528 * 86400.0;
        let expected = epoch.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
            + Duration::milliseconds((secs_into_day * 1000.0).round() as i64);
        assert_eq!(epoch, expected);
    }

    #[test]
    fn test_epoch_from_line1_rejects_short_line() {
        assert!(epoch_from_line1("too short").is_none());
    }

    #[test]
    fn test_parse_group_with_and_without_names() {
        let text = format!(
            "ISS (ZARYA)\r\n{}\r\n{}\n{}\n{}\n",
            ISS_L1,
            ISS_L2,
            ISS_L1.replace("25544", "25545"),
            ISS_L2.replace("25544", "25545"),
        );
        let parsed = parse_group(&text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].norad, 25544);
        assert_eq!(parsed[0].name.as_deref(), Some("ISS (ZARYA)"));
        assert_eq!(parsed[1].norad, 25545);
        assert_eq!(parsed[1].name, None);
    }

    #[test]
    fn test_parse_group_skips_mismatched_pair() {
        let text = format!("{}\n{}\n", ISS_L1, ISS_L2.replace("25544", "99999"));
        assert!(parse_group(&text).is_empty());
    }

    #[test]
    fn test_group_cache_roundtrip_and_expiry() {
        let cache = GroupCache::new_in_dir(unique_temp_dir("roundtrip"), 6).unwrap();
        assert!(cache.read("active").unwrap().is_none());

        let fresh = CachedGroup {
            group: "active".to_string(),
            text: format!("{}\n{}\n", ISS_L1, ISS_L2),
            fetched_at: Utc::now(),
        };
        cache.write(&fresh).unwrap();

        let loaded = cache.read("active").unwrap().unwrap();
        assert_eq!(loaded.text, fresh.text);
        assert!(cache.is_valid(&loaded));

        let stale = CachedGroup {
            fetched_at: Utc::now() - Duration::hours(7),
            ..loaded
        };
        assert!(!cache.is_valid(&stale));
    }
}

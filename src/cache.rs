//! Two-tier cache for the single USD/JPY rate.
//!
//! The memory tier lives for the process; the file tier is the only state
//! that survives a restart. Each tier has its own TTL and freshness is always
//! measured from the sample's original `observed_at`.

use crate::config::FileTierMode;
use crate::error::PersistenceError;
use crate::types::{Provenance, RateSample};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// On-disk record: `{"rate": 151.23, "timestamp": "<ISO-8601>"}`.
#[derive(Debug, Serialize, Deserialize)]
struct RateRecord {
    rate: f64,
    timestamp: String,
}

fn is_fresh(sample: &RateSample, ttl: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(sample.observed_at());
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age < ttl,
        Err(_) => true,
    }
}

/// Accepts RFC 3339 as well as naive ISO timestamps in local time, which is
/// what older cache files contain.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone)]
pub struct FileTier {
    path: PathBuf,
    ttl: Duration,
}

impl FileTier {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    /// Read the record regardless of age. Missing or corrupt files are a miss.
    pub fn load(&self) -> Option<RateSample> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("rate cache {} unreadable: {}", self.path.display(), e);
                }
                return None;
            }
        };
        let record: RateRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!("rate cache {} is corrupt: {}", self.path.display(), e);
                return None;
            }
        };
        let observed_at = match parse_timestamp(&record.timestamp) {
            Some(ts) => ts,
            None => {
                warn!(
                    "rate cache {} has bad timestamp {:?}",
                    self.path.display(),
                    record.timestamp
                );
                return None;
            }
        };
        let sample = RateSample::new(record.rate, observed_at, Provenance::CacheFile);
        if sample.is_none() {
            warn!(
                "rate cache {} holds unusable rate {}",
                self.path.display(),
                record.rate
            );
        }
        sample
    }

    pub fn load_fresh(&self, now: DateTime<Utc>) -> Option<RateSample> {
        self.load().filter(|s| is_fresh(s, self.ttl, now))
    }

    pub fn store(&self, sample: &RateSample) -> Result<(), PersistenceError> {
        let record = RateRecord {
            rate: sample.value(),
            timestamp: sample.observed_at().to_rfc3339(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|source| PersistenceError::Encode {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, bytes).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug)]
pub struct TieredCache {
    memory: Option<RateSample>,
    memory_ttl: Duration,
    file: FileTier,
    mode: FileTierMode,
}

impl TieredCache {
    pub fn new(memory_ttl: Duration, file: FileTier, mode: FileTierMode) -> Self {
        Self {
            memory: None,
            memory_ttl,
            file,
            mode,
        }
    }

    pub fn get(&mut self) -> Option<RateSample> {
        self.get_at(Utc::now())
    }

    /// Memory tier first, then (depending on mode) the file tier. A file hit
    /// is promoted into memory with its original `observed_at`.
    pub fn get_at(&mut self, now: DateTime<Utc>) -> Option<RateSample> {
        if let Some(sample) = self.memory {
            if is_fresh(&sample, self.memory_ttl, now) {
                debug!("rate served from memory tier: {}", sample.value());
                return Some(sample.with_provenance(Provenance::CacheMemory));
            }
        }
        if self.mode == FileTierMode::FallbackOnly {
            return None;
        }
        let sample = self.file.load_fresh(now)?;
        debug!("rate served from file tier: {}", sample.value());
        self.memory = Some(sample);
        Some(sample.with_provenance(Provenance::CacheFile))
    }

    /// Memory is updated unconditionally; the file write is best-effort and
    /// its error is handed back for the caller to report.
    pub fn put(&mut self, sample: RateSample) -> Result<(), PersistenceError> {
        self.memory = Some(sample);
        self.file.store(&sample)
    }

    /// Last known value ignoring TTLs: whichever of the file record and the
    /// in-process copy was observed later. The memory copy outlives a failed
    /// file write.
    pub fn stale(&self) -> Option<RateSample> {
        let memory = self
            .memory
            .map(|s| s.with_provenance(Provenance::CacheMemory));
        match (self.file.load(), memory) {
            (Some(file), Some(mem)) if mem.observed_at() > file.observed_at() => Some(mem),
            (Some(file), _) => Some(file),
            (None, mem) => mem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, mode: FileTierMode) -> TieredCache {
        TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3 * 3600)),
            mode,
        )
    }

    fn sample(value: f64, age_secs: i64) -> RateSample {
        RateSample::new(
            value,
            Utc::now() - chrono::Duration::seconds(age_secs),
            Provenance::Live,
        )
        .unwrap()
    }

    #[test]
    fn put_then_get_hits_memory() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_in(&dir, FileTierMode::ServeWhileFresh);
        cache.put(sample(151.25, 0)).unwrap();
        let hit = cache.get().unwrap();
        assert_eq!(hit.value(), 151.25);
        assert_eq!(hit.provenance(), Provenance::CacheMemory);
    }

    #[test]
    fn expired_memory_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let mut cache = TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(300)),
            FileTierMode::ServeWhileFresh,
        );
        cache.put(sample(151.0, 301)).unwrap();
        assert!(cache.get().is_none());
    }

    #[test]
    fn fresh_file_is_promoted_with_original_timestamp() {
        let dir = TempDir::new().unwrap();
        let stored = sample(148.0, 2 * 3600);
        FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3600))
            .store(&stored)
            .unwrap();

        let mut cache = cache_in(&dir, FileTierMode::ServeWhileFresh);
        let hit = cache.get().unwrap();
        assert_eq!(hit.value(), 148.0);
        assert_eq!(hit.provenance(), Provenance::CacheFile);
        assert_eq!(
            hit.observed_at().timestamp(),
            stored.observed_at().timestamp()
        );
        // Promoted copy is older than the memory TTL, so the next lookup
        // still goes through the file tier.
        assert_eq!(cache.get().unwrap().provenance(), Provenance::CacheFile);
    }

    #[test]
    fn fallback_only_mode_skips_file_tier_on_get() {
        let dir = TempDir::new().unwrap();
        FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3600))
            .store(&sample(148.0, 60))
            .unwrap();
        let mut cache = cache_in(&dir, FileTierMode::FallbackOnly);
        assert!(cache.get().is_none());
        assert_eq!(cache.stale().unwrap().value(), 148.0);
    }

    #[test]
    fn corrupt_or_invalid_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate_cache.json");
        let mut cache = cache_in(&dir, FileTierMode::ServeWhileFresh);

        fs::write(&path, b"{\"rate\": 15").unwrap();
        assert!(cache.get().is_none());
        assert!(cache.stale().is_none());

        fs::write(&path, br#"{"rate": -3.0, "timestamp": "2025-01-01T00:00:00Z"}"#).unwrap();
        assert!(cache.get().is_none());
    }

    #[test]
    fn reads_naive_local_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate_cache.json");
        let naive = Local::now().naive_local() - chrono::Duration::minutes(30);
        let body = format!(
            r#"{{"rate": 147.5, "timestamp": "{}"}}"#,
            naive.format("%Y-%m-%dT%H:%M:%S%.6f")
        );
        fs::write(&path, body).unwrap();
        let mut cache = cache_in(&dir, FileTierMode::ServeWhileFresh);
        assert_eq!(cache.get().unwrap().value(), 147.5);
    }

    #[test]
    fn failed_file_write_keeps_memory_copy() {
        let dir = TempDir::new().unwrap();
        let mut cache = TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("missing/dir/rate_cache.json"), Duration::from_secs(3600)),
            FileTierMode::ServeWhileFresh,
        );
        assert!(cache.put(sample(152.0, 0)).is_err());
        assert_eq!(cache.get().unwrap().value(), 152.0);
        assert_eq!(cache.stale().unwrap().provenance(), Provenance::CacheMemory);
    }

    #[test]
    fn stale_prefers_newer_memory_copy_over_older_file() {
        let dir = TempDir::new().unwrap();
        FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3600))
            .store(&sample(140.0, 5 * 3600))
            .unwrap();
        let mut cache = cache_in(&dir, FileTierMode::ServeWhileFresh);
        // As left behind by a live put whose file write failed.
        cache.memory = Some(sample(152.0, 600));

        let stale = cache.stale().unwrap();
        assert_eq!(stale.value(), 152.0);
        assert_eq!(stale.provenance(), Provenance::CacheMemory);

        cache.memory = Some(sample(139.0, 6 * 3600));
        assert_eq!(cache.stale().unwrap().value(), 140.0);
    }
}

//! Persisted breach streaks.
//!
//! Each (check name, threshold number) slot owns one JSON file under
//! `{cache_root}/alert_status_cache/`. The file holds the list of live streaks for
//! that slot, one per tier, and is always replaced whole.
use crate::alerting::threshold::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const CACHE_DIR_NAME: &str = "alert_status_cache";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Alert cache I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Alert cache file {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One live breach streak for a tier of a threshold slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCacheEntry {
    pub threshold_type: Tier,
    pub threshold_no: u32,
    /// Unix timestamp (seconds) at which the streak began.
    pub exceeding_start: f64,
    pub occurrences: u32,
}

impl AlertCacheEntry {
    pub fn start(threshold_type: Tier, threshold_no: u32, now: f64) -> Self {
        Self {
            threshold_type,
            threshold_no,
            exceeding_start: now,
            occurrences: 1,
        }
    }

    pub fn elapsed_seconds(&self, now: f64) -> f64 {
        now - self.exceeding_start
    }
}

/// The working copy of a slot's streaks during one evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertCache {
    threshold_no: u32,
    entries: Vec<AlertCacheEntry>,
}

impl AlertCache {
    pub fn empty(threshold_no: u32) -> Self {
        Self {
            threshold_no,
            entries: Vec::new(),
        }
    }

    pub fn from_entries(threshold_no: u32, entries: Vec<AlertCacheEntry>) -> Self {
        Self {
            threshold_no,
            entries,
        }
    }

    pub fn threshold_no(&self) -> u32 {
        self.threshold_no
    }

    pub fn entries(&self) -> &[AlertCacheEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, tier: Tier) -> Option<&AlertCacheEntry> {
        self.entries
            .iter()
            .find(|e| e.threshold_no == self.threshold_no && e.threshold_type == tier)
    }

    /// Extends the tier's streak, starting a new one at `now` if none is live.
    pub fn record_breach(&mut self, tier: Tier, now: f64) -> &AlertCacheEntry {
        let threshold_no = self.threshold_no;
        let index = match self
            .entries
            .iter()
            .position(|e| e.threshold_no == threshold_no && e.threshold_type == tier)
        {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.occurrences = entry.occurrences.saturating_add(1);
                index
            }
            None => {
                self.entries
                    .push(AlertCacheEntry::start(tier, threshold_no, now));
                self.entries.len() - 1
            }
        };
        &self.entries[index]
    }

    /// Ends the tier's streak. Returns whether anything was removed.
    pub fn clear(&mut self, tier: Tier) -> bool {
        let before = self.entries.len();
        let threshold_no = self.threshold_no;
        self.entries
            .retain(|e| !(e.threshold_no == threshold_no && e.threshold_type == tier));
        before != self.entries.len()
    }
}

/// Strips everything outside `[A-Za-z0-9._]` so check names are safe file name stems.
pub fn sanitize_check_name(check_name: &str) -> String {
    check_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
        .collect()
}

fn slot_number(file_name: &str, sanitized_check_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(sanitized_check_name)?
        .strip_prefix("_threshold_")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// File-per-slot store rooted at `{cache_root}/alert_status_cache`.
#[derive(Debug, Clone)]
pub struct AlertCacheStore {
    dir: PathBuf,
}

impl AlertCacheStore {
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            dir: cache_root.as_ref().join(CACHE_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, check_name: &str, threshold_no: u32) -> PathBuf {
        self.dir.join(format!(
            "{}_threshold_{threshold_no}",
            sanitize_check_name(check_name)
        ))
    }

    /// Lists every slot file of the check, ordered by threshold number.
    fn slot_files(&self, check_name: &str) -> Result<Vec<(u32, PathBuf)>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let sanitized = sanitize_check_name(check_name);
        let mut slots = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::io(&self.dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(threshold_no) = slot_number(file_name, &sanitized) {
                slots.push((threshold_no, entry.path()));
            }
        }
        slots.sort_by_key(|(threshold_no, _)| *threshold_no);
        Ok(slots)
    }

    fn read_entries(path: &Path) -> Result<Vec<AlertCacheEntry>, CacheError> {
        let contents = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads a slot's streaks. A missing or unreadable file means "no prior breach".
    pub fn load(&self, check_name: &str, threshold_no: u32) -> AlertCache {
        let slots = match self.slot_files(check_name) {
            Ok(slots) => slots,
            Err(e) => {
                warn!(error = %e, "Could not scan alert cache directory; treating as empty.");
                return AlertCache::empty(threshold_no);
            }
        };

        let Some((_, path)) = slots.into_iter().find(|(no, _)| *no == threshold_no) else {
            debug!(check_name, threshold_no, "No alert cache.");
            return AlertCache::empty(threshold_no);
        };

        match Self::read_entries(&path) {
            Ok(entries) => {
                debug!(check_name, threshold_no, count = entries.len(), "Loaded alert cache.");
                AlertCache::from_entries(threshold_no, entries)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable alert cache.");
                AlertCache::empty(threshold_no)
            }
        }
    }

    /// Every live slot of the check. Unreadable files are skipped with a warning.
    pub fn discover(
        &self,
        check_name: &str,
    ) -> Result<BTreeMap<u32, Vec<AlertCacheEntry>>, CacheError> {
        let mut slots = BTreeMap::new();
        for (threshold_no, path) in self.slot_files(check_name)? {
            match Self::read_entries(&path) {
                Ok(entries) => {
                    slots.insert(threshold_no, entries);
                }
                Err(e) => warn!(error = %e, "Skipping unreadable alert cache."),
            }
        }
        Ok(slots)
    }

    /// Replaces the slot file with `cache`, or removes it when the cache is empty.
    pub fn save(&self, check_name: &str, cache: &AlertCache) -> Result<(), CacheError> {
        let path = self.slot_path(check_name, cache.threshold_no());

        if cache.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = ?path, "Removed empty alert cache.");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CacheError::io(&path, e)),
            };
        }

        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let json = serde_json::to_vec(cache.entries()).map_err(|source| CacheError::Json {
            path: path.clone(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(&json)
            .and_then(|()| tmp.flush())
            .map_err(|e| CacheError::io(&tmp_path, e))?;
        tmp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;

        debug!(path = ?path, count = cache.entries().len(), "Saved alert cache.");
        Ok(())
    }

    /// Deletes every slot file of the check. Returns how many were removed.
    pub fn clear(&self, check_name: &str) -> Result<usize, CacheError> {
        let slots = self.slot_files(check_name)?;
        for (_, path) in &slots {
            fs::remove_file(path).map_err(|e| CacheError::io(path, e))?;
        }
        info!(check_name, removed = slots.len(), "Cleared alert cache.");
        Ok(slots.len())
    }
}

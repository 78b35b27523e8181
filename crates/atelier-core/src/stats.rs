//! Per-user image generation counters, persisted as one JSON object.
//!
//! The file is rewritten in full on every increment. The in-memory map is only
//! updated after the write succeeded, so a failed write leaves every count as it was.
//! A file that fails to parse is reported as an error and never rewritten.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AtelierError, Result};
use crate::types::UserId;

pub struct GenerationStats {
    path: PathBuf,
    counts: Mutex<Option<HashMap<String, u64>>>,
}

impl GenerationStats {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            counts: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<HashMap<String, u64>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        // a file that does not parse is left alone so nobody's counts are overwritten
        serde_json::from_str(&raw).map_err(|err| {
            warn!(
                "stats file unreadable, leaving it untouched: path={} err={}",
                self.path.display(),
                err
            );
            AtelierError::Persistence(io::Error::new(io::ErrorKind::InvalidData, err))
        })
    }

    async fn write_file(&self, counts: &HashMap<String, u64>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let sorted: BTreeMap<&String, &u64> = counts.iter().collect();
        let body = serde_json::to_vec_pretty(&sorted)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn count(&self, user_id: UserId) -> Result<u64> {
        let mut guard = self.counts.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        Ok(guard
            .as_ref()
            .and_then(|map| map.get(&user_id.to_string()).copied())
            .unwrap_or(0))
    }

    /// Adds one generation for `user_id` and persists before returning the new count.
    pub async fn increment(&self, user_id: UserId) -> Result<u64> {
        let mut guard = self.counts.lock().await;
        let mut next = match guard.as_ref() {
            Some(map) => map.clone(),
            None => self.read_file().await?,
        };
        let key = user_id.to_string();
        let count = next.get(&key).copied().unwrap_or(0) + 1;
        next.insert(key, count);

        self.write_file(&next).await?;
        *guard = Some(next);
        info!("generation counted: user_id={} total={}", user_id, count);
        Ok(count)
    }
}

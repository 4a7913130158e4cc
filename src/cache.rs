use crate::error::PipelineError;
use crate::fetch::DatasetSource;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

struct CacheEntry {
    table: Arc<DataFrame>,
    fetched_at: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Process-wide memo of fetched tables keyed by source path.
///
/// Each key has its own async lock, so sessions racing on an expired key share
/// a single in-flight fetch instead of issuing duplicates. Fetch failures are
/// returned to the caller; an expired table is never served in their place.
pub struct DatasetCache {
    source: Arc<dyn DatasetSource>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl DatasetCache {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the table for `path`, fetching it when absent or at least `ttl` old.
    pub async fn get_or_fetch(&self, path: &str, ttl: Duration) -> Result<Arc<DataFrame>, PipelineError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(path.to_string()).or_default().clone()
        };

        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            let age = cached.fetched_at.elapsed();
            if age < ttl {
                debug!(path, age_ms = age.as_millis() as u64, "dataset cache hit");
                return Ok(cached.table.clone());
            }
            info!(path, age_secs = age.as_secs(), "cached dataset expired, refreshing");
        } else {
            info!(path, "dataset cache miss");
        }

        let table = Arc::new(self.source.fetch(path).await?);
        *entry = Some(CacheEntry {
            table: table.clone(),
            fetched_at: Instant::now(),
        });
        Ok(table)
    }
}

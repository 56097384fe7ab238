//! Single-entry forecast cache
//!
//! Entries are immutable and swapped wholesale. Each entry remembers the
//! model generation it was computed from, so an entry produced by a forecast
//! that raced a retrain is never served against the new generation.

use crate::models::ForecastPoint;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastCacheEntry {
    pub created_at: DateTime<Utc>,
    pub horizon_hours: usize,
    pub predictions: Vec<ForecastPoint>,
    pub generation: u64,
}

impl ForecastCacheEntry {
    /// Usable for a request of `hours` at `now` against `generation`
    pub fn serves(&self, hours: usize, generation: u64, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.generation == generation
            && hours <= self.predictions.len()
            && now - self.created_at < ttl
    }
}

#[derive(Debug, Default)]
pub struct ForecastCache {
    entry: RwLock<Option<Arc<ForecastCacheEntry>>>,
}

impl ForecastCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<ForecastCacheEntry>> {
        match self.entry.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn put(&self, entry: ForecastCacheEntry) {
        self.replace(Some(Arc::new(entry)));
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    fn replace(&self, value: Option<Arc<ForecastCacheEntry>>) {
        let mut guard = match self.entry.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }
}

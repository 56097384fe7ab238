//! In-memory sample store
//!
//! Keeps samples ordered and unique by timestamp; a later insert for the same
//! timestamp replaces the earlier value.

use super::{async_trait, DataSource};
use crate::error::{PredictorError, Result};
use crate::models::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cap on rows returned by a recent-data query
    pub max_recent_rows: usize,
    /// Cap on rows read by a training query
    pub max_query_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_recent_rows: 10_000,
            max_query_rows: 50_000,
        }
    }
}

pub struct InMemorySampleStore {
    config: StoreConfig,
    samples: RwLock<BTreeMap<DateTime<Utc>, f64>>,
    online: AtomicBool,
}

impl InMemorySampleStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            samples: RwLock::new(BTreeMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Seed from a JSON array of `{"timestamp": ..., "value": ...}` objects
    pub async fn from_json_file(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let samples: Vec<Sample> = serde_json::from_str(&contents)?;

        let store = Self::new(config);
        let stored = store.insert(samples).await;
        info!(path = %path.display(), samples = stored, "Seeded sample store");
        Ok(store)
    }

    /// Add samples, skipping non-finite or negative values
    ///
    /// Returns the number of samples stored.
    pub async fn insert(&self, samples: impl IntoIterator<Item = Sample>) -> usize {
        let mut stored = 0;
        let mut guard = self.samples.write().await;
        for sample in samples {
            if !sample.value.is_finite() || sample.value < 0.0 {
                warn!(
                    timestamp = %sample.timestamp,
                    value = sample.value,
                    "Skipping malformed sample"
                );
                continue;
            }
            guard.insert(sample.timestamp, sample.value);
            stored += 1;
        }
        stored
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }

    /// Simulate losing or regaining the backing connection
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PredictorError::DatabaseConnectionError {
                message: "sample store is offline".to_string(),
            })
        }
    }

    /// Most recent `cap` samples at or after `since`, ascending
    async fn read_since(&self, since: DateTime<Utc>, cap: usize) -> Vec<Sample> {
        let guard = self.samples.read().await;
        let mut newest_first: Vec<Sample> = guard
            .range(since..)
            .rev()
            .take(cap)
            .map(|(ts, value)| Sample::new(*ts, *value))
            .collect();
        newest_first.reverse();
        newest_first
    }
}

impl Default for InMemorySampleStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Mean per hour bucket, stamped with the bucket start
pub(crate) fn downsample_hourly(samples: &[Sample]) -> Vec<Sample> {
    let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        let bucket = sample.timestamp.timestamp().div_euclid(SECONDS_PER_HOUR);
        let entry = buckets.entry(bucket).or_insert((0.0, 0));
        entry.0 += sample.value;
        entry.1 += 1;
    }
    buckets
        .into_iter()
        .filter_map(|(bucket, (sum, count))| {
            DateTime::<Utc>::from_timestamp(bucket * SECONDS_PER_HOUR, 0)
                .map(|ts| Sample::new(ts, sum / count as f64))
        })
        .collect()
}

#[async_trait]
impl DataSource for InMemorySampleStore {
    async fn get_training_data(&self, days: u32, downsample: bool) -> Result<Vec<Sample>> {
        self.ensure_online()?;
        let since = Utc::now() - Duration::days(i64::from(days));
        let samples = self.read_since(since, self.config.max_query_rows).await;

        let samples = if downsample {
            downsample_hourly(&samples)
        } else {
            samples
        };
        info!(days, downsample, points = samples.len(), "Fetched training data");
        Ok(samples)
    }

    async fn get_recent_data(&self, hours: u32) -> Result<Vec<Sample>> {
        self.ensure_online()?;
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let samples = self.read_since(since, self.config.max_recent_rows).await;
        debug!(hours, points = samples.len(), "Fetched recent data");
        Ok(samples)
    }

    async fn get_data_age_days(&self) -> Result<f64> {
        self.ensure_online()?;
        let guard = self.samples.read().await;
        Ok(match guard.keys().next() {
            Some(oldest) => (Utc::now() - *oldest).num_seconds().max(0) as f64 / 86_400.0,
            None => 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::has_sufficient_data;
    use std::io::Write;

    fn hours_ago(h: i64) -> DateTime<Utc> {
        Utc::now() - Duration::hours(h)
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemorySampleStore::default();
        assert_eq!(store.get_data_age_days().await.unwrap(), 0.0);
        assert!(!has_sufficient_data(&store, 0.0).await.unwrap());
        assert!(store.get_training_data(7, true).await.unwrap().is_empty());
        assert!(store.get_recent_data(24).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_and_unique() {
        let store = InMemorySampleStore::default();
        let ts = hours_ago(3);
        store
            .insert(vec![
                Sample::new(hours_ago(1), 3.0),
                Sample::new(ts, 1.0),
                Sample::new(ts, 2.0),
            ])
            .await;

        let recent = store.get_recent_data(24).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp < recent[1].timestamp);
        assert_eq!(recent[0].value, 2.0);
    }

    #[tokio::test]
    async fn test_malformed_samples_skipped() {
        let store = InMemorySampleStore::default();
        let stored = store
            .insert(vec![
                Sample::new(hours_ago(2), -5.0),
                Sample::new(hours_ago(1), f64::NAN),
                Sample::new(hours_ago(0), 4.0),
            ])
            .await;
        assert_eq!(stored, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_recent_cap_keeps_newest() {
        let store = InMemorySampleStore::new(StoreConfig {
            max_recent_rows: 3,
            ..StoreConfig::default()
        });
        store
            .insert((1..=6).map(|h| Sample::new(hours_ago(h), h as f64)))
            .await;

        let recent = store.get_recent_data(24).await.unwrap();
        let values: Vec<f64> = recent.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn test_training_window_and_downsampling() {
        let store = InMemorySampleStore::default();
        let base = hours_ago(30);
        let samples: Vec<Sample> = (0..(30 * 6))
            .map(|i| Sample::new(base + Duration::minutes(10 * i), (i % 6) as f64))
            .chain(std::iter::once(Sample::new(hours_ago(24 * 10), 99.0)))
            .collect();
        store.insert(samples).await;

        let full = store.get_training_data(7, false).await.unwrap();
        assert_eq!(full.len(), 180);

        let hourly = store.get_training_data(7, true).await.unwrap();
        assert!(hourly.len() >= 30 && hourly.len() <= 31);
        assert!(hourly.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(hourly.iter().all(|s| s.timestamp.timestamp() % 3600 == 0));
        assert!(hourly.iter().all(|s| s.value < 99.0));
    }

    #[test]
    fn test_downsample_means() {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000 - 1_700_000_000 % 3600, 0).unwrap();
        let samples = vec![
            Sample::new(base, 10.0),
            Sample::new(base + Duration::minutes(30), 20.0),
            Sample::new(base + Duration::hours(2), 5.0),
        ];
        let hourly = downsample_hourly(&samples);
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0], Sample::new(base, 15.0));
        assert_eq!(hourly[1].timestamp, base + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_data_age_and_sufficiency() {
        let store = InMemorySampleStore::default();
        store.insert(vec![Sample::new(hours_ago(48), 1.0)]).await;

        let age = store.get_data_age_days().await.unwrap();
        assert!((age - 2.0).abs() < 0.01);
        assert!(has_sufficient_data(&store, 1.0).await.unwrap());
        assert!(!has_sufficient_data(&store, 3.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_store_reports_connection_error() {
        let store = InMemorySampleStore::default();
        store.set_online(false);
        let err = store.get_recent_data(1).await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_CONNECTION_ERROR");
    }

    #[tokio::test]
    async fn test_seed_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let samples = vec![Sample::new(hours_ago(2), 7.0), Sample::new(hours_ago(1), 8.0)];
        write!(file, "{}", serde_json::to_string(&samples).unwrap()).unwrap();

        let store = InMemorySampleStore::from_json_file(file.path(), StoreConfig::default())
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);

        let bad = tempfile::NamedTempFile::new().unwrap();
        assert!(InMemorySampleStore::from_json_file(bad.path(), StoreConfig::default())
            .await
            .is_err());
    }
}

//! Sample queries consumed by the lifecycle engine
//!
//! The engine never talks to storage directly. It reads power samples through
//! [`DataSource`]; [`InMemorySampleStore`] is the reference implementation.

mod memory;

pub use memory::{InMemorySampleStore, StoreConfig};
pub(crate) use memory::downsample_hourly;

use crate::error::Result;
use crate::models::Sample;

pub use async_trait::async_trait;

/// Read-only access to stored power samples
///
/// Every returned sequence is ascending by timestamp without duplicates.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Samples from the last `days` days, optionally averaged per hour bucket
    async fn get_training_data(&self, days: u32, downsample_hourly: bool) -> Result<Vec<Sample>>;

    /// Full-resolution samples from the last `hours` hours
    async fn get_recent_data(&self, hours: u32) -> Result<Vec<Sample>>;

    /// Age of the oldest stored sample in days, 0.0 when empty
    async fn get_data_age_days(&self) -> Result<f64>;
}

/// True when data exists and reaches back at least `min_days`
pub async fn has_sufficient_data(source: &dyn DataSource, min_days: f64) -> Result<bool> {
    let age = source.get_data_age_days().await?;
    Ok(age > 0.0 && age >= min_days)
}

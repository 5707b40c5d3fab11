// Repository trait for monitoring data access
use crate::domain::monitoring::{NewReading, StoredReading, WaterBodyLocation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MonitoringRepository: Send + Sync {
    /// Store one reading (or error record) and return its generated id
    async fn insert_reading(&self, reading: NewReading) -> anyhow::Result<i64>;

    /// Every stored row, error records included, oldest first
    async fn list_readings(&self) -> anyhow::Result<Vec<StoredReading>>;

    /// Distinct device ids that have reported anything
    async fn list_device_ids(&self) -> anyhow::Result<Vec<String>>;

    /// Most recent non-error reading, optionally restricted to one device
    async fn latest_reading(&self, device_id: Option<&str>) -> anyhow::Result<Option<StoredReading>>;

    /// Non-error readings for a device in `[start, end)`, oldest first
    async fn readings_between(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredReading>>;

    /// All non-error readings for a device, oldest first
    async fn device_history(&self, device_id: &str) -> anyhow::Result<Vec<StoredReading>>;

    async fn upsert_location(&self, location: WaterBodyLocation) -> anyhow::Result<WaterBodyLocation>;

    async fn get_location(&self, device_id: &str) -> anyhow::Result<Option<WaterBodyLocation>>;

    async fn list_locations(&self) -> anyhow::Result<Vec<WaterBodyLocation>>;

    /// Stored plaintext password for a user, if the user exists
    async fn find_user_password(&self, username: &str) -> anyhow::Result<Option<String>>;

    /// Create the user unless one with that name already exists
    async fn ensure_user(&self, username: &str, password: &str) -> anyhow::Result<()>;
}

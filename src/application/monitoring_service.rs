// Monitoring service - Use cases behind the collector's HTTP surface
use crate::application::monitoring_repository::MonitoringRepository;
use crate::domain::monitoring::{
    ChartSeries, Credentials, DeviceSnapshot, HistoryEntry, IncomingReading, LatestValues,
    StoredReading, WaterBodyLocation,
};
use anyhow::Context;
use chrono::{Days, FixedOffset, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct MonitoringService {
    repository: Arc<dyn MonitoringRepository>,
    offset: FixedOffset,
}

impl MonitoringService {
    /// `offset` is the wall-clock zone used for rendering and day boundaries.
    pub fn new(repository: Arc<dyn MonitoringRepository>, offset: FixedOffset) -> Self {
        Self { repository, offset }
    }

    pub async fn ingest(&self, reading: IncomingReading) -> anyhow::Result<i64> {
        let reading = reading.into_new_reading(Utc::now(), self.offset);
        let device_id = reading.device_id.clone();
        let is_error = reading.is_error;
        let id = self.repository.insert_reading(reading).await?;
        tracing::debug!(device_id = %device_id, id, is_error, "Stored reading");
        Ok(id)
    }

    pub async fn all_readings(&self) -> anyhow::Result<Vec<StoredReading>> {
        self.repository.list_readings().await
    }

    /// Latest non-error row for every device that has one.
    pub async fn latest_per_device(&self) -> anyhow::Result<Vec<StoredReading>> {
        let mut latest = Vec::new();
        for device_id in self.repository.list_device_ids().await? {
            if let Some(reading) = self.repository.latest_reading(Some(&device_id)).await? {
                latest.push(reading);
            }
        }
        Ok(latest)
    }

    pub async fn device_ids(&self) -> anyhow::Result<Vec<String>> {
        self.repository.list_device_ids().await
    }

    pub async fn global_latest(&self) -> anyhow::Result<Option<LatestValues>> {
        let reading = self.repository.latest_reading(None).await?;
        Ok(reading.as_ref().map(LatestValues::from))
    }

    pub async fn latest_for_device(&self, device_id: &str) -> anyhow::Result<Option<DeviceSnapshot>> {
        let reading = self.repository.latest_reading(Some(device_id)).await?;
        Ok(reading.map(|r| DeviceSnapshot::new(&r, self.offset)))
    }

    pub async fn history(&self, device_id: &str) -> anyhow::Result<Vec<HistoryEntry>> {
        let readings = self.repository.device_history(device_id).await?;
        Ok(readings
            .iter()
            .map(|r| HistoryEntry::new(r, self.offset))
            .collect())
    }

    /// Points for one local calendar day.
    pub async fn chart(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<ChartSeries> {
        let start = self
            .offset
            .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
            .single()
            .with_context(|| format!("no local midnight for {date}"))?
            .with_timezone(&Utc);
        let end = start
            .checked_add_days(Days::new(1))
            .with_context(|| format!("date {date} out of range"))?;

        let readings = self.repository.readings_between(device_id, start, end).await?;
        Ok(ChartSeries::from_readings(&readings, self.offset))
    }

    pub async fn set_location(&self, location: WaterBodyLocation) -> anyhow::Result<WaterBodyLocation> {
        self.repository.upsert_location(location).await
    }

    pub async fn location(&self, device_id: &str) -> anyhow::Result<Option<WaterBodyLocation>> {
        self.repository.get_location(device_id).await
    }

    pub async fn locations(&self) -> anyhow::Result<Vec<WaterBodyLocation>> {
        self.repository.list_locations().await
    }

    /// Plaintext comparison against the stored password.
    pub async fn login(&self, credentials: &Credentials) -> anyhow::Result<bool> {
        let stored = self
            .repository
            .find_user_password(&credentials.username)
            .await?;
        Ok(stored.is_some_and(|password| password == credentials.password))
    }

    pub async fn seed_user(&self, username: &str, password: &str) -> anyhow::Result<()> {
        self.repository.ensure_user(username, password).await
    }
}

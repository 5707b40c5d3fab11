// Collector-side monitoring models
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Reading POSTed to the collector. Lenient: error records and partially
/// valid readings arrive through the same endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingReading {
    pub device_id: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ph_value: Option<f64>,
    #[serde(default)]
    pub tds_value: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub raw_data: Option<String>,
    #[serde(default)]
    pub raw_bytes: Option<String>,
}

impl IncomingReading {
    /// Resolve the timestamp (naive values are read in `offset`) and fall back
    /// to `received_at` when it is absent or unparseable.
    pub fn into_new_reading(self, received_at: DateTime<Utc>, offset: FixedOffset) -> NewReading {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|ts| parse_timestamp(ts, offset))
            .unwrap_or(received_at);

        NewReading {
            device_id: self.device_id,
            ph_value: self.ph_value,
            tds_value: self.tds_value,
            temperature: self.temperature,
            timestamp,
            is_error: self.is_error,
            error: self.error,
            raw_data: self.raw_data,
            raw_bytes: self.raw_bytes,
        }
    }
}

fn parse_timestamp(value: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|ts| ts.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub ph_value: Option<f64>,
    pub tds_value: Option<f64>,
    pub temperature: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub is_error: bool,
    pub error: Option<String>,
    pub raw_data: Option<String>,
    pub raw_bytes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    pub device_id: String,
    pub ph_value: Option<f64>,
    pub tds_value: Option<f64>,
    pub temperature: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_bytes: Option<String>,
}

/// Dashboard headline values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestValues {
    pub ph_value: Option<f64>,
    pub tds_value: Option<f64>,
    pub temperature: Option<f64>,
}

impl From<&StoredReading> for LatestValues {
    fn from(reading: &StoredReading) -> Self {
        Self {
            ph_value: reading.ph_value,
            tds_value: reading.tds_value,
            temperature: reading.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub ph_value: Option<f64>,
    pub tds_value: Option<f64>,
    pub temperature: Option<f64>,
    pub created_at: String,
}

impl DeviceSnapshot {
    pub fn new(reading: &StoredReading, offset: FixedOffset) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            ph_value: reading.ph_value,
            tds_value: reading.tds_value,
            temperature: reading.temperature,
            created_at: reading.timestamp.with_timezone(&offset).to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub device_id: String,
    pub timestamp: String,
    pub ph_value: Option<f64>,
    pub tds_value: Option<f64>,
    pub temperature: Option<f64>,
}

impl HistoryEntry {
    pub fn new(reading: &StoredReading, offset: FixedOffset) -> Self {
        Self {
            device_id: reading.device_id.clone(),
            timestamp: reading.timestamp.with_timezone(&offset).to_rfc3339(),
            ph_value: reading.ph_value,
            tds_value: reading.tds_value,
            temperature: reading.temperature,
        }
    }
}

/// Per-day series for the dashboard charts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub time_labels: Vec<String>,
    pub ph_values: Vec<Option<f64>>,
    pub tds_values: Vec<Option<f64>>,
    pub temperature_values: Vec<Option<f64>>,
}

impl ChartSeries {
    pub fn from_readings(readings: &[StoredReading], offset: FixedOffset) -> Self {
        let mut series = Self::default();
        for reading in readings {
            series.time_labels.push(
                reading
                    .timestamp
                    .with_timezone(&offset)
                    .format("%H:%M")
                    .to_string(),
            );
            series.ph_values.push(reading.ph_value);
            series.tds_values.push(reading.tds_value);
            series.temperature_values.push(reading.temperature);
        }
        series
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterBodyLocation {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn incoming(timestamp: Option<&str>) -> IncomingReading {
        IncomingReading {
            device_id: "esp32_001".to_string(),
            is_error: false,
            timestamp: timestamp.map(str::to_string),
            ph_value: Some(7.1),
            tds_value: None,
            temperature: Some(24.0),
            error: None,
            raw_data: None,
            raw_bytes: None,
        }
    }

    #[test]
    fn test_timestamp_resolution() {
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        let rfc = incoming(Some("2024-05-01T09:15:00+02:00")).into_new_reading(received, cat());
        assert_eq!(rfc.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 7, 15, 0).unwrap());

        let naive = incoming(Some("2024-05-01T09:15:00.250000")).into_new_reading(received, cat());
        assert_eq!(naive.timestamp.format("%H:%M:%S%.3f").to_string(), "07:15:00.250");

        let garbage = incoming(Some("yesterday")).into_new_reading(received, cat());
        assert_eq!(garbage.timestamp, received);

        let absent = incoming(None).into_new_reading(received, cat());
        assert_eq!(absent.timestamp, received);
        assert_eq!(absent.tds_value, None);
    }

    #[test]
    fn test_chart_labels_use_display_offset() {
        let reading = StoredReading {
            id: 1,
            device_id: "esp32_001".to_string(),
            ph_value: Some(6.9),
            tds_value: Some(410.0),
            temperature: None,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 22, 5, 0).unwrap(),
            is_error: false,
            error: None,
            raw_data: None,
            raw_bytes: None,
        };

        let series = ChartSeries::from_readings(&[reading], cat());
        assert_eq!(series.time_labels, vec!["00:05".to_string()]);
        assert_eq!(series.ph_values, vec![Some(6.9)]);
        assert_eq!(series.temperature_values, vec![None]);
    }
}

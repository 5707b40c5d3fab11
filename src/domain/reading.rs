// Sensor reading domain models and the collector wire payload
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Prefix applied to every source key that is not one of the canonical quantities.
pub const PASSTHROUGH_PREFIX: &str = "esp32_";

/// Bytes pulled off the serial link by a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk(Bytes);

impl RawChunk {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// The three logical quantities a water-quality probe reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Ph,
    Tds,
    Temperature,
}

impl Quantity {
    pub const ALL: [Quantity; 3] = [Quantity::Ph, Quantity::Tds, Quantity::Temperature];

    /// Source key preferred when both spellings are present.
    pub fn short_key(self) -> &'static str {
        match self {
            Quantity::Ph => "ph",
            Quantity::Tds => "tds",
            Quantity::Temperature => "temp",
        }
    }

    /// Long source key, also the canonical wire field name.
    pub fn long_key(self) -> &'static str {
        match self {
            Quantity::Ph => "ph_value",
            Quantity::Tds => "tds_value",
            Quantity::Temperature => "temperature",
        }
    }

    /// Prefix of the `_missing` / `_error` / `_raw` marker fields.
    pub fn marker_prefix(self) -> &'static str {
        self.short_key()
    }

    pub fn is_source_key(key: &str) -> bool {
        Self::ALL
            .iter()
            .any(|q| q.short_key() == key || q.long_key() == key)
    }
}

/// Outcome of mapping one quantity out of a parsed object.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(f64),
    /// Key absent from the source object.
    Missing,
    /// Key present but its value is not a finite number.
    Invalid { raw: String, reason: String },
}

impl FieldValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            FieldValue::Value(v) => Some(*v),
            FieldValue::Missing | FieldValue::Invalid { .. } => None,
        }
    }
}

/// A normalized observation, before it is attached to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub ph: FieldValue,
    pub tds: FieldValue,
    pub temperature: FieldValue,
    /// Timestamp supplied by the source, if it sent a usable one.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Extra source keys (unprefixed) with stringified values.
    pub passthrough: BTreeMap<String, String>,
}

impl SensorReading {
    pub fn field(&self, quantity: Quantity) -> &FieldValue {
        match quantity {
            Quantity::Ph => &self.ph,
            Quantity::Tds => &self.tds,
            Quantity::Temperature => &self.temperature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    JsonDecode,
    UnicodeDecode,
    SerialRead,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::JsonDecode => "json_decode_error",
            ErrorKind::UnicodeDecode => "unicode_decode_error",
            ErrorKind::SerialRead => "serial_read_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A poll that produced something other than a usable reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Offending text (or the link failure message); empty when not applicable.
    pub raw_data: String,
    /// Hex dump of undecodable bytes; empty when not applicable.
    pub raw_bytes: String,
    /// Diagnostic detail for the audit log only, never sent on the wire.
    pub detail: Option<String>,
}

impl ErrorRecord {
    pub fn json_decode(text: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::JsonDecode,
            raw_data: text.into(),
            raw_bytes: String::new(),
            detail: Some(detail.into()),
        }
    }

    pub fn unicode_decode(chunk: &RawChunk) -> Self {
        Self {
            kind: ErrorKind::UnicodeDecode,
            raw_data: String::new(),
            raw_bytes: chunk.to_hex(),
            detail: None,
        }
    }

    pub fn serial_read(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::SerialRead,
            raw_data: message.clone(),
            raw_bytes: String::new(),
            detail: Some(message),
        }
    }
}

/// Everything the normalizer can hand to the dispatcher besides "no data".
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Reading(SensorReading),
    Error(ErrorRecord),
}

/// JSON body POSTed to the collector for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestPayload {
    pub device_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub body: Normalized,
}

impl IngestPayload {
    /// Attach the device and a timestamp; `sent_at` is used only when the
    /// reading carries no timestamp of its own.
    pub fn new(device_id: impl Into<String>, body: Normalized, sent_at: DateTime<FixedOffset>) -> Self {
        let timestamp = match &body {
            Normalized::Reading(reading) => reading.timestamp.unwrap_or(sent_at),
            Normalized::Error(_) => sent_at,
        };
        Self {
            device_id: device_id.into(),
            timestamp,
            body,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, Normalized::Error(_))
    }
}

impl Serialize for IngestPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("device_id", &self.device_id)?;
        map.serialize_entry("is_error", &self.is_error())?;
        map.serialize_entry(
            "timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        )?;

        match &self.body {
            Normalized::Error(record) => {
                map.serialize_entry("error", record.kind.as_str())?;
                map.serialize_entry("raw_data", &record.raw_data)?;
                map.serialize_entry("raw_bytes", &record.raw_bytes)?;
            }
            Normalized::Reading(reading) => {
                for quantity in Quantity::ALL {
                    let field = reading.field(quantity);
                    map.serialize_entry(quantity.long_key(), &field.value())?;
                    let prefix = quantity.marker_prefix();
                    match field {
                        FieldValue::Value(_) => {}
                        FieldValue::Missing => {
                            map.serialize_entry(&format!("{prefix}_missing"), &true)?;
                        }
                        FieldValue::Invalid { raw, reason } => {
                            map.serialize_entry(&format!("{prefix}_error"), reason)?;
                            map.serialize_entry(&format!("{prefix}_raw"), raw)?;
                        }
                    }
                }
                for (key, value) in &reading.passthrough {
                    map.serialize_entry(&format!("{PASSTHROUGH_PREFIX}{key}"), value)?;
                }
            }
        }

        map.end()
    }
}

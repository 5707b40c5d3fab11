// Record normalizer - Classifies one raw chunk and maps it to the canonical shape
use crate::domain::reading::{ErrorRecord, FieldValue, Normalized, Quantity, RawChunk, SensorReading};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const TIMESTAMP_KEY: &str = "timestamp";

/// Classify one poll's chunk. Total over every input: `None` means there was
/// nothing to report (no chunk, or only whitespace).
pub fn normalize(chunk: Option<&RawChunk>) -> Option<Normalized> {
    let chunk = chunk?;

    let text = match std::str::from_utf8(chunk.as_bytes()) {
        Ok(text) => text,
        Err(_) => return Some(Normalized::Error(ErrorRecord::unicode_decode(chunk))),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let verbatim = text.trim_end_matches(['\r', '\n']);
    let object = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            let detail = format!("expected a JSON object, found {}", type_name(&other));
            return Some(Normalized::Error(ErrorRecord::json_decode(verbatim, detail)));
        }
        Err(e) => {
            return Some(Normalized::Error(ErrorRecord::json_decode(verbatim, e.to_string())));
        }
    };

    Some(Normalized::Reading(map_reading(&object)))
}

fn map_reading(object: &Map<String, Value>) -> SensorReading {
    let timestamp = object
        .get(TIMESTAMP_KEY)
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts.trim()).ok());

    let passthrough: BTreeMap<String, String> = object
        .iter()
        .filter(|(key, _)| !Quantity::is_source_key(key))
        .filter(|(key, _)| !(key.as_str() == TIMESTAMP_KEY && timestamp.is_some()))
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect();

    SensorReading {
        ph: map_quantity(object, Quantity::Ph),
        tds: map_quantity(object, Quantity::Tds),
        temperature: map_quantity(object, Quantity::Temperature),
        timestamp,
        passthrough,
    }
}

/// The short key wins whenever it is present, even if its value is unusable.
fn map_quantity(object: &Map<String, Value>, quantity: Quantity) -> FieldValue {
    match object
        .get(quantity.short_key())
        .or_else(|| object.get(quantity.long_key()))
    {
        None => FieldValue::Missing,
        Some(value) => coerce(value),
    }
}

fn coerce(value: &Value) -> FieldValue {
    let parsed = match value {
        // Out-of-range literals like 1e400 keep their text and parse to inf
        Value::Number(n) => n.as_f64().or_else(|| n.to_string().parse::<f64>().ok()),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => FieldValue::Value(v),
        Some(_) => FieldValue::Invalid {
            raw: stringify(value),
            reason: "non-finite value".to_string(),
        },
        None => FieldValue::Invalid {
            raw: stringify(value),
            reason: match value {
                Value::String(s) => format!("could not convert string to float: {s:?}"),
                other => format!("expected a number, found {}", type_name(other)),
            },
        },
    }
}

/// Strings pass through verbatim; anything else as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

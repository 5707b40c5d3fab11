// Simulator - Posts random readings for fake devices
use crate::domain::device::Device;
use crate::domain::reading::{FieldValue, IngestPayload, Normalized, SensorReading};
use crate::infrastructure::collector_client::{CollectorClient, DeliveryError};
use crate::infrastructure::config::SimulatorConfig;
use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// A plausible reading with every quantity present.
pub fn generate_reading<R: Rng + ?Sized>(rng: &mut R) -> SensorReading {
    SensorReading {
        ph: FieldValue::Value(round_to(rng.gen_range(5.0..=9.5), 2)),
        tds: FieldValue::Value(round_to(rng.gen_range(100.0..=1000.0), 1)),
        temperature: FieldValue::Value(round_to(rng.gen_range(18.0..=35.0), 1)),
        timestamp: None,
        passthrough: BTreeMap::new(),
    }
}

/// Run one posting task per configured device until `shutdown` flips.
pub async fn run_simulator(
    config: &SimulatorConfig,
    client: CollectorClient,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        devices = config.devices.len(),
        url = %client.url(),
        "Starting simulator"
    );

    let mut handles = Vec::with_capacity(config.devices.len());
    for (index, device) in config.devices.iter().enumerate() {
        if index > 0 && !config.stagger().is_zero() {
            tokio::time::sleep(config.stagger()).await;
        }
        handles.push(tokio::spawn(simulate_device(
            device.device(),
            client.clone(),
            config.interval(),
            shutdown.clone(),
        )));
    }

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Simulator task ended abnormally");
        }
    }
}

async fn simulate_device(
    device: Device,
    client: CollectorClient,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rng = StdRng::from_entropy();

    while !*shutdown.borrow() {
        let reading = generate_reading(&mut rng);
        let payload = IngestPayload::new(
            device.id.clone(),
            Normalized::Reading(reading),
            Local::now().fixed_offset(),
        );

        match client.post_reading(&payload).await {
            Ok(ack) => tracing::info!(
                device_id = %device.id,
                id = ack.id.as_deref().unwrap_or("N/A"),
                "Simulated reading sent"
            ),
            Err(DeliveryError::Http { status, body }) => {
                tracing::warn!(device_id = %device.id, status, body = %body, "Collector rejected simulated reading")
            }
            Err(DeliveryError::Connect(_)) => {
                tracing::warn!(device_id = %device.id, url = %client.url(), "Collector not reachable")
            }
            Err(e) => tracing::warn!(device_id = %device.id, error = %e, "Error sending simulated reading"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
}

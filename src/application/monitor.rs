// Poll loop - One independent read/normalize/dispatch cycle per device
use crate::application::dispatcher::{DispatchOutcome, Dispatcher};
use crate::application::line_reader::{ReaderError, SharedReader};
use crate::application::normalizer::normalize;
use crate::domain::device::Device;
use crate::domain::reading::{ErrorKind, ErrorRecord, Normalized, RawChunk};
use crate::infrastructure::audit_log::{AuditEvent, AuditLog};
use anyhow::Context;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct DeviceMonitor {
    device: Device,
    reader: SharedReader,
    dispatcher: Dispatcher,
    audit: AuditLog,
    interval: Duration,
}

impl DeviceMonitor {
    pub fn new(
        device: Device,
        reader: SharedReader,
        dispatcher: Dispatcher,
        audit: AuditLog,
        interval: Duration,
    ) -> Self {
        Self {
            device,
            reader,
            dispatcher,
            audit,
            interval,
        }
    }

    /// Poll until `shutdown` flips. A poll in progress always runs to
    /// completion; only the sleep between polls is interrupted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let link = match self.reader.lock() {
            Ok(guard) => guard.describe(),
            Err(poisoned) => poisoned.into_inner().describe(),
        };
        tracing::info!(
            device_id = %self.device.id,
            link = %link,
            interval_secs = self.interval.as_secs_f64(),
            "Starting monitor"
        );

        while !*shutdown.borrow() {
            match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    tracing::debug!(device_id = %self.device.id, ?outcome, "Poll complete");
                }
                Ok(Err(e)) => self.report_fault(format!("{e:#}")).await,
                Err(panic) => self.report_fault(panic_message(panic.as_ref())).await,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(device_id = %self.device.id, "Monitor stopped");
    }

    /// One read, normalize, dispatch cycle.
    pub async fn poll_once(&self) -> anyhow::Result<DispatchOutcome> {
        let (chunk, result) = match read_chunk(self.reader.clone()).await? {
            Ok(chunk) => {
                let result = normalize(chunk.as_ref());
                (chunk, result)
            }
            Err(e) => {
                tracing::warn!(device_id = %self.device.id, error = %e, "Error reading from serial");
                (None, Some(Normalized::Error(ErrorRecord::serial_read(e.to_string()))))
            }
        };

        for event in observation_events(chunk.as_ref(), result.as_ref()) {
            self.audit.record(event).await?;
        }

        let outcome = self.dispatcher.dispatch(&self.device, result).await?;
        Ok(outcome)
    }

    async fn report_fault(&self, message: String) {
        tracing::error!(device_id = %self.device.id, error = %message, "Monitor error");
        let event = AuditEvent::MonitorError {
            device: self.device.name.clone(),
            message,
        };
        if let Err(e) = self.audit.record(event).await {
            tracing::error!(error = %e, "Failed to write audit log");
        }
    }
}

/// Serial reads block, so they run on the blocking pool. A reader that
/// panicked mid-poll leaves the lock poisoned; the next poll reuses it anyway.
async fn read_chunk(reader: SharedReader) -> anyhow::Result<Result<Option<RawChunk>, ReaderError>> {
    tokio::task::spawn_blocking(move || {
        let mut guard = match reader.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.poll()
    })
    .await
    .context("serial read task failed")
}

/// Audit lines describing what arrived on the link this poll.
pub fn observation_events(chunk: Option<&RawChunk>, result: Option<&Normalized>) -> Vec<AuditEvent> {
    let mut events = Vec::new();

    if let Some(Normalized::Error(record)) = result {
        match record.kind {
            ErrorKind::SerialRead => {
                events.push(AuditEvent::ReadError(record.raw_data.clone()));
                return events;
            }
            ErrorKind::UnicodeDecode => {
                events.push(AuditEvent::BinaryData(record.raw_bytes.clone()));
                return events;
            }
            ErrorKind::JsonDecode => {}
        }
    }

    let Some(chunk) = chunk else {
        return events;
    };
    let decoded = String::from_utf8_lossy(chunk.as_bytes());
    let decoded = decoded.trim();
    events.push(AuditEvent::Raw {
        hex: chunk.to_hex(),
        decoded: decoded.to_string(),
    });

    match result {
        Some(Normalized::Reading(_)) => {
            let json = serde_json::from_str::<serde_json::Value>(decoded)
                .map(|value| value.to_string())
                .unwrap_or_else(|_| decoded.to_string());
            events.push(AuditEvent::Json(json));
        }
        Some(Normalized::Error(record)) => {
            events.push(AuditEvent::JsonError {
                message: record.detail.clone().unwrap_or_default(),
                data: record.raw_data.clone(),
            });
        }
        None => {}
    }

    events
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: unknown cause".to_string()
    }
}

/// Running set of device monitors plus the links they read from.
pub struct Supervisor {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    readers: Vec<SharedReader>,
    audit: AuditLog,
}

impl Supervisor {
    /// Spawn one task per monitor, pausing `stagger` between starts.
    pub async fn start(
        monitors: Vec<DeviceMonitor>,
        readers: Vec<SharedReader>,
        audit: AuditLog,
        stagger: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(monitors.len());

        for (index, monitor) in monitors.into_iter().enumerate() {
            if index > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            handles.push(tokio::spawn(monitor.run(shutdown_rx.clone())));
        }

        Self {
            shutdown,
            handles,
            readers,
            audit,
        }
    }

    /// Stop every loop, release the serial handles and close the session.
    pub async fn shutdown(self) -> std::io::Result<()> {
        let _ = self.shutdown.send(true);

        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Monitor task ended abnormally");
            }
        }

        for reader in &self.readers {
            let mut guard = match reader.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.close();
        }

        self.audit.record(AuditEvent::SessionEnded).await
    }
}

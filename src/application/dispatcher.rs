// Dispatcher - Forwards one poll's result to the collector and records the outcome
use crate::domain::device::Device;
use crate::domain::reading::{IngestPayload, Normalized};
use crate::infrastructure::audit_log::{AuditEvent, AuditLog};
use crate::infrastructure::collector_client::{CollectorClient, DeliveryError};
use chrono::Local;

/// How a single poll ended, as far as the collector is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoData,
    Sent { id: Option<String> },
    HttpError { status: u16 },
    ConnectionFailed,
    SendError(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    client: CollectorClient,
    audit: AuditLog,
}

impl Dispatcher {
    pub fn new(client: CollectorClient, audit: AuditLog) -> Self {
        Self { client, audit }
    }

    /// Forward `result` for `device`. Every call writes exactly one outcome
    /// line to the audit log; nothing is retried here.
    pub async fn dispatch(
        &self,
        device: &Device,
        result: Option<Normalized>,
    ) -> std::io::Result<DispatchOutcome> {
        let Some(body) = result else {
            tracing::debug!(device_id = %device.id, "No data this poll");
            self.audit
                .record(AuditEvent::NoData {
                    device: device.name.clone(),
                })
                .await?;
            return Ok(DispatchOutcome::NoData);
        };

        if let Normalized::Error(record) = &body {
            tracing::warn!(
                device_id = %device.id,
                error = %record.kind,
                "Forwarding error record to collector"
            );
        }

        let payload = IngestPayload::new(device.id.clone(), body, Local::now().fixed_offset());
        let (outcome, event) = match self.client.post_reading(&payload).await {
            Ok(ack) => {
                let id = ack.id.clone().unwrap_or_else(|| "N/A".to_string());
                tracing::info!(device_id = %device.id, id = %id, "Data sent");
                (
                    DispatchOutcome::Sent { id: ack.id },
                    AuditEvent::Sent {
                        device: device.name.clone(),
                        id,
                    },
                )
            }
            Err(DeliveryError::Http { status, body }) => {
                tracing::warn!(device_id = %device.id, status, "Collector rejected reading");
                (
                    DispatchOutcome::HttpError { status },
                    AuditEvent::HttpError {
                        device: device.name.clone(),
                        status,
                        body,
                    },
                )
            }
            Err(DeliveryError::Connect(e)) => {
                tracing::warn!(
                    device_id = %device.id,
                    url = %self.client.url(),
                    error = %e,
                    "Collector not reachable"
                );
                (
                    DispatchOutcome::ConnectionFailed,
                    AuditEvent::ConnectionFailed {
                        device: device.name.clone(),
                    },
                )
            }
            Err(DeliveryError::Send(message)) => {
                tracing::warn!(device_id = %device.id, error = %message, "Error sending data");
                (
                    DispatchOutcome::SendError(message.clone()),
                    AuditEvent::SendError {
                        device: device.name.clone(),
                        message,
                    },
                )
            }
        };

        self.audit.record(event).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
pub mod testing {
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    /// In-process collector stand-in that records every payload it receives.
    #[derive(Clone)]
    pub struct StubCollector {
        pub base_url: String,
        pub received: Arc<Mutex<Vec<Value>>>,
    }

    impl StubCollector {
        pub async fn spawn(status: StatusCode, body: &'static str) -> Self {
            let received = Arc::new(Mutex::new(Vec::new()));
            let app = Router::new()
                .route(
                    "/data",
                    post(
                        move |State(received): State<Arc<Mutex<Vec<Value>>>>,
                              Json(payload): Json<Value>| async move {
                            received.lock().unwrap().push(payload);
                            (status, body)
                        },
                    ),
                )
                .with_state(received.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base_url: format!("http://{addr}"),
                received,
            }
        }

        pub fn hits(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }
}

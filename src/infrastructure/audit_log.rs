// Append-only diagnostic trail of everything observed and sent
use anyhow::Context;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const BANNER_RULE_WIDTH: usize = 60;
const HTTP_BODY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Raw { hex: String, decoded: String },
    Json(String),
    JsonError { message: String, data: String },
    BinaryData(String),
    ReadError(String),
    NoData { device: String },
    Sent { device: String, id: String },
    HttpError { device: String, status: u16, body: String },
    ConnectionFailed { device: String },
    SendError { device: String, message: String },
    MonitorError { device: String, message: String },
    SessionStarted { port: String, baud_rate: u32 },
    SessionEnded,
}

impl AuditEvent {
    /// Render the event as it appears in the file, trailing newline included.
    pub fn render(&self, now: &str) -> String {
        let details = match self {
            AuditEvent::Raw { hex, decoded } => {
                format!("RAW: {} | DECODED: {}", hex, single_line(decoded))
            }
            AuditEvent::Json(json) => format!("JSON: {}", single_line(json)),
            AuditEvent::JsonError { message, data } => {
                format!("JSON ERROR: {} | DATA: {}", single_line(message), single_line(data))
            }
            AuditEvent::BinaryData(hex) => format!("BINARY DATA: {hex}"),
            AuditEvent::ReadError(message) => format!("READ ERROR: {}", single_line(message)),
            AuditEvent::NoData { device } => format!("{device}: NO DATA"),
            AuditEvent::Sent { device, id } => format!("{device}: SENT | RESPONSE: {id}"),
            AuditEvent::HttpError {
                device,
                status,
                body,
            } => {
                let body: String = body.chars().take(HTTP_BODY_LIMIT).collect();
                format!("{device}: HTTP ERROR {status} | {}", single_line(&body))
            }
            AuditEvent::ConnectionFailed { device } => {
                format!("{device}: CONNECTION FAILED - collector not reachable")
            }
            AuditEvent::SendError { device, message } => {
                format!("{device}: SEND ERROR: {}", single_line(message))
            }
            AuditEvent::MonitorError { device, message } => {
                format!("{device}: MONITOR ERROR: {}", single_line(message))
            }
            AuditEvent::SessionStarted { port, baud_rate } => {
                let rule = "=".repeat(BANNER_RULE_WIDTH);
                return format!(
                    "\n{rule}\nMonitoring Session Started: {now}\nSerial Port: {port} | Baud Rate: {baud_rate}\n{rule}\n\n"
                );
            }
            AuditEvent::SessionEnded => {
                let rule = "=".repeat(BANNER_RULE_WIDTH);
                return format!("\n{rule}\nMonitoring Session Ended: {now}\n{rule}\n\n");
            }
        };
        format!("[{now}] {details}\n")
    }
}

/// Keep one event on one line no matter what the device sent.
fn single_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// Shared handle to the audit file. Clones append to the same file; each
/// event is written whole while holding the lock.
#[derive(Clone)]
pub struct AuditLog {
    path: Arc<PathBuf>,
    file: Arc<Mutex<File>>,
}

impl AuditLog {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;

        Ok(Self {
            path: Arc::new(path),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, event: AuditEvent) -> std::io::Result<()> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = event.render(&now);

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

// Line reader seam - Where raw chunks come from
use crate::domain::reading::RawChunk;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Faults on the serial link itself. Ordinary absence of data is not an error.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("serial link unavailable: {0}")]
    Link(String),
    #[error("serial read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of newline-terminated chunks. `poll` never waits for a line when
/// nothing is pending; it returns `Ok(None)` straight away.
pub trait LineReader: Send {
    fn poll(&mut self) -> Result<Option<RawChunk>, ReaderError>;

    /// Human-readable link identifier for logs.
    fn describe(&self) -> String;

    /// Release the underlying handle. Polls after `close` report no data.
    fn close(&mut self) {}
}

/// Readers are shared between the devices wired to the same physical link;
/// the mutex keeps reads on one link strictly sequential.
pub type SharedReader = Arc<Mutex<Box<dyn LineReader>>>;

pub fn shared(reader: Box<dyn LineReader>) -> SharedReader {
    Arc::new(Mutex::new(reader))
}

/// Stand-in used when no serial link could be opened.
#[derive(Debug)]
pub struct DisconnectedReader {
    port: String,
}

impl DisconnectedReader {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

impl LineReader for DisconnectedReader {
    fn poll(&mut self) -> Result<Option<RawChunk>, ReaderError> {
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("{} (disconnected)", self.port)
    }
}

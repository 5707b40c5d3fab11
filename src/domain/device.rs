// Device domain model
/// One physical sensor unit polled by the ingest pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub name: String,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Device with a name derived from its identifier.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = Self::format_name(&id);
        Self { id, name }
    }

    fn format_name(id: &str) -> String {
        // Convert "esp32_001_" to "esp32 001"
        id.trim_end_matches('_').replace('_', " ")
    }
}

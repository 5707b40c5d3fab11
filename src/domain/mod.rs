// Domain layer - Plain data types shared by the ingest pipeline and the collector
pub mod device;
pub mod monitoring;
pub mod reading;

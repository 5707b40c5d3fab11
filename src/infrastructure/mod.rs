// Infrastructure layer - External dependencies and adapters
pub mod audit_log;
pub mod collector_client;
pub mod config;
pub mod http_response;
pub mod serial_reader;
pub mod sqlite_repository;

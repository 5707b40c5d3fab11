// Application layer - Use cases and the seams they depend on
pub mod dispatcher;
pub mod line_reader;
pub mod monitor;
pub mod monitoring_repository;
pub mod monitoring_service;
pub mod normalizer;
pub mod simulator;

// Application layer - Use cases over the analysis engine
pub mod analysis_service;
pub mod telemetry_repository;

pub mod api;
pub mod config;
pub mod engine;
pub mod humanize;
pub mod jobs;
pub mod ledger;
pub mod observability;
pub mod orchestrator;
pub mod postprocess;
pub mod service;
pub mod telemetry;

// Library module for bucket-sync
// Re-exports modules for use in integration tests and the binary

pub mod app;
pub mod aws;
pub mod config;
pub mod events;
pub mod identity;
pub mod report;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod ui;

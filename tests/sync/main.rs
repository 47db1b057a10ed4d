// Test entry point for the sync pipeline
// Engine and orchestration tests share the in-memory store in common.rs


mod app_tests;
mod engine_tests;

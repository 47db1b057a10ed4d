pub mod components;
pub mod dashboard;
pub mod log_layer;

pub use components::{format_bytes, truncate_path};
pub use dashboard::{DashboardState, Frontend, Key, KeySource, LiveDashboard, ScriptedKeys, TerminalKeys};
pub use log_layer::{shared_log, DashboardLogLayer, LogBuffer, SharedLog};

pub mod checks;
pub mod cli;
pub mod config;
pub mod core;
pub mod exit;
pub mod fix;
pub mod logs;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod registry;
pub mod report;
pub mod scan;
pub mod system;
pub mod tui;
pub mod ui;

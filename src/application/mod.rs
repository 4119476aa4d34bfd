//! Application layer - the data service and the CLI on top of it

pub mod commands;
pub mod services;

pub use commands::{Cli, CommandExecutor, Commands};
pub use services::{Collaborators, DataService, ServiceMetrics};

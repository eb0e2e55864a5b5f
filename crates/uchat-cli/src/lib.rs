//! UChat CLI library
//!
//! Configuration, friends persistence, and the interactive terminal built on
//! top of `uchat-core`.

pub mod address;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod external_ip;
pub mod friends;
pub mod port_mapping;
pub mod terminal;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};

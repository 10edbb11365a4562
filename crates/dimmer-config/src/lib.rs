//! Configuration parsing for adaptive-dimmer
//!
//! This crate handles parsing and validating the KDL configuration file
//! shared by the daemon and the CLI.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{load_config, parse_config, parse_config_str};

//! Command handlers
//!
//! Each handler owns the execution logic for one subcommand plus the pure
//! formatting helpers it prints with.

pub mod approve;
pub mod baselines;
pub mod compare;
pub mod config;
pub mod run;
pub mod summarize;

pub use approve::execute_approve;
pub use baselines::execute_baselines;
pub use compare::execute_compare;
pub use config::execute_config;
pub use run::{execute_run, CaptureDirDriver, Suite};
pub use summarize::execute_summarize;

use crate::error::CliResult;
use espejo::Screenshot;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Decode a PNG file
pub fn read_png(path: &Path) -> CliResult<Screenshot> {
    let bytes = std::fs::read(path)?;
    Ok(Screenshot::from_png(&bytes)?)
}

/// Parse a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

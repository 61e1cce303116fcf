//! Espejo CLI: command-line interface for visual regression runs
//!
//! ## Usage
//!
//! ```bash
//! espejo compare current.png baseline.png --max-diff-ratio 0.02 --diff-out diff.png
//! espejo approve shot.png --store baselines --screen login --profile pixel-8:14:en-US:phone
//! espejo baselines --store baselines --screen login --profile pixel-8:14:en-US:phone
//! espejo summarize samples.json --previous last.json
//! espejo config validate espejo.yaml
//! espejo run --suite suite.yaml --captures captures --store baselines --artifacts out
//! ```

#![warn(missing_docs)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    parse_profile, parse_region, ApproveArgs, BaselinesArgs, Cli, ColorArg, Commands,
    CompareArgs, ConfigAction, ConfigArgs, RunArgs, SummarizeArgs, ToleranceArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, ProgressReporter};

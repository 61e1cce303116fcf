//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};
use espejo::{DeviceProfile, Region};
use std::path::PathBuf;

/// Espejo: visual regression and quality gates across a device matrix
#[derive(Parser, Debug)]
#[command(name = "espejo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare a capture against a reference image
    Compare(CompareArgs),

    /// Approve an image as a new baseline version
    Approve(ApproveArgs),

    /// List baseline versions for a screen and profile
    Baselines(BaselinesArgs),

    /// Summarize performance samples
    Summarize(SummarizeArgs),

    /// Inspect submission configuration files
    Config(ConfigArgs),

    /// Run a suite across its device matrix from a capture directory
    Run(RunArgs),
}

/// Tolerance overrides shared by `compare`
#[derive(Args, Debug, Clone, Default)]
pub struct ToleranceArgs {
    /// Maximum ratio of differing pixels (0.0-1.0)
    #[arg(long)]
    pub max_diff_ratio: Option<f64>,

    /// Per-channel difference still counted as equal (0-255)
    #[arg(long)]
    pub channel_delta: Option<u8>,

    /// Region excluded from comparison, as x,y,width,height (repeatable)
    #[arg(long = "ignore", value_parser = parse_region)]
    pub ignore_regions: Vec<Region>,

    /// Region where any differing pixel fails, as x,y,width,height (repeatable)
    #[arg(long = "critical", value_parser = parse_region)]
    pub critical_regions: Vec<Region>,

    /// Apply a 3x3 box blur before comparing
    #[arg(long)]
    pub smooth: bool,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Current capture (PNG)
    pub current: PathBuf,

    /// Reference image (PNG)
    pub baseline: PathBuf,

    /// Tolerance overrides
    #[command(flatten)]
    pub tolerance: ToleranceArgs,

    /// Tolerance loaded from a submission config file (flags override it)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a diff visualization PNG here
    #[arg(long)]
    pub diff_out: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the approve command
#[derive(Parser, Debug)]
pub struct ApproveArgs {
    /// Image to approve (PNG)
    pub image: PathBuf,

    /// Baseline store directory
    #[arg(long)]
    pub store: PathBuf,

    /// Screen identifier
    #[arg(long)]
    pub screen: String,

    /// Device profile as family:os:locale:form_factor
    #[arg(long, value_parser = parse_profile)]
    pub profile: DeviceProfile,

    /// Release version label (default: next sequence number)
    #[arg(long)]
    pub release: Option<String>,

    /// Approver recorded with the baseline
    #[arg(long, env = "ESPEJO_APPROVER", default_value = "espejo-cli")]
    pub approver: String,
}

/// Arguments for the baselines command
#[derive(Parser, Debug)]
pub struct BaselinesArgs {
    /// Baseline store directory
    #[arg(long)]
    pub store: PathBuf,

    /// Screen identifier
    #[arg(long)]
    pub screen: String,

    /// Device profile as family:os:locale:form_factor
    #[arg(long, value_parser = parse_profile)]
    pub profile: DeviceProfile,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the summarize command
#[derive(Parser, Debug)]
pub struct SummarizeArgs {
    /// JSON array of performance samples
    pub samples: PathBuf,

    /// JSON array of the previous run's summaries
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Regression threshold in percent
    #[arg(long, default_value = "20")]
    pub threshold: f64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Check a submission config file
    Validate {
        /// YAML or JSON file
        path: PathBuf,
    },
    /// Print the effective configuration (defaults filled in) as YAML
    Show {
        /// YAML or JSON file; defaults when omitted
        path: Option<PathBuf>,
    },
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite file listing tests and profiles (YAML or JSON)
    #[arg(long)]
    pub suite: PathBuf,

    /// Submission config file (YAML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Capture directory: {captures}/{screen}/{profile_key}.png or {captures}/{screen}.png
    #[arg(long)]
    pub captures: PathBuf,

    /// Baseline store directory
    #[arg(long)]
    pub store: PathBuf,

    /// Artifact output directory
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Also write JUnit XML here
    #[arg(long)]
    pub junit: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Parse `x,y,width,height`
pub fn parse_region(s: &str) -> Result<Region, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got '{s}'"));
    };
    let num = |v: &str| {
        v.parse::<u32>()
            .map_err(|e| format!("invalid number '{v}' in region '{s}': {e}"))
    };
    Ok(Region::new(num(x)?, num(y)?, num(w)?, num(h)?))
}

/// Parse `family:os:locale:form_factor`
pub fn parse_profile(s: &str) -> Result<DeviceProfile, String> {
    s.parse::<DeviceProfile>().map_err(|e| e.to_string())
}

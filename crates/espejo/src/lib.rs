//! Espejo: test orchestration and visual regression for mobile UI flows
//!
//! Espejo (Spanish: "mirror") schedules test cases across a device matrix,
//! compares captured screens against approved baselines, aggregates
//! performance telemetry, and renders a pass/fail quality-gate decision per
//! run. Driving the device is left to a pluggable [`UiDriver`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  selection × matrix ──► TestRun ──► slot ──► UiDriver.capture    │
//! │                                               │                  │
//! │         ┌─────────────────┬───────────────────┼──────────────┐   │
//! │         ▼                 ▼                   ▼              │   │
//! │   BaselineStore ──► DiffEngine        MetricsCollector   Checks  │
//! │                         │                   │              │     │
//! │                         └──────► QualityGate ◄─────────────┘     │
//! │                                      │                           │
//! │                    RetryController ◄─┘──► RunReport / artifacts  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use espejo::{
//!     BaselineStore, DeviceMatrix, DeviceProfile, FormFactor, MockDriver, Orchestrator,
//!     SubmissionConfig, TestCase, TestSelection,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> espejo::EspejoResult<()> {
//! let driver = Arc::new(MockDriver::new());
//! let store = Arc::new(BaselineStore::open("baselines")?);
//! let orchestrator = Orchestrator::new(driver, store);
//!
//! let report = orchestrator
//!     .submit(
//!         &TestSelection::new([TestCase::new("login-renders", "login")]),
//!         &DeviceMatrix::new([DeviceProfile::new("pixel-8", "14", "en-US", FormFactor::Phone)]),
//!         &SubmissionConfig::default(),
//!     )
//!     .await?;
//! println!("{}", report.render_junit());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod artifact;
mod baseline;
mod checks;
mod config;
mod device;
mod diff;
mod driver;
mod gate;
mod metrics;
mod orchestrator;
mod report;
mod result;
mod retry;
mod run;
mod screenshot;

pub use artifact::{ArtifactStore, CAPTURE_FILE, DIFF_FILE, REPORT_FILE};
pub use baseline::{Baseline, BaselineStore};
pub use checks::{CheckFinding, CheckRegistry, ExternalCheck, ExternalFinding, FnCheck};
pub use config::{
    SubmissionConfig, DEFAULT_PERF_REGRESSION_PERCENT, DEFAULT_RUN_TIMEOUT, MAX_SLOTS_PER_PROFILE,
};
pub use device::{sanitize_component, DeviceMatrix, DeviceProfile, FormFactor};
pub use diff::{
    BoundingBox, DetailedDiff, DiffEngine, DiffMask, DiffOutcome, DiffResult, Smoothing,
    ToleranceConfig,
};
pub use driver::{MockCapture, MockDriver, MockProbe, NoopProbe, PerformanceProbe, UiDriver};
pub use gate::{
    Category, CategoryPolicy, CategoryVerdict, GateConfig, GatePolicy, GateReason,
    QualityGate, QualityGateDecision, VerdictStatus,
};
pub use metrics::{
    percentile, regression_delta, MetricsCollector, MetricsHistory, MetricsSummary,
    PerformanceSample,
};
pub use orchestrator::Orchestrator;
pub use report::{RunReport, RunReportEntry, RunSummary};
pub use result::{EspejoError, EspejoResult};
pub use retry::{
    Classification, FailureContext, RetryAttempt, RetryBackoff, RetryConfig, RetryController,
};
pub use run::{RunOutcome, RunState, TestCase, TestRun, TestSelection};
pub use screenshot::{Region, Screenshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        BaselineStore, Category, CategoryPolicy, DeviceMatrix, DeviceProfile, DiffEngine,
        DiffOutcome, EspejoError, EspejoResult, FormFactor, GatePolicy, Orchestrator,
        PerformanceSample, Region, RetryConfig, RunOutcome, RunReport, Screenshot,
        SubmissionConfig, TestCase, TestSelection, ToleranceConfig, UiDriver,
    };
}

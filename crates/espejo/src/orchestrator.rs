//! Submission scheduling across a device matrix.
//!
//! [`Orchestrator::submit`] validates the whole submission first; a
//! [`EspejoError::ConfigInvalid`] rejects the batch before anything is
//! scheduled. Otherwise every (test case, profile) pair becomes a
//! [`TestRun`] spawned on the runtime. Each profile owns a semaphore with
//! `slots_per_profile` permits; an attempt holds one permit from capture to
//! gate decision and releases it before any retry backoff.
//!
//! Each attempt runs under `run_timeout`. Expiry cancels the driver call,
//! returns the slot, and is treated as an indeterminate failure. Pixel
//! comparison runs on the blocking pool.
//!
//! Report entries are in submission order regardless of completion order,
//! and every pair gets an entry, including runs whose task panicked.

use crate::artifact::ArtifactStore;
use crate::baseline::BaselineStore;
use crate::checks::{run_check, CheckRegistry, ExternalCheck, ExternalFinding};
use crate::config::SubmissionConfig;
use crate::device::{DeviceMatrix, DeviceProfile};
use crate::diff::{DetailedDiff, DiffEngine, DiffOutcome, DiffResult};
use crate::driver::{NoopProbe, PerformanceProbe, UiDriver};
use crate::gate::{Category, GateConfig, QualityGate, QualityGateDecision};
use crate::metrics::{MetricsCollector, MetricsHistory, MetricsSummary};
use crate::report::{RunReport, RunReportEntry};
use crate::result::{EspejoError, EspejoResult};
use crate::retry::{Classification, FailureContext, RetryAttempt, RetryController};
use crate::run::{RunOutcome, RunState, TestCase, TestRun, TestSelection};
use crate::screenshot::Screenshot;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Schedules test runs and assembles reports
///
/// Owns its collaborators; nothing is shared process-wide.
pub struct Orchestrator {
    driver: Arc<dyn UiDriver>,
    probe: Arc<dyn PerformanceProbe>,
    baselines: Arc<BaselineStore>,
    checks: CheckRegistry,
    history: Arc<MetricsHistory>,
    artifacts: Option<ArtifactStore>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("checks", &self.checks)
            .field("artifacts", &self.artifacts)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator over a driver and baseline store
    #[must_use]
    pub fn new(driver: Arc<dyn UiDriver>, baselines: Arc<BaselineStore>) -> Self {
        Self {
            driver,
            probe: Arc::new(NoopProbe),
            baselines,
            checks: CheckRegistry::new(),
            history: Arc::new(MetricsHistory::new()),
            artifacts: None,
        }
    }

    /// Set the performance probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn PerformanceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Set the external check registry
    #[must_use]
    pub fn with_checks(mut self, checks: CheckRegistry) -> Self {
        self.checks = checks;
        self
    }

    /// Share a metrics history across orchestrators
    #[must_use]
    pub fn with_history(mut self, history: Arc<MetricsHistory>) -> Self {
        self.history = history;
        self
    }

    /// Write artifacts for every run
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Baseline store handle
    #[must_use]
    pub fn baselines(&self) -> &Arc<BaselineStore> {
        &self.baselines
    }

    /// Metrics history handle
    #[must_use]
    pub fn history(&self) -> &Arc<MetricsHistory> {
        &self.history
    }

    /// Run every selected test case on every profile of the matrix
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::ConfigInvalid`] if the submission is rejected.
    /// Per-run failures are reported in the returned report, never as `Err`.
    pub async fn submit(
        &self,
        selection: &TestSelection,
        matrix: &DeviceMatrix,
        config: &SubmissionConfig,
    ) -> EspejoResult<RunReport> {
        config.validate_for(selection, matrix, &self.checks)?;
        let checks = self.checks.select(&config.checks)?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let pairs = selection.len() * matrix.len();
        let span = tracing::info_span!("submit", run_id = %run_id, pairs);

        let ctx = Arc::new(RunContext {
            run_id: run_id.clone(),
            driver: Arc::clone(&self.driver),
            probe: Arc::clone(&self.probe),
            baselines: Arc::clone(&self.baselines),
            history: Arc::clone(&self.history),
            artifacts: self.artifacts.clone(),
            checks,
            gate: config.gate_config(),
            config: config.clone(),
        });

        let slots: HashMap<&DeviceProfile, Arc<Semaphore>> = matrix
            .iter()
            .map(|p| (p, Arc::new(Semaphore::new(config.slots_per_profile))))
            .collect();

        let mut runs = Vec::with_capacity(pairs);
        let mut handles = Vec::with_capacity(pairs);
        for test_case in selection.iter() {
            for profile in matrix.iter() {
                let run = TestRun::new(test_case.clone(), profile.clone(), runs.len());
                let Some(pool) = slots.get(profile).map(Arc::clone) else {
                    continue;
                };
                let run_span = tracing::info_span!(
                    parent: &span,
                    "test_run",
                    test_case = %test_case.id,
                    profile = %profile.key()
                );
                handles.push(tokio::spawn(
                    execute(Arc::clone(&ctx), run.clone(), pool).instrument(run_span),
                ));
                runs.push(run);
            }
        }

        let mut entries = Vec::with_capacity(pairs);
        for (run, joined) in runs.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::error!(parent: &span, test_case = %run.test_case.id, error = %e, "run task aborted");
                    entries.push(bare_entry(
                        &run,
                        RunOutcome::Failed,
                        0,
                        Some(format!("run aborted: {e}")),
                        std::time::Duration::ZERO,
                    ));
                }
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            entries,
        };
        let summary = report.summary();
        tracing::info!(
            parent: &span,
            passed = summary.passed,
            failed = summary.failed,
            flaky = summary.flaky,
            new_baseline = summary.new_baseline,
            "submission finished"
        );

        if let Some(store) = &self.artifacts {
            if let Err(e) = store.write_report(&report).await {
                tracing::warn!(parent: &span, error = %e, "failed to write run report");
            }
        }
        Ok(report)
    }
}

/// Everything a spawned run needs, shared across the submission
struct RunContext {
    run_id: String,
    driver: Arc<dyn UiDriver>,
    probe: Arc<dyn PerformanceProbe>,
    baselines: Arc<BaselineStore>,
    history: Arc<MetricsHistory>,
    artifacts: Option<ArtifactStore>,
    checks: Vec<Arc<dyn ExternalCheck>>,
    gate: GateConfig,
    config: SubmissionConfig,
}

/// A completed (non-infrastructure-failed) attempt
struct Evaluation {
    capture: Screenshot,
    diff: DiffResult,
    diff_png: Option<Vec<u8>>,
    metrics: Vec<MetricsSummary>,
    findings: Vec<ExternalFinding>,
    decision: QualityGateDecision,
}

async fn execute(ctx: Arc<RunContext>, mut run: TestRun, slots: Arc<Semaphore>) -> RunReportEntry {
    let started = Instant::now();
    let mut history: Vec<RetryAttempt> = Vec::new();
    let mut attempt: u32 = 0;
    advance(&mut run, RunState::Running);

    let (outcome, evaluation, error) = loop {
        attempt += 1;
        let result = {
            let Ok(_permit) = slots.acquire().await else {
                break (RunOutcome::Failed, None, Some("slot pool closed".to_string()));
            };
            tracing::debug!(attempt, "slot acquired");
            let timeout = ctx.config.run_timeout;
            let result = match tokio::time::timeout(timeout, attempt_once(&ctx, &run.test_case, &run.profile)).await {
                Ok(result) => result,
                Err(_) => Err(EspejoError::Timeout {
                    ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            tracing::debug!(attempt, "slot released");
            result
        };

        match result {
            Ok(eval) => {
                if eval.diff.outcome == DiffOutcome::MissingBaseline && eval.decision.overall_pass {
                    break (RunOutcome::NewBaseline, Some(eval), None);
                }
                if eval.decision.overall_pass {
                    let outcome = if attempt > 1 {
                        RunOutcome::FlakyRetry
                    } else {
                        RunOutcome::Passed
                    };
                    break (outcome, Some(eval), None);
                }
                let failure = gate_failure(&eval);
                let classification = RetryController::classify(&failure);
                history.push(RetryAttempt {
                    attempt,
                    failure,
                    classification,
                    backoff_ms: None,
                });
                break (RunOutcome::Failed, Some(eval), None);
            }
            Err(e) => {
                let failure = FailureContext::from_error(&e);
                let classification = RetryController::classify(&failure);
                if RetryController::should_retry(attempt, classification, &ctx.config.retry) {
                    let delay = RetryController::backoff(attempt, &ctx.config.retry);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(attempt, error = %e, delay_ms, "transient failure, retrying");
                    history.push(RetryAttempt {
                        attempt,
                        failure,
                        classification,
                        backoff_ms: Some(delay_ms),
                    });
                    tokio::time::sleep(delay).await;
                    continue;
                }
                if classification == Classification::Indeterminate {
                    tracing::warn!(attempt, error = %e, "retries exhausted");
                }
                let message = failure.describe();
                history.push(RetryAttempt {
                    attempt,
                    failure,
                    classification,
                    backoff_ms: None,
                });
                break (RunOutcome::Failed, None, Some(message));
            }
        }
    };

    advance(&mut run, outcome.state());
    tracing::info!(outcome = %outcome, attempts = attempt, "run finished");

    let mut entry = bare_entry(&run, outcome, attempt, error, started.elapsed());
    entry.retry_history = history;
    let mut capture = None;
    let mut diff_png = None;
    if let Some(eval) = evaluation {
        if !outcome.is_failure() && !eval.metrics.is_empty() {
            ctx.history
                .record(&run.test_case.id, &run.profile, eval.metrics.clone());
        }
        entry.diff = Some(eval.diff);
        entry.metrics = eval.metrics;
        entry.external_findings = eval.findings;
        entry.decision = Some(eval.decision);
        capture = Some(eval.capture);
        diff_png = eval.diff_png;
    }

    if let Some(store) = &ctx.artifacts {
        if let Err(e) = store
            .write_entry(&ctx.run_id, &mut entry, capture.as_ref(), diff_png.as_deref())
            .await
        {
            tracing::warn!(error = %e, "failed to write run artifacts");
        }
    }

    advance(&mut run, RunState::Archived);
    entry
}

/// One capture-to-decision pass
async fn attempt_once(
    ctx: &RunContext,
    test_case: &TestCase,
    profile: &DeviceProfile,
) -> EspejoResult<Evaluation> {
    let capture = ctx.driver.capture(&test_case.screen_id, profile).await?;
    let samples = ctx.probe.collect(test_case, profile).await?;

    let baseline = match ctx.baselines.get(
        &test_case.screen_id,
        profile,
        ctx.config.release_version.as_deref(),
    ) {
        Ok(baseline) => Some(baseline),
        Err(EspejoError::MissingBaseline { .. }) => {
            tracing::info!(screen = %test_case.screen_id, "no baseline, capture is a candidate");
            None
        }
        Err(e) => return Err(e),
    };

    let (capture, diff, diff_png) = match baseline {
        None => (capture, DiffResult::missing_baseline(&test_case.screen_id), None),
        Some(baseline) => {
            let tolerance = ctx.config.tolerance.clone();
            let render = ctx.artifacts.is_some();
            tokio::task::spawn_blocking(move || -> EspejoResult<_> {
                let detailed: DetailedDiff =
                    DiffEngine::compare_detailed(&capture, &baseline.image, &tolerance);
                let png = if render {
                    DiffEngine::render_diff(&capture, &detailed)?
                } else {
                    None
                };
                Ok((capture, detailed.result, png))
            })
            .await
            .map_err(|e| EspejoError::InvalidState {
                message: format!("diff worker failed: {e}"),
            })??
        }
    };

    let previous = ctx.history.previous(&test_case.id, profile);
    let metrics = MetricsCollector::summarize(&samples, &previous);

    let findings = join_all(
        ctx.checks
            .iter()
            .map(|check| run_check(check.as_ref(), test_case, profile)),
    )
    .await;

    let decision = QualityGate::evaluate(
        std::slice::from_ref(&diff),
        &metrics,
        &findings,
        &ctx.gate,
    );

    Ok(Evaluation {
        capture,
        diff,
        diff_png,
        metrics,
        findings,
        decision,
    })
}

/// Failure context of a gate failure, from its first blocking reason
fn gate_failure(eval: &Evaluation) -> FailureContext {
    let Some(reason) = eval.decision.blocking_reasons().next() else {
        return FailureContext::Other {
            message: "quality gate failed".to_string(),
        };
    };
    match reason.category {
        Category::Visual if eval.diff.outcome == DiffOutcome::DimensionMismatch => {
            FailureContext::DimensionMismatch
        }
        Category::Visual => FailureContext::DiffBreach,
        Category::Performance => FailureContext::MetricsRegression,
        Category::Accessibility | Category::Security | Category::Network | Category::Custom => {
            FailureContext::CheckFailed {
                check: reason.subject.clone(),
            }
        }
    }
}

fn advance(run: &mut TestRun, next: RunState) {
    if let Err(e) = run.transition(next) {
        tracing::error!(error = %e, "illegal run transition");
    }
}

fn bare_entry(
    run: &TestRun,
    outcome: RunOutcome,
    attempts: u32,
    error: Option<String>,
    duration: std::time::Duration,
) -> RunReportEntry {
    RunReportEntry {
        test_case_id: run.test_case.id.clone(),
        screen_id: run.test_case.screen_id.clone(),
        device_profile: run.profile.clone(),
        outcome,
        attempts,
        diff: None,
        metrics: Vec::new(),
        external_findings: Vec::new(),
        decision: None,
        retry_history: Vec::new(),
        error,
        duration,
        artifact_dir: None,
    }
}

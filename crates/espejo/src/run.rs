//! Test cases, selections and the per-run state machine.

use crate::device::DeviceProfile;
use crate::result::{EspejoError, EspejoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// A test case as configured by the suite; read-only to the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique test case id
    pub id: String,
    /// Screen the test captures
    pub screen_id: String,
    /// Opaque reference to the automation steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_ref: Option<String>,
}

impl TestCase {
    /// Create a test case without a steps reference
    #[must_use]
    pub fn new(id: impl Into<String>, screen_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            screen_id: screen_id.into(),
            steps_ref: None,
        }
    }

    /// Attach a steps reference
    #[must_use]
    pub fn with_steps_ref(mut self, steps_ref: impl Into<String>) -> Self {
        self.steps_ref = Some(steps_ref.into());
        self
    }
}

/// Ordered set of test cases submitted together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    /// Test cases in submission order
    pub tests: Vec<TestCase>,
}

impl TestSelection {
    /// Create a selection
    #[must_use]
    pub fn new(tests: impl IntoIterator<Item = TestCase>) -> Self {
        Self {
            tests: tests.into_iter().collect(),
        }
    }

    /// Parse a suite file (`tests:` list) from YAML
    ///
    /// # Errors
    ///
    /// Returns error if the YAML does not describe a selection
    pub fn from_yaml_str(yaml: &str) -> EspejoResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load a suite file; `.json` is parsed as JSON, anything else as YAML
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> EspejoResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Self::from_yaml_str(&raw)
        }
    }

    /// Number of test cases
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether the selection is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Iterate in submission order
    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter()
    }

    /// First test case id that appears more than once
    #[must_use]
    pub fn duplicate_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.tests
            .iter()
            .map(|t| t.id.as_str())
            .find(|id| !seen.insert(*id))
    }
}

impl FromIterator<TestCase> for TestSelection {
    fn from_iter<I: IntoIterator<Item = TestCase>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Lifecycle of one test run
///
/// `Pending -> Running -> {Passed, Failed, FlakyRetry, NewBaseline} -> Archived`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Scheduled, waiting for a slot
    Pending,
    /// Holding a slot
    Running,
    /// Gate passed on the first attempt
    Passed,
    /// Gate failed, or retries exhausted
    Failed,
    /// Gate passed after at least one retry
    FlakyRetry,
    /// No baseline existed; capture is a candidate for approval
    NewBaseline,
    /// Report finalized
    Archived,
}

impl RunState {
    /// Whether `next` is a legal successor
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (
                    Self::Running,
                    Self::Passed | Self::Failed | Self::FlakyRetry | Self::NewBaseline
                )
                | (
                    Self::Passed | Self::Failed | Self::FlakyRetry | Self::NewBaseline,
                    Self::Archived
                )
        )
    }

    /// Whether the run has an outcome
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::FlakyRetry | Self::NewBaseline | Self::Archived
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::FlakyRetry => "flaky_retry",
            Self::NewBaseline => "new_baseline",
            Self::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Final outcome recorded in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Passed first time
    Passed,
    /// Failed
    Failed,
    /// Passed after retrying
    FlakyRetry,
    /// Baseline candidate pending approval
    NewBaseline,
}

impl RunOutcome {
    /// State the run enters for this outcome
    #[must_use]
    pub const fn state(self) -> RunState {
        match self {
            Self::Passed => RunState::Passed,
            Self::Failed => RunState::Failed,
            Self::FlakyRetry => RunState::FlakyRetry,
            Self::NewBaseline => RunState::NewBaseline,
        }
    }

    /// Whether the outcome fails the submission
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state().fmt(f)
    }
}

/// One execution of a test case against a device profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    /// Test case
    pub test_case: TestCase,
    /// Target profile
    pub profile: DeviceProfile,
    /// Position in the submission's cross-product
    pub index: usize,
    state: RunState,
}

impl TestRun {
    /// Create a pending run
    #[must_use]
    pub const fn new(test_case: TestCase, profile: DeviceProfile, index: usize) -> Self {
        Self {
            test_case,
            profile,
            index,
            state: RunState::Pending,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::InvalidState`] for an illegal transition
    pub fn transition(&mut self, next: RunState) -> EspejoResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(EspejoError::InvalidState {
                message: format!(
                    "{}/{}: {} -> {}",
                    self.test_case.id,
                    self.profile.key(),
                    self.state,
                    next
                ),
            });
        }
        tracing::trace!(test_case = %self.test_case.id, from = %self.state, to = %next, "run state");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::FormFactor;

    mod selection_tests {
        use super::*;

        #[test]
        fn test_suite_yaml() {
            let yaml = "tests:\n  - id: login-happy\n    screen_id: login\n  - id: home\n    screen_id: home\n    steps_ref: flows/home.yaml\n";
            let sel = TestSelection::from_yaml_str(yaml).unwrap();
            assert_eq!(sel.len(), 2);
            assert_eq!(sel.tests[1].steps_ref.as_deref(), Some("flows/home.yaml"));
            assert!(sel.duplicate_id().is_none());
        }

        #[test]
        fn test_duplicate_id_detected() {
            let sel: TestSelection = [
                TestCase::new("a", "home"),
                TestCase::new("b", "home"),
                TestCase::new("a", "login"),
            ]
            .into_iter()
            .collect();
            assert_eq!(sel.duplicate_id(), Some("a"));
        }
    }

    mod state_tests {
        use super::*;

        #[test]
        fn test_happy_path_transitions() {
            assert!(RunState::Pending.can_transition_to(RunState::Running));
            for end in [
                RunState::Passed,
                RunState::Failed,
                RunState::FlakyRetry,
                RunState::NewBaseline,
            ] {
                assert!(RunState::Running.can_transition_to(end));
                assert!(end.can_transition_to(RunState::Archived));
                assert!(end.is_finished());
            }
        }

        #[test]
        fn test_illegal_transitions() {
            assert!(!RunState::Pending.can_transition_to(RunState::Passed));
            assert!(!RunState::Passed.can_transition_to(RunState::Running));
            assert!(!RunState::Archived.can_transition_to(RunState::Pending));
            assert!(!RunState::Running.can_transition_to(RunState::Archived));
        }

        #[test]
        fn test_run_rejects_skipping_running() {
            let profile = DeviceProfile::new("pixel-8", "14", "en-US", FormFactor::Phone);
            let mut run = TestRun::new(TestCase::new("t", "home"), profile, 0);
            let err = run.transition(RunState::Passed).unwrap_err();
            assert!(matches!(err, EspejoError::InvalidState { .. }));
            run.transition(RunState::Running).unwrap();
            run.transition(RunOutcome::FlakyRetry.state()).unwrap();
            run.transition(RunState::Archived).unwrap();
            assert_eq!(run.state(), RunState::Archived);
        }

        #[test]
        fn test_outcome_display() {
            assert_eq!(RunOutcome::NewBaseline.to_string(), "new_baseline");
            assert!(RunOutcome::Failed.is_failure());
            assert!(!RunOutcome::FlakyRetry.is_failure());
        }
    }
}

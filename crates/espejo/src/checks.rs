//! External check capabilities.
//!
//! Accessibility, security, network and custom checks are collaborators
//! outside the core. Each implements [`ExternalCheck`] and returns the fixed
//! `{pass, findings}` contract ([`CheckFinding`]). A [`CheckRegistry`] holds
//! the registered capabilities; a submission's configuration names which ones
//! run.

use crate::device::DeviceProfile;
use crate::gate::Category;
use crate::result::{EspejoError, EspejoResult};
use crate::run::TestCase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Result contract every external check returns
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckFinding {
    /// Whether the check passed
    pub pass: bool,
    /// Human-readable findings
    pub findings: Vec<String>,
}

impl CheckFinding {
    /// A passing result with no findings
    #[must_use]
    pub fn passed() -> Self {
        Self {
            pass: true,
            findings: Vec::new(),
        }
    }

    /// A failing result
    #[must_use]
    pub fn failed(findings: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            pass: false,
            findings: findings.into_iter().map(Into::into).collect(),
        }
    }
}

/// A check result attributed to its check and category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFinding {
    /// Registered check name
    pub check: String,
    /// Gate category the check reports into
    pub category: Category,
    /// The check's result
    #[serde(flatten)]
    pub result: CheckFinding,
}

/// A pluggable check run once per test run
#[async_trait]
pub trait ExternalCheck: Send + Sync {
    /// Unique registry name
    fn name(&self) -> &str;

    /// Category the result is gated under
    fn category(&self) -> Category;

    /// Evaluate the screen of `test_case` on `profile`
    async fn run(&self, test_case: &TestCase, profile: &DeviceProfile) -> EspejoResult<CheckFinding>;
}

type CheckFn = dyn Fn(&TestCase, &DeviceProfile) -> CheckFinding + Send + Sync;

/// Closure-backed check
pub struct FnCheck {
    name: String,
    category: Category,
    check: Box<CheckFn>,
}

impl FnCheck {
    /// Wrap a synchronous closure as a check
    pub fn new<F>(name: impl Into<String>, category: Category, check: F) -> Self
    where
        F: Fn(&TestCase, &DeviceProfile) -> CheckFinding + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            category,
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for FnCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCheck")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExternalCheck for FnCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    async fn run(&self, test_case: &TestCase, profile: &DeviceProfile) -> EspejoResult<CheckFinding> {
        Ok((self.check)(test_case, profile))
    }
}

/// Named external check capabilities
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: BTreeMap<String, Arc<dyn ExternalCheck>>,
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under its own name, replacing any previous one
    pub fn register(&mut self, check: impl ExternalCheck + 'static) {
        let check: Arc<dyn ExternalCheck> = Arc::new(check);
        self.checks.insert(check.name().to_string(), check);
    }

    /// Builder form of [`CheckRegistry::register`]
    #[must_use]
    pub fn with(mut self, check: impl ExternalCheck + 'static) -> Self {
        self.register(check);
        self
    }

    /// Whether a check with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checks.keys().map(String::as_str).collect()
    }

    /// Resolve the named checks in the given order
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::ConfigInvalid`] for an unregistered name
    pub fn select(&self, names: &[String]) -> EspejoResult<Vec<Arc<dyn ExternalCheck>>> {
        names
            .iter()
            .map(|name| {
                self.checks
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EspejoError::config(format!("unknown check: {name}")))
            })
            .collect()
    }
}

/// Run one check, folding errors into a failing finding
pub(crate) async fn run_check(
    check: &dyn ExternalCheck,
    test_case: &TestCase,
    profile: &DeviceProfile,
) -> ExternalFinding {
    let result = match check.run(test_case, profile).await {
        Ok(finding) => finding,
        Err(e) => {
            tracing::warn!(check = check.name(), error = %e, "external check errored");
            CheckFinding::failed([format!("check error: {e}")])
        }
    };
    ExternalFinding {
        check: check.name().to_string(),
        category: check.category(),
        result,
    }
}

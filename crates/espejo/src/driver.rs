//! Collaborator interfaces: UI driver and performance probe.
//!
//! The engine never drives a device itself. A [`UiDriver`] produces the
//! screenshot for a screen on a profile; a [`PerformanceProbe`] hands over the
//! samples emitted during the run window. Both are called under the
//! orchestrator's per-attempt timeout.
//!
//! [`MockDriver`] and [`MockProbe`] are scripted implementations for tests.

use crate::device::DeviceProfile;
use crate::metrics::PerformanceSample;
use crate::result::{EspejoError, EspejoResult};
use crate::run::TestCase;
use crate::screenshot::Screenshot;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Produces captures of a screen on a device profile
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Capture `screen_id` on `profile`
    ///
    /// Implementations report infrastructure trouble as
    /// [`EspejoError::InfraTransient`] or [`EspejoError::Timeout`].
    async fn capture(&self, screen_id: &str, profile: &DeviceProfile) -> EspejoResult<Screenshot>;
}

/// Source of performance samples for a run
#[async_trait]
pub trait PerformanceProbe: Send + Sync {
    /// Samples emitted while `test_case` ran on `profile`
    async fn collect(
        &self,
        test_case: &TestCase,
        profile: &DeviceProfile,
    ) -> EspejoResult<Vec<PerformanceSample>>;
}

/// Probe that never reports samples
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl PerformanceProbe for NoopProbe {
    async fn collect(&self, _: &TestCase, _: &DeviceProfile) -> EspejoResult<Vec<PerformanceSample>> {
        Ok(Vec::new())
    }
}

/// A scripted driver response
#[derive(Debug, Clone)]
pub enum MockCapture {
    /// Return this image
    Image(Screenshot),
    /// Fail with [`EspejoError::InfraTransient`]
    Transient(String),
    /// Never answer
    Hang,
}

type ScriptKey = (String, String);

/// Scripted driver for testing
///
/// Scripted responses for a `(screen, profile)` pair are consumed first, in
/// order; afterwards the screen's fixed image is returned.
#[derive(Debug, Default)]
pub struct MockDriver {
    images: Mutex<HashMap<String, Screenshot>>,
    scripts: Mutex<HashMap<ScriptKey, VecDeque<MockCapture>>>,
    latency: Duration,
    call_history: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated capture latency
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Image returned for `screen_id` on every profile
    pub fn set_screenshot(&self, screen_id: &str, screenshot: Screenshot) {
        lock(&self.images).insert(screen_id.to_string(), screenshot);
    }

    /// Queue a one-off response for a pair
    pub fn push_script(&self, screen_id: &str, profile: &DeviceProfile, response: MockCapture) {
        lock(&self.scripts)
            .entry((screen_id.to_string(), profile.key()))
            .or_default()
            .push_back(response);
    }

    /// Calls as `capture:{screen}:{profile_key}`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        lock(&self.call_history).clone()
    }

    /// Number of captures requested for a screen
    #[must_use]
    pub fn call_count(&self, screen_id: &str) -> usize {
        let prefix = format!("capture:{screen_id}:");
        lock(&self.call_history)
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Highest number of simultaneous captures observed on a profile
    #[must_use]
    pub fn peak_concurrency(&self, profile: &DeviceProfile) -> usize {
        lock(&self.peak).get(&profile.key()).copied().unwrap_or(0)
    }

    fn enter(&self, key: &str) -> InFlight<'_> {
        let mut in_flight = lock(&self.in_flight);
        let now = in_flight.entry(key.to_string()).or_insert(0);
        *now += 1;
        let current = *now;
        drop(in_flight);
        let mut peak = lock(&self.peak);
        let seen = peak.entry(key.to_string()).or_insert(0);
        *seen = (*seen).max(current);
        InFlight {
            driver: self,
            key: key.to_string(),
        }
    }
}

/// Decrements the in-flight count even when the capture is cancelled
struct InFlight<'a> {
    driver: &'a MockDriver,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(n) = lock(&self.driver.in_flight).get_mut(&self.key) {
            *n = n.saturating_sub(1);
        }
    }
}

#[async_trait]
impl UiDriver for MockDriver {
    async fn capture(&self, screen_id: &str, profile: &DeviceProfile) -> EspejoResult<Screenshot> {
        let key = profile.key();
        lock(&self.call_history).push(format!("capture:{screen_id}:{key}"));
        let _guard = self.enter(&key);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = lock(&self.scripts)
            .get_mut(&(screen_id.to_string(), key))
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(MockCapture::Image(shot)) => Ok(shot),
            Some(MockCapture::Transient(message)) => Err(EspejoError::transient(message)),
            Some(MockCapture::Hang) => {
                std::future::pending::<()>().await;
                Err(EspejoError::transient("unreachable hang"))
            }
            None => lock(&self.images)
                .get(screen_id)
                .cloned()
                .ok_or_else(|| EspejoError::transient(format!("no mock screenshot for {screen_id}"))),
        }
    }
}

/// Scripted probe returning fixed samples per test case
#[derive(Debug, Default)]
pub struct MockProbe {
    samples: Mutex<HashMap<String, Vec<PerformanceSample>>>,
}

impl MockProbe {
    /// Create an empty probe
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples reported for every run of `test_case_id`
    pub fn set_samples(&self, test_case_id: &str, samples: Vec<PerformanceSample>) {
        lock(&self.samples).insert(test_case_id.to_string(), samples);
    }
}

#[async_trait]
impl PerformanceProbe for MockProbe {
    async fn collect(
        &self,
        test_case: &TestCase,
        _: &DeviceProfile,
    ) -> EspejoResult<Vec<PerformanceSample>> {
        Ok(lock(&self.samples)
            .get(&test_case.id)
            .cloned()
            .unwrap_or_default())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::FormFactor;

    fn phone() -> DeviceProfile {
        DeviceProfile::new("pixel-8", "14", "en-US", FormFactor::Phone)
    }

    #[tokio::test]
    async fn test_scripts_consumed_before_fixed_image() {
        let driver = MockDriver::new();
        driver.set_screenshot("home", Screenshot::solid(2, 2, [0, 0, 0, 255]));
        driver.push_script("home", &phone(), MockCapture::Transient("adb offline".into()));

        let err = driver.capture("home", &phone()).await.unwrap_err();
        assert!(err.is_transient());
        let shot = driver.capture("home", &phone()).await.unwrap();
        assert_eq!(shot.dimensions(), (2, 2));
        assert_eq!(driver.call_count("home"), 2);
        assert_eq!(driver.history()[0], format!("capture:home:{}", phone().key()));
    }

    #[tokio::test]
    async fn test_unknown_screen_is_transient() {
        let err = MockDriver::new().capture("nope", &phone()).await.unwrap_err();
        assert!(matches!(err, EspejoError::InfraTransient { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_is_cancellable() {
        let driver = MockDriver::new();
        driver.push_script("home", &phone(), MockCapture::Hang);
        let res = tokio::time::timeout(Duration::from_secs(1), driver.capture("home", &phone())).await;
        assert!(res.is_err());
        // guard released on cancellation
        assert_eq!(lock(&driver.in_flight).get(&phone().key()).copied(), Some(0));
        assert_eq!(driver.peak_concurrency(&phone()), 1);
    }

    #[tokio::test]
    async fn test_probe_samples_by_test_case() {
        let probe = MockProbe::new();
        probe.set_samples("launch", vec![PerformanceSample::timing("launch_ms", 812.0)]);
        let got = probe.collect(&TestCase::new("launch", "home"), &phone()).await.unwrap();
        assert_eq!(got.len(), 1);
        let none = NoopProbe.collect(&TestCase::new("x", "home"), &phone()).await.unwrap();
        assert!(none.is_empty());
    }
}

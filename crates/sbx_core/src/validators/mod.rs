//! Validation stages run against a live sandbox.

pub mod build;
pub mod health;
pub mod smoke;

use std::sync::Arc;

use sbx_runner::SandboxProvider;
use tracing::info;

pub use build::{BuildValidator, BUILD_COMMAND};
pub use health::{HealthChecker, HealthProbe, HttpProbe};
pub use smoke::{SmokeTestRunner, TestSummary, SMOKE_TEST_PATH};

use crate::classifier::ErrorClassifier;
use crate::config::PipelineSettings;
use crate::types::{TestResult, ValidationResult};

/// Runs build, health and smoke test stages in order.
pub struct Validator {
    build: BuildValidator,
    health: HealthChecker,
    smoke: SmokeTestRunner,
}

impl Validator {
    pub fn new(build: BuildValidator, health: HealthChecker, smoke: SmokeTestRunner) -> Self {
        Self { build, health, smoke }
    }

    /// Standard stages with an HTTP health probe.
    pub fn from_settings(classifier: Arc<ErrorClassifier>, settings: &PipelineSettings) -> Self {
        Self::with_probe(classifier, settings, Arc::new(HttpProbe::new()))
    }

    pub fn with_probe(
        classifier: Arc<ErrorClassifier>,
        settings: &PipelineSettings,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            build: BuildValidator::new(classifier.clone()),
            health: HealthChecker::new(probe, settings.health.clone()),
            smoke: SmokeTestRunner::new(classifier, settings.tests.clone()),
        }
    }

    /// Build, then health (always), then smoke tests when the build passed.
    pub async fn validate(&self, provider: &dyn SandboxProvider, url: &str, source: &str) -> ValidationResult {
        let build = self.build.validate(provider).await;
        let health = self.health.wait_for_healthy(url).await;
        let tests = if build.passed {
            self.smoke.run(provider, source).await
        } else {
            TestResult::skipped("Build failed")
        };

        let result = ValidationResult::new(build, tests, health);
        info!(
            "Validation {}: build={} health={} tests={:?} ({} error(s))",
            if result.success { "passed" } else { "failed" },
            result.build.passed,
            result.health.passed,
            result.tests.status,
            result.errors.len()
        );
        result
    }
}

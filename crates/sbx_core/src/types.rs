//! Sandbox records, classified errors and stage results.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sbx_runner::ProviderKind;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Lifecycle of a sandbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Pending,
    Provisioning,
    Setup,
    ApplyingCode,
    InstallingPackages,
    Validating,
    Repairing,
    Ready,
    Failed,
    Terminated,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Setup => "setup",
            Self::ApplyingCode => "applying_code",
            Self::InstallingPackages => "installing_packages",
            Self::Validating => "validating",
            Self::Repairing => "repairing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Terminated)
    }

    /// Forward-only transitions plus the validating/repairing cycle.
    ///
    /// `failed` and `terminated` are reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: SandboxStatus) -> bool {
        use SandboxStatus::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (_, Terminated)
                | (Pending, Provisioning)
                | (Provisioning, Setup)
                | (Setup, ApplyingCode)
                | (ApplyingCode, InstallingPackages)
                | (InstallingPackages, Validating)
                | (Validating, Repairing)
                | (Repairing, Validating)
                | (Validating, Ready)
        )
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    MissingPackage,
    MissingImport,
    SyntaxError,
    TypeError,
    RuntimeError,
    BuildError,
    Timeout,
    ProviderError,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        Self::MissingPackage,
        Self::MissingImport,
        Self::SyntaxError,
        Self::TypeError,
        Self::RuntimeError,
        Self::BuildError,
        Self::Timeout,
        Self::ProviderError,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingPackage => "missing-package",
            Self::MissingImport => "missing-import",
            Self::SyntaxError => "syntax-error",
            Self::TypeError => "type-error",
            Self::RuntimeError => "runtime-error",
            Self::BuildError => "build-error",
            Self::Timeout => "timeout",
            Self::ProviderError => "provider-error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can fix an error. Declaration order is repair priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixTier {
    /// A mechanical fix is known
    Auto,
    /// Needs semantic repair
    Ai,
    /// Cannot be resolved automatically
    User,
}

impl fmt::Display for FixTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Ai => "ai",
            Self::User => "user",
        })
    }
}

/// A raw diagnostic normalized into the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub fixable: FixTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, fixable: FixTier, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            fixable,
            file: None,
            line: None,
            column: None,
            suggestion: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// One entry of a record's error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub category: ErrorCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fixable: FixTier,
}

impl From<&ClassifiedError> for ErrorHistoryEntry {
    fn from(error: &ClassifiedError) -> Self {
        Self {
            category: error.category,
            message: error.message.clone(),
            timestamp: Utc::now(),
            fixable: error.fixable,
        }
    }
}

/// Durable state of one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: String,
    pub tool_id: String,
    pub generation_id: String,
    pub provider: Option<ProviderKind>,
    pub provider_sandbox_id: Option<String>,
    pub url: Option<String>,
    pub status: SandboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_history: Vec<ErrorHistoryEntry>,
    pub build_passed: Option<bool>,
    pub tests_passed: Option<bool>,
    pub health_check_passed: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SandboxRecord {
    pub fn new(
        tool_id: impl Into<String>,
        generation_id: impl Into<String>,
        max_retries: u32,
        lifetime_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_id: tool_id.into(),
            generation_id: generation_id.into(),
            provider: None,
            provider_sandbox_id: None,
            url: None,
            status: SandboxStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            error_history: Vec::new(),
            build_passed: None,
            tests_passed: None,
            health_check_passed: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(lifetime_secs as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether another repair attempt fits in the budget.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Apply a partial update, enforcing the state machine.
    pub fn apply(&mut self, patch: &SandboxPatch) -> CoreResult<()> {
        if let Some(lifetime) = patch.reset {
            self.reset_for_retry(lifetime);
        } else if self.status.is_terminal() {
            return Err(CoreError::Finalized(self.id.clone()));
        }

        if let Some(next) = patch.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(CoreError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
        }
        if let Some(count) = patch.retry_count {
            if count > self.max_retries {
                return Err(CoreError::RetryLimitExceeded {
                    count,
                    max: self.max_retries,
                });
            }
            self.retry_count = count;
        }
        if let Some(next) = patch.status {
            self.status = next;
        }
        if let Some(provider) = patch.provider {
            self.provider = Some(provider);
        }
        if let Some(id) = &patch.provider_sandbox_id {
            self.provider_sandbox_id = Some(id.clone());
        }
        if let Some(url) = &patch.url {
            self.url = Some(url.clone());
        }
        if let Some(error) = &patch.last_error {
            self.last_error = Some(error.clone());
        }
        self.error_history.extend(patch.append_errors.iter().cloned());
        if let Some(flag) = patch.build_passed {
            self.build_passed = flag;
        }
        if let Some(flag) = patch.tests_passed {
            self.tests_passed = flag;
        }
        if let Some(flag) = patch.health_check_passed {
            self.health_check_passed = flag;
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = expires_at;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn reset_for_retry(&mut self, lifetime_secs: u64) {
        let now = Utc::now();
        self.status = SandboxStatus::Pending;
        self.retry_count = 0;
        self.provider = None;
        self.provider_sandbox_id = None;
        self.url = None;
        self.last_error = None;
        self.build_passed = None;
        self.tests_passed = None;
        self.health_check_passed = None;
        self.expires_at = now + Duration::seconds(lifetime_secs as i64);
    }
}

/// Partial update of a [`SandboxRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandboxPatch {
    /// Explicit retry: reset to `pending` with a fresh lifetime (seconds).
    pub reset: Option<u64>,
    pub status: Option<SandboxStatus>,
    pub provider: Option<ProviderKind>,
    pub provider_sandbox_id: Option<String>,
    pub url: Option<String>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub append_errors: Vec<ErrorHistoryEntry>,
    pub build_passed: Option<Option<bool>>,
    pub tests_passed: Option<Option<bool>>,
    pub health_check_passed: Option<Option<bool>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SandboxPatch {
    pub fn status(status: SandboxStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn retry(lifetime_secs: u64) -> Self {
        Self {
            reset: Some(lifetime_secs),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(SandboxStatus::Failed),
            last_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind, sandbox_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.provider_sandbox_id = Some(sandbox_id.into());
        self.url = Some(url.into());
        self
    }

    pub fn with_validation(mut self, validation: &ValidationResult) -> Self {
        self.build_passed = Some(Some(validation.build.passed));
        self.tests_passed = Some(validation.tests.tests_passed());
        self.health_check_passed = Some(Some(validation.health.passed));
        self
    }

    pub fn with_history(mut self, errors: &[ClassifiedError]) -> Self {
        self.append_errors.extend(errors.iter().map(ErrorHistoryEntry::from));
        self
    }
}

/// Outcome of the project build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub passed: bool,
    pub errors: Vec<ClassifiedError>,
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of the smoke test stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: TestStatus,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub errors: Vec<ClassifiedError>,
    pub output: String,
    pub skip_reason: Option<String>,
}

impl TestResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Skipped,
            passed: 0,
            failed: 0,
            total: 0,
            errors: Vec::new(),
            output: String::new(),
            skip_reason: Some(reason.into()),
        }
    }

    /// `None` when the stage did not run.
    pub fn tests_passed(&self) -> Option<bool> {
        match self.status {
            TestStatus::Passed => Some(true),
            TestStatus::Failed => Some(false),
            TestStatus::Skipped => None,
        }
    }
}

/// Outcome of an HTTP health probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub passed: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Aggregate of one validation round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub build: BuildResult,
    pub tests: TestResult,
    pub health: HealthCheckResult,
    pub errors: Vec<ClassifiedError>,
}

impl ValidationResult {
    /// Success requires the build and the health check; tests only add errors.
    pub fn new(build: BuildResult, tests: TestResult, health: HealthCheckResult) -> Self {
        let mut errors = build.errors.clone();
        errors.extend(tests.errors.iter().cloned());
        if !health.passed {
            let message = health
                .error
                .clone()
                .unwrap_or_else(|| "Health check failed".to_string());
            let category = if message.contains("Timeout") {
                ErrorCategory::Timeout
            } else {
                ErrorCategory::RuntimeError
            };
            errors.push(ClassifiedError::new(category, FixTier::Ai, message));
        }
        Self {
            success: build.passed && health.passed,
            build,
            tests,
            health,
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMethod {
    Auto,
    Ai,
    None,
}

/// Outcome of one repair attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairResult {
    pub method: RepairMethod,
    pub fixes_applied: Vec<String>,
    pub remaining: Vec<ClassifiedError>,
    pub tokens_used: u64,
}

impl RepairResult {
    pub fn none(remaining: Vec<ClassifiedError>) -> Self {
        Self {
            method: RepairMethod::None,
            fixes_applied: Vec::new(),
            remaining,
            tokens_used: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.method != RepairMethod::None
    }
}

/// What the inbound entrypoints report to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub success: bool,
    pub sandbox_id: String,
    pub sandbox_url: Option<String>,
    pub error: Option<String>,
    pub user_message: Option<String>,
    pub can_retry: bool,
    pub duration_ms: u64,
}

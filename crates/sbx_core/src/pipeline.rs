//! The provisioning, validation and repair state machine.
//!
//! One run owns one sandbox:
//!
//! ```text
//! pending -> provisioning -> setup -> applying_code -> installing_packages
//!         -> validating <-> repairing -> ready | failed
//! ```
//!
//! Any non-terminal state may end in `terminated` when the run is cancelled.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use sbx_runner::{ProviderFactory, SandboxProvider};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::ErrorClassifier;
use crate::config::PipelineSettings;
use crate::error::{CoreError, CoreResult};
use crate::lease::SandboxLease;
use crate::packages::PackageDetector;
use crate::repair::{RepairEngine, TextGenerator};
use crate::store::SandboxStore;
use crate::template::{SandboxTemplate, ENTRY_FILE};
use crate::types::{
    ClassifiedError, PipelineResult, SandboxPatch, SandboxRecord, SandboxStatus, ValidationResult,
};
use crate::validators::{HealthProbe, Validator};

const TEMPLATE_INSTALL: &str = "npm install --no-audit --no-fund --loglevel=error";

const MSG_VALIDATION_FAILED: &str =
    "We couldn't get your app running. Try again, or adjust your request and resubmit.";
const MSG_NO_PROVIDER: &str =
    "No sandbox environment is available right now. Check the sandbox configuration.";
const MSG_CANCELLED: &str = "The sandbox run was cancelled.";
const MSG_INTERNAL: &str = "Something went wrong while preparing your app. Please try again.";

/// Result of a run plus the live sandbox when it reached `ready`.
#[derive(Debug)]
pub struct PipelineRun {
    pub result: PipelineResult,
    pub lease: Option<SandboxLease>,
}

enum RunOutcome {
    Ready { url: String },
    Failed { message: String },
}

/// Drives a generation attempt from provisioning to a terminal state.
pub struct Orchestrator {
    settings: PipelineSettings,
    factory: ProviderFactory,
    store: Arc<dyn SandboxStore>,
    classifier: Arc<ErrorClassifier>,
    detector: Arc<PackageDetector>,
    validator: Validator,
    repair: RepairEngine,
}

impl Orchestrator {
    pub fn new(settings: PipelineSettings, store: Arc<dyn SandboxStore>) -> Self {
        let classifier = Arc::new(ErrorClassifier::new());
        let detector = Arc::new(PackageDetector::new());
        let factory = ProviderFactory::from_settings(&settings.providers, settings.sandbox.clone());
        Self {
            validator: Validator::from_settings(classifier.clone(), &settings),
            repair: RepairEngine::new(classifier.clone(), detector.clone()),
            classifier,
            detector,
            factory,
            store,
            settings,
        }
    }

    pub fn with_factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.repair = self.repair.with_generator(generator);
        self
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.validator = Validator::with_probe(self.classifier.clone(), &self.settings, probe);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SandboxStore> {
        &self.store
    }

    pub async fn run_pipeline(&self, tool_id: &str, generation_id: &str, source: &str) -> PipelineRun {
        self.run_pipeline_with_cancel(tool_id, generation_id, source, CancellationToken::new())
            .await
    }

    /// Create a record for this attempt and run it to a terminal state.
    pub async fn run_pipeline_with_cancel(
        &self,
        tool_id: &str,
        generation_id: &str,
        source: &str,
        cancel: CancellationToken,
    ) -> PipelineRun {
        let started = Instant::now();
        let record = SandboxRecord::new(
            tool_id,
            generation_id,
            self.settings.max_retries,
            self.settings.sandbox.lifetime_secs,
        );
        info!("Starting sandbox {} for tool {} generation {}", record.id, tool_id, generation_id);

        let stored = match self.store.create(&record).await {
            Ok(()) => self.store.save_source(tool_id, source).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            error!("Could not persist sandbox {}: {}", record.id, e);
            return PipelineRun {
                result: PipelineResult {
                    success: false,
                    sandbox_id: record.id,
                    sandbox_url: None,
                    error: Some(e.to_string()),
                    user_message: Some(MSG_INTERNAL.to_string()),
                    can_retry: true,
                    duration_ms: elapsed_ms(started),
                },
                lease: None,
            };
        }

        self.execute(record, source, cancel, started).await
    }

    pub async fn retry_sandbox(&self, sandbox_id: &str) -> CoreResult<PipelineRun> {
        self.retry_sandbox_with_cancel(sandbox_id, CancellationToken::new()).await
    }

    /// Re-run a finished record with the tool's latest source.
    pub async fn retry_sandbox_with_cancel(
        &self,
        sandbox_id: &str,
        cancel: CancellationToken,
    ) -> CoreResult<PipelineRun> {
        let started = Instant::now();
        let record = self.store.get(sandbox_id).await?;
        if !record.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: record.status,
                to: SandboxStatus::Pending,
            });
        }
        let source = self.store.latest_source(&record.tool_id).await?;
        let record = self
            .store
            .update(sandbox_id, &SandboxPatch::retry(self.settings.sandbox.lifetime_secs))
            .await?;
        info!("Retrying sandbox {} for tool {}", record.id, record.tool_id);

        Ok(self.execute(record, &source, cancel, started).await)
    }

    /// The single boundary where errors and panics become terminal states.
    async fn execute(
        &self,
        record: SandboxRecord,
        source: &str,
        cancel: CancellationToken,
        started: Instant,
    ) -> PipelineRun {
        let id = record.id.clone();
        let slot: Mutex<Option<Arc<dyn SandboxProvider>>> = Mutex::new(None);

        let outcome = AssertUnwindSafe(self.drive(record, source, &cancel, &slot))
            .catch_unwind()
            .await;
        let provider = slot.lock().take();

        let (patch, result) = match outcome {
            Ok(Ok(RunOutcome::Ready { url })) => {
                let expires_at = match self.store.get(&id).await {
                    Ok(record) => record.expires_at,
                    Err(_) => chrono::Utc::now(),
                };
                info!("Sandbox {} is ready at {}", id, url);
                let lease = provider.map(|p| SandboxLease::new(id.clone(), url.clone(), expires_at, p));
                return PipelineRun {
                    result: PipelineResult {
                        success: true,
                        sandbox_id: id,
                        sandbox_url: Some(url),
                        error: None,
                        user_message: None,
                        can_retry: false,
                        duration_ms: elapsed_ms(started),
                    },
                    lease,
                };
            }
            Ok(Ok(RunOutcome::Failed { message })) => {
                warn!("Sandbox {} failed validation: {}", id, message);
                (
                    SandboxPatch::failed(message.clone()),
                    failure(&id, message, MSG_VALIDATION_FAILED, true),
                )
            }
            Ok(Err(CoreError::Cancelled)) => {
                info!("Sandbox {} cancelled", id);
                (
                    SandboxPatch::status(SandboxStatus::Terminated).with_last_error("Cancelled"),
                    failure(&id, "Cancelled".to_string(), MSG_CANCELLED, true),
                )
            }
            Ok(Err(e)) if e.is_configuration() => {
                error!("Sandbox {} cannot run: {}", id, e);
                (
                    SandboxPatch::failed(e.to_string()),
                    failure(&id, e.to_string(), MSG_NO_PROVIDER, false),
                )
            }
            Ok(Err(e)) => {
                error!("Sandbox {} failed: {}", id, e);
                (
                    SandboxPatch::failed(e.to_string()),
                    failure(&id, e.to_string(), MSG_INTERNAL, true),
                )
            }
            Err(panic) => {
                let message = format!("Pipeline panicked: {}", panic_message(&panic));
                error!("Sandbox {}: {}", id, message);
                (
                    SandboxPatch::failed(message.clone()),
                    failure(&id, message, MSG_INTERNAL, true),
                )
            }
        };

        if let Some(provider) = provider {
            if let Err(e) = provider.terminate().await {
                warn!("Best-effort termination of sandbox {} failed: {}", id, e);
            }
        }
        if let Err(e) = self.store.update(&id, &patch).await {
            warn!("Could not record final state of sandbox {}: {}", id, e);
        }

        let mut result = result;
        result.duration_ms = elapsed_ms(started);
        PipelineRun { result, lease: None }
    }

    async fn drive(
        &self,
        mut record: SandboxRecord,
        source: &str,
        cancel: &CancellationToken,
        slot: &Mutex<Option<Arc<dyn SandboxProvider>>>,
    ) -> CoreResult<RunOutcome> {
        let id = record.id.clone();
        ensure_live(cancel)?;

        // pending -> provisioning
        self.transition(&mut record, SandboxStatus::Provisioning).await?;
        let provisioned = self.factory.provision().await?;
        let provider: Arc<dyn SandboxProvider> = Arc::from(provisioned.provider);
        *slot.lock() = Some(provider.clone());
        let url = provisioned.info.url.clone();
        record = self
            .store
            .update(
                &id,
                &SandboxPatch::default().with_provider(
                    provisioned.info.provider,
                    provisioned.info.id.clone(),
                    url.clone(),
                ),
            )
            .await?;
        ensure_live(cancel)?;

        // provisioning -> setup
        self.transition(&mut record, SandboxStatus::Setup).await?;
        cancellable(cancel, self.setup(provider.as_ref(), &record.tool_id)).await??;

        // setup -> applying_code
        self.transition(&mut record, SandboxStatus::ApplyingCode).await?;
        cancellable(cancel, provider.write_file(ENTRY_FILE, source)).await??;

        // applying_code -> installing_packages
        self.transition(&mut record, SandboxStatus::InstallingPackages).await?;
        let packages = self.detector.detect(source);
        if !packages.is_empty() {
            info!("Installing detected packages: {}", packages.join(", "));
            let result = cancellable(cancel, provider.install_packages(&packages)).await?;
            if !result.success {
                // The build will surface whatever is still missing.
                warn!("Package install failed: {}", result.stderr.trim());
            }
        }

        // installing_packages -> validating
        self.transition(&mut record, SandboxStatus::Validating).await?;
        let mut validation = self.validate(&mut record, provider.as_ref(), &url, source, cancel).await?;
        let mut remaining: Vec<ClassifiedError> = validation.errors.clone();
        let mut stalled = false;
        let mut tokens_used = 0u64;

        while !validation.success && !stalled && record.has_retries_left() && !record.is_expired() {
            ensure_live(cancel)?;

            // validating -> repairing
            let patch = SandboxPatch {
                retry_count: Some(record.retry_count + 1),
                ..SandboxPatch::status(SandboxStatus::Repairing)
            }
            .with_history(&validation.errors);
            record = self.store.update(&id, &patch).await?;
            info!(
                "Repair attempt {}/{} for sandbox {} ({} error(s))",
                record.retry_count,
                record.max_retries,
                id,
                validation.errors.len()
            );

            let repair = cancellable(cancel, self.repair.repair(provider.as_ref(), &validation.errors)).await?;
            tokens_used += repair.tokens_used;
            for fix in &repair.fixes_applied {
                debug!("Applied fix: {}", fix);
            }

            if repair.success() {
                // repairing -> validating
                self.transition(&mut record, SandboxStatus::Validating).await?;
                let current = provider
                    .read_file(ENTRY_FILE)
                    .await
                    .unwrap_or_else(|_| source.to_string());
                validation = self.validate(&mut record, provider.as_ref(), &url, &current, cancel).await?;
                remaining = validation.errors.clone();
            } else {
                stalled = true;
                remaining = repair.remaining;
            }
        }

        if tokens_used > 0 {
            info!("Sandbox {} used {} generation tokens", id, tokens_used);
        }

        if validation.success {
            // validating -> ready
            self.transition(&mut record, SandboxStatus::Ready).await?;
            return Ok(RunOutcome::Ready { url });
        }

        let message = if !stalled && record.has_retries_left() && record.is_expired() {
            "Sandbox lifetime expired before validation passed".to_string()
        } else {
            remaining
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Validation failed".to_string())
        };
        Ok(RunOutcome::Failed { message })
    }

    async fn transition(&self, record: &mut SandboxRecord, status: SandboxStatus) -> CoreResult<()> {
        debug!("Sandbox {}: {} -> {}", record.id, record.status, status);
        *record = self.store.update(&record.id, &SandboxPatch::status(status)).await?;
        Ok(())
    }

    /// Write the template, install its dependencies, start the dev server.
    async fn setup(&self, provider: &dyn SandboxProvider, tool_id: &str) -> CoreResult<()> {
        let template = SandboxTemplate::new(tool_id, provider.config().dev_port);
        for file in template.files() {
            provider.write_file(&file.path, &file.content).await?;
        }

        let install = provider.run_command(TEMPLATE_INSTALL).await;
        if !install.success {
            return Err(CoreError::Setup(format!(
                "template install failed: {}",
                install.combined_output().trim()
            )));
        }

        provider.start_dev_server().await?;
        Ok(())
    }

    async fn validate(
        &self,
        record: &mut SandboxRecord,
        provider: &dyn SandboxProvider,
        url: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<ValidationResult> {
        let validation = cancellable(cancel, self.validator.validate(provider, url, source)).await?;
        *record = self
            .store
            .update(&record.id, &SandboxPatch::default().with_validation(&validation))
            .await?;
        Ok(validation)
    }
}

/// Race `fut` against cancellation.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> CoreResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        output = fut => Ok(output),
    }
}

fn ensure_live(cancel: &CancellationToken) -> CoreResult<()> {
    if cancel.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

fn failure(id: &str, error: String, user_message: &str, can_retry: bool) -> PipelineResult {
    PipelineResult {
        success: false,
        sandbox_id: id.to_string(),
        sandbox_url: None,
        error: Some(error),
        user_message: Some(user_message.to_string()),
        can_retry,
        duration_ms: 0,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

//! Repair policy: mechanical fixes first, AI repair second.

pub mod ai;
pub mod autofix;

use std::sync::Arc;

use sbx_runner::SandboxProvider;
use tracing::{info, warn};

pub use ai::{AiRepairOutcome, AiRepairer, GeneratedText, ParsedRepair, RepairPrompt, TextGenerator};
pub use autofix::{add_import, import_for, AutoFixOutcome, AutoFixer};

use crate::classifier::{can_auto_fix, prioritize_errors, ErrorClassifier};
use crate::packages::PackageDetector;
use crate::types::{ClassifiedError, FixTier, RepairMethod, RepairResult};

/// Routes classified errors to the cheapest repair that can handle them.
///
/// A successful [`RepairResult`] only means a step completed and changed
/// something; re-validation decides whether the sandbox is fixed.
pub struct RepairEngine {
    auto: AutoFixer,
    ai: Option<AiRepairer>,
}

impl RepairEngine {
    pub fn new(classifier: Arc<ErrorClassifier>, detector: Arc<PackageDetector>) -> Self {
        Self {
            auto: AutoFixer::new(classifier, detector),
            ai: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.ai = Some(AiRepairer::new(generator));
        self
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_some()
    }

    pub async fn repair(&self, provider: &dyn SandboxProvider, errors: &[ClassifiedError]) -> RepairResult {
        let errors = prioritize_errors(errors);
        let mut fixes_applied = Vec::new();
        let mut remaining = errors.clone();

        if can_auto_fix(&errors) {
            let outcome = self.auto.fix(provider, &errors).await;
            fixes_applied.extend(outcome.fixes_applied.iter().cloned());
            if outcome.success() {
                info!("Auto-fix resolved all {} error(s)", errors.len());
                return RepairResult {
                    method: RepairMethod::Auto,
                    fixes_applied,
                    remaining: Vec::new(),
                    tokens_used: 0,
                };
            }
            remaining = outcome.unresolved;
        }

        // Unresolved auto-tier errors escalate along with ai-tier ones.
        let escalate = remaining.iter().any(|e| e.fixable != FixTier::User);
        let mut tokens_used = 0;
        if let (true, Some(ai)) = (escalate, &self.ai) {
            let outcome = ai.repair(provider, &remaining).await;
            tokens_used = outcome.tokens_used;
            if outcome.success {
                fixes_applied.push(
                    outcome
                        .explanation
                        .unwrap_or_else(|| "Rewrote src/App.jsx".to_string()),
                );
                return RepairResult {
                    method: RepairMethod::Ai,
                    fixes_applied,
                    remaining: Vec::new(),
                    tokens_used,
                };
            }
        }

        warn!("Repair could not resolve {} error(s)", remaining.len());
        RepairResult {
            method: RepairMethod::None,
            fixes_applied,
            remaining,
            tokens_used,
        }
    }
}

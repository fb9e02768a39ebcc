//! # sbx_core
//!
//! Validation and repair pipeline for generated applications.
//!
//! A generated React component is written into a freshly provisioned sandbox,
//! built, probed over HTTP and smoke tested. Failures are classified into a
//! closed taxonomy and routed to mechanical fixes or AI repair, within a
//! bounded number of attempts.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sbx_core::{MemoryStore, Orchestrator, PipelineSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let orchestrator = Orchestrator::new(PipelineSettings::default(), store);
//!
//!     let source = "export default function App() { return <h1>Hi</h1>; }";
//!     let run = orchestrator.run_pipeline("tool-1", "gen-1", source).await;
//!     println!("{:?}", run.result);
//!
//!     if let Some(lease) = run.lease {
//!         lease.terminate().await.ok();
//!     }
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod lease;
pub mod packages;
pub mod pipeline;
pub mod repair;
pub mod store;
pub mod template;
pub mod types;
pub mod validators;

pub use classifier::{can_auto_fix, needs_ai_repair, prioritize_errors, ErrorClassifier};
pub use config::{HealthSettings, PipelineSettings, TestSettings};
pub use error::{CoreError, CoreResult};
pub use lease::SandboxLease;
pub use packages::PackageDetector;
pub use pipeline::{Orchestrator, PipelineRun};
pub use repair::{GeneratedText, RepairEngine, RepairPrompt, TextGenerator};
pub use store::{FileStore, MemoryStore, SandboxStore};
pub use types::*;
pub use validators::{HealthChecker, HealthProbe, HttpProbe, Validator};

//! # sbx_llm
//!
//! Chat-completion backends for AI repair.
//!
//! [`LlmAdapter`] talks to the OpenAI chat completions API or the Anthropic
//! messages API and implements [`sbx_core::TextGenerator`], so it can be
//! handed straight to the orchestrator.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sbx_core::{MemoryStore, Orchestrator, PipelineSettings};
//! use sbx_llm::LlmAdapter;
//!
//! let mut orchestrator = Orchestrator::new(PipelineSettings::default(), Arc::new(MemoryStore::new()));
//! if let Ok(adapter) = LlmAdapter::from_env() {
//!     orchestrator = orchestrator.with_generator(Arc::new(adapter));
//! }
//! ```

pub mod adapter;
pub mod error;

pub use adapter::{LlmAdapter, LlmProvider, LlmResponse};
pub use error::{LlmError, LlmResult};

//! # sbx_runner
//!
//! Sandbox providers for sbx.
//!
//! A sandbox is a disposable container hosting one running instance of a
//! generated application. This crate defines the capability contract every
//! backing infrastructure implements and the factory that picks one.
//!
//! # Features
//!
//! - **Multiple Drivers**: Docker API (bollard), CLI wrapper (docker/podman)
//! - **Ordered Fallback**: the factory tries drivers in priority order
//! - **Flat Output**: every driver returns plain-string stdout/stderr
//! - **Mock Provider**: for testing without actual containers
//!
//! # Example
//!
//! ```rust,no_run
//! use sbx_runner::{ProviderFactory, ProviderSettings, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = ProviderFactory::from_settings(&ProviderSettings::default(), SandboxConfig::default());
//!     let sandbox = factory.provision().await?;
//!
//!     let result = sandbox.provider.run_command("node --version").await;
//!     println!("{} -> {}", sandbox.info.url, result.stdout.trim());
//!
//!     sandbox.provider.terminate().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod factory;
pub mod mock;
pub mod provider;

pub use cli::{CliProvider, ContainerRuntime};
pub use config::{
    CliSettings, DockerSettings, ProviderKind, ProviderPreference, ProviderSettings, SandboxConfig,
};
pub use docker::DockerProvider;
pub use error::{RunnerError, RunnerResult};
pub use factory::{CliDriver, DockerDriver, MockDriver, ProviderDriver, ProviderFactory, Provisioned};
pub use mock::{CapturedCall, MockProvider};
pub use provider::{shell_quote, CommandResult, SandboxInfo, SandboxProvider};

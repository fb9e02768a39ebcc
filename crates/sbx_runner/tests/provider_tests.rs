//! Integration tests for the provider layer.
//!
//! These tests use the mock driver to avoid requiring Docker or Podman.

use std::sync::Arc;

use sbx_runner::{
    CommandResult, MockDriver, MockProvider, ProviderFactory, ProviderKind, ProviderPreference,
    SandboxConfig, SandboxProvider,
};

/// Test a full sandbox lifecycle through the factory.
#[tokio::test]
async fn test_factory_provisions_and_terminates() {
    let mock = MockProvider::new().url("http://127.0.0.1:41000");
    let factory = ProviderFactory::new(SandboxConfig::default())
        .with_driver(Arc::new(MockDriver::new(mock.clone())))
        .preference(ProviderPreference::Mock);

    let sandbox = factory.provision().await.unwrap();
    assert_eq!(sandbox.info.url, "http://127.0.0.1:41000");
    assert_eq!(sandbox.provider.kind(), ProviderKind::Mock);
    assert!(sandbox.provider.is_alive().await);

    sandbox.provider.write_file("src/App.jsx", "export default function App() {}").await.unwrap();
    assert_eq!(
        mock.file("/app/src/App.jsx").as_deref(),
        Some("export default function App() {}")
    );

    sandbox.provider.terminate().await.unwrap();
    assert!(!mock.is_alive().await);
}

/// Failed commands are results, never errors.
#[tokio::test]
async fn test_failed_commands_are_results() {
    let mock = MockProvider::new().on_command(
        "npm run build",
        CommandResult::failed(1, "Cannot find module 'left-pad'"),
    );
    mock.create().await.unwrap();

    let result = mock.run_command("npm run build").await;
    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert!(result.stderr.contains("left-pad"));
}

/// Package installation goes through a single npm command.
#[tokio::test]
async fn test_install_packages_command() {
    let mock = MockProvider::new();
    mock.create().await.unwrap();

    let result = mock
        .install_packages(&["left-pad".to_string(), "@tanstack/react-query".to_string()])
        .await;
    assert!(result.success);

    let commands = mock.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("npm install"));
    assert!(commands[0].ends_with("left-pad @tanstack/react-query"));

    // Nothing to install means no command at all.
    assert!(mock.install_packages(&[]).await.success);
    assert_eq!(mock.commands().len(), 1);
}

/// A dev server that never answers surfaces an error after the bounded wait.
#[tokio::test]
async fn test_dev_server_wait_is_bounded() {
    let mut config = SandboxConfig::default();
    config.dev_server_wait_secs = 2;
    let mock = MockProvider::with_config(config)
        .on_command("fetch(", CommandResult::failed(1, ""))
        .on_command("tail -n 20", CommandResult::ok("vite: command not found"));
    mock.create().await.unwrap();

    let err = mock.start_dev_server().await.unwrap_err();
    assert!(err.to_string().contains("vite: command not found"));
    assert_eq!(mock.command_count("fetch("), 2);
}

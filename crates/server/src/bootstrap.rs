use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use toolrelay_core::config::{AppConfig, ConfigError};
use toolrelay_core::TransportClient;
use toolrelay_runtime::{LoopbackTransport, ReconnectSupervisor, RuntimeOptions};

use crate::tools::builtin_catalog;

pub struct Application {
    pub config: AppConfig,
    pub supervisor: Arc<ReconnectSupervisor>,
    pub transport_mode: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tool catalog is empty; a worker must serve at least one tool")]
    EmptyCatalog,
}

/// Builds the worker on the in-process loopback transport. This is the
/// scaffold transport mode: orchestrator settings are validated here but no
/// network client dials `orchestrator.url` yet.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        worker_name = %config.orchestrator.worker_name,
        "starting application bootstrap"
    );

    let catalog = builtin_catalog();
    if catalog.is_empty() {
        return Err(BootstrapError::EmptyCatalog);
    }
    info!(
        event_name = "system.bootstrap.catalog_ready",
        correlation_id = "bootstrap",
        tools = ?catalog.names(),
        "tool catalog registered"
    );

    let transport: Arc<dyn TransportClient> = Arc::new(LoopbackTransport::new());
    let transport_mode = transport.mode();
    let options = RuntimeOptions::from_config(&config);
    let supervisor = Arc::new(ReconnectSupervisor::new(transport, Arc::new(catalog), options));

    Ok(Application { config, supervisor, transport_mode })
}

#[cfg(test)]
mod tests {
    use toolrelay_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?)
    }

    #[test]
    fn bootstrap_fails_fast_without_an_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                orchestrator_api_key: Some(String::new()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("missing api key is rejected").to_string();
        assert!(message.contains("orchestrator.api_key"), "{message}");
    }

    #[test]
    fn bootstrap_wires_the_configured_capacity() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                orchestrator_api_key: Some("test-key".to_owned()),
                max_concurrent_calls: Some(3),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("bootstrap succeeds with valid overrides");

        assert_eq!(app.transport_mode, "loopback");
        assert_eq!(app.supervisor.status().gauge().capacity(), 3);
    }
}

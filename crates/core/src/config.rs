use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::descriptor::ScopeFilter;

pub const MAX_CONCURRENT_CALLS_LIMIT: usize = 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub scope: ScopeConfig,
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub url: String,
    pub api_key: SecretString,
    pub worker_name: String,
}

#[derive(Clone, Debug, Default)]
pub struct ScopeConfig {
    pub location: Option<String>,
    pub user: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub max_concurrent_calls: usize,
    pub backpressure_poll_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_retry_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub load_sample_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub orchestrator_url: Option<String>,
    pub orchestrator_api_key: Option<String>,
    pub worker_name: Option<String>,
    pub scope_location: Option<String>,
    pub scope_user: Option<String>,
    pub max_concurrent_calls: Option<usize>,
    pub log_level: Option<String>,
    pub health_check_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                url: "https://orchestrator.invalid".to_string(),
                api_key: String::new().into(),
                worker_name: "toolrelay-worker".to_string(),
            },
            scope: ScopeConfig::default(),
            runtime: RuntimeConfig {
                max_concurrent_calls: 8,
                backpressure_poll_ms: 1_000,
                heartbeat_interval_secs: 120,
                heartbeat_retry_secs: 60,
                reconnect_backoff_secs: 60,
                load_sample_interval_ms: 1_000,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ScopeConfig {
    pub fn filter(&self) -> ScopeFilter {
        ScopeFilter { location: self.location.clone(), user: self.user.clone() }
    }
}

impl RuntimeConfig {
    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_retry(&self) -> Duration {
        Duration::from_secs(self.heartbeat_retry_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn load_sample_interval(&self) -> Duration {
        Duration::from_millis(self.load_sample_interval_ms)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("toolrelay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(orchestrator) = patch.orchestrator {
            if let Some(url) = orchestrator.url {
                self.orchestrator.url = url;
            }
            if let Some(api_key_value) = orchestrator.api_key {
                self.orchestrator.api_key = secret_value(api_key_value);
            }
            if let Some(worker_name) = orchestrator.worker_name {
                self.orchestrator.worker_name = worker_name;
            }
        }

        if let Some(scope) = patch.scope {
            if let Some(location) = scope.location {
                self.scope.location = Some(location);
            }
            if let Some(user) = scope.user {
                self.scope.user = Some(user);
            }
        }

        if let Some(runtime) = patch.runtime {
            if let Some(max_concurrent_calls) = runtime.max_concurrent_calls {
                self.runtime.max_concurrent_calls = max_concurrent_calls;
            }
            if let Some(backpressure_poll_ms) = runtime.backpressure_poll_ms {
                self.runtime.backpressure_poll_ms = backpressure_poll_ms;
            }
            if let Some(heartbeat_interval_secs) = runtime.heartbeat_interval_secs {
                self.runtime.heartbeat_interval_secs = heartbeat_interval_secs;
            }
            if let Some(heartbeat_retry_secs) = runtime.heartbeat_retry_secs {
                self.runtime.heartbeat_retry_secs = heartbeat_retry_secs;
            }
            if let Some(reconnect_backoff_secs) = runtime.reconnect_backoff_secs {
                self.runtime.reconnect_backoff_secs = reconnect_backoff_secs;
            }
            if let Some(load_sample_interval_ms) = runtime.load_sample_interval_ms {
                self.runtime.load_sample_interval_ms = load_sample_interval_ms;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TOOLRELAY_ORCHESTRATOR_URL") {
            self.orchestrator.url = value;
        }
        if let Some(value) = read_env("TOOLRELAY_ORCHESTRATOR_API_KEY") {
            self.orchestrator.api_key = secret_value(value);
        }
        if let Some(value) = read_env("TOOLRELAY_ORCHESTRATOR_WORKER_NAME") {
            self.orchestrator.worker_name = value;
        }

        if let Some(value) = read_env("TOOLRELAY_SCOPE_LOCATION") {
            self.scope.location = Some(value);
        }
        if let Some(value) = read_env("TOOLRELAY_SCOPE_USER") {
            self.scope.user = Some(value);
        }

        if let Some(value) = read_env("TOOLRELAY_RUNTIME_MAX_CONCURRENT_CALLS") {
            self.runtime.max_concurrent_calls =
                parse_usize("TOOLRELAY_RUNTIME_MAX_CONCURRENT_CALLS", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_RUNTIME_BACKPRESSURE_POLL_MS") {
            self.runtime.backpressure_poll_ms =
                parse_u64("TOOLRELAY_RUNTIME_BACKPRESSURE_POLL_MS", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_RUNTIME_HEARTBEAT_INTERVAL_SECS") {
            self.runtime.heartbeat_interval_secs =
                parse_u64("TOOLRELAY_RUNTIME_HEARTBEAT_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_RUNTIME_HEARTBEAT_RETRY_SECS") {
            self.runtime.heartbeat_retry_secs =
                parse_u64("TOOLRELAY_RUNTIME_HEARTBEAT_RETRY_SECS", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_RUNTIME_RECONNECT_BACKOFF_SECS") {
            self.runtime.reconnect_backoff_secs =
                parse_u64("TOOLRELAY_RUNTIME_RECONNECT_BACKOFF_SECS", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_RUNTIME_LOAD_SAMPLE_INTERVAL_MS") {
            self.runtime.load_sample_interval_ms =
                parse_u64("TOOLRELAY_RUNTIME_LOAD_SAMPLE_INTERVAL_MS", &value)?;
        }

        if let Some(value) = read_env("TOOLRELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TOOLRELAY_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("TOOLRELAY_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("TOOLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TOOLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TOOLRELAY_LOGGING_LEVEL").or_else(|| read_env("TOOLRELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TOOLRELAY_LOGGING_FORMAT").or_else(|| read_env("TOOLRELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.orchestrator_url {
            self.orchestrator.url = url;
        }
        if let Some(api_key) = overrides.orchestrator_api_key {
            self.orchestrator.api_key = secret_value(api_key);
        }
        if let Some(worker_name) = overrides.worker_name {
            self.orchestrator.worker_name = worker_name;
        }
        if let Some(location) = overrides.scope_location {
            self.scope.location = Some(location);
        }
        if let Some(user) = overrides.scope_user {
            self.scope.user = Some(user);
        }
        if let Some(max_concurrent_calls) = overrides.max_concurrent_calls {
            self.runtime.max_concurrent_calls = max_concurrent_calls;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_orchestrator(&self.orchestrator)?;
        validate_runtime(&self.runtime)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("toolrelay.toml"), PathBuf::from("config/toolrelay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    let url = orchestrator.url.trim();
    let supported = ["http://", "https://", "ws://", "wss://"];
    if !supported.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(ConfigError::Validation(
            "orchestrator.url must start with http://, https://, ws:// or wss://".to_string(),
        ));
    }

    if orchestrator.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "orchestrator.api_key is required. Set TOOLRELAY_ORCHESTRATOR_API_KEY or [orchestrator] api_key".to_string(),
        ));
    }

    if orchestrator.worker_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "orchestrator.worker_name must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.max_concurrent_calls == 0
        || runtime.max_concurrent_calls > MAX_CONCURRENT_CALLS_LIMIT
    {
        return Err(ConfigError::Validation(format!(
            "runtime.max_concurrent_calls must be in range 1..={MAX_CONCURRENT_CALLS_LIMIT}"
        )));
    }

    let intervals = [
        ("runtime.backpressure_poll_ms", runtime.backpressure_poll_ms),
        ("runtime.heartbeat_interval_secs", runtime.heartbeat_interval_secs),
        ("runtime.heartbeat_retry_secs", runtime.heartbeat_retry_secs),
        ("runtime.reconnect_backoff_secs", runtime.reconnect_backoff_secs),
        ("runtime.load_sample_interval_ms", runtime.load_sample_interval_ms),
    ];
    if let Some((key, _)) = intervals.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Validation(format!("{key} must be greater than zero")));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    orchestrator: Option<OrchestratorPatch>,
    scope: Option<ScopePatch>,
    runtime: Option<RuntimePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    url: Option<String>,
    api_key: Option<String>,
    worker_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScopePatch {
    location: Option<String>,
    user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    max_concurrent_calls: Option<usize>,
    backpressure_poll_ms: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_retry_secs: Option<u64>,
    reconnect_backoff_secs: Option<u64>,
    load_sample_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

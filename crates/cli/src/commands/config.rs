use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use toml::Value;
use toolrelay_core::config::{resolve_config_path, AppConfig, LoadOptions};

use crate::commands::CommandResult;

pub const CONFIG_VALIDATION_EXIT: u8 = 2;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.into(), env_keys }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                CONFIG_VALIDATION_EXIT,
            )
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = config_file_path.as_deref().and_then(load_config_file_doc);

    let fields = effective_fields(&config);
    let mut lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
    ];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        format!("- {} = {} (source: {source})", field.key, field.value)
    }));

    CommandResult::output(lines.join("\n"))
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let runtime = &config.runtime;
    let server = &config.server;
    vec![
        field("orchestrator.url", &config.orchestrator.url, &["TOOLRELAY_ORCHESTRATOR_URL"]),
        field(
            "orchestrator.api_key",
            redact_secret(config.orchestrator.api_key.expose_secret()),
            &["TOOLRELAY_ORCHESTRATOR_API_KEY"],
        ),
        field(
            "orchestrator.worker_name",
            &config.orchestrator.worker_name,
            &["TOOLRELAY_ORCHESTRATOR_WORKER_NAME"],
        ),
        field(
            "scope.location",
            config.scope.location.as_deref().unwrap_or("<unrestricted>"),
            &["TOOLRELAY_SCOPE_LOCATION"],
        ),
        field(
            "scope.user",
            config.scope.user.as_deref().unwrap_or("<unrestricted>"),
            &["TOOLRELAY_SCOPE_USER"],
        ),
        field(
            "runtime.max_concurrent_calls",
            runtime.max_concurrent_calls.to_string(),
            &["TOOLRELAY_RUNTIME_MAX_CONCURRENT_CALLS"],
        ),
        field(
            "runtime.backpressure_poll_ms",
            runtime.backpressure_poll_ms.to_string(),
            &["TOOLRELAY_RUNTIME_BACKPRESSURE_POLL_MS"],
        ),
        field(
            "runtime.heartbeat_interval_secs",
            runtime.heartbeat_interval_secs.to_string(),
            &["TOOLRELAY_RUNTIME_HEARTBEAT_INTERVAL_SECS"],
        ),
        field(
            "runtime.heartbeat_retry_secs",
            runtime.heartbeat_retry_secs.to_string(),
            &["TOOLRELAY_RUNTIME_HEARTBEAT_RETRY_SECS"],
        ),
        field(
            "runtime.reconnect_backoff_secs",
            runtime.reconnect_backoff_secs.to_string(),
            &["TOOLRELAY_RUNTIME_RECONNECT_BACKOFF_SECS"],
        ),
        field(
            "runtime.load_sample_interval_ms",
            runtime.load_sample_interval_ms.to_string(),
            &["TOOLRELAY_RUNTIME_LOAD_SAMPLE_INTERVAL_MS"],
        ),
        field("server.bind_address", &server.bind_address, &["TOOLRELAY_SERVER_BIND_ADDRESS"]),
        field(
            "server.health_check_port",
            server.health_check_port.to_string(),
            &["TOOLRELAY_SERVER_HEALTH_CHECK_PORT"],
        ),
        field(
            "server.graceful_shutdown_secs",
            server.graceful_shutdown_secs.to_string(),
            &["TOOLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            &config.logging.level,
            &["TOOLRELAY_LOGGING_LEVEL", "TOOLRELAY_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["TOOLRELAY_LOGGING_FORMAT", "TOOLRELAY_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps the last four characters of long keys so operators can tell keys
/// apart without exposing them.
pub fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() < 12 {
        return "<redacted>".to_string();
    }

    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn short_secrets_are_fully_redacted() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("key-test"), "<redacted>");
        assert_eq!(redact_secret("sk-live-0123456789abcd"), "***abcd");
    }

    #[test]
    fn dotted_paths_resolve_in_nested_tables() {
        let doc: Value = "[runtime]\nmax_concurrent_calls = 4\n".parse().expect("valid toml");
        assert!(contains_path(&doc, "runtime.max_concurrent_calls"));
        assert!(!contains_path(&doc, "runtime.heartbeat_interval_secs"));
        assert!(!contains_path(&doc, "server.bind_address"));
    }
}

use std::net::TcpListener;

use secrecy::ExposeSecret;
use serde::Serialize;
use toolrelay_core::config::{AppConfig, LoadOptions, MAX_CONCURRENT_CALLS_LIMIT};

use crate::commands::{config::redact_secret, escape_json, CommandResult};

pub const DOCTOR_FAILURE_EXIT: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] =
    ["orchestrator_credentials", "runtime_limits", "health_endpoint_bind"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { DOCTOR_FAILURE_EXIT };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_orchestrator_credentials(&config));
            checks.push(check_runtime_limits(&config));
            checks.push(check_health_endpoint_bind(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_orchestrator_credentials(config: &AppConfig) -> DoctorCheck {
    let orchestrator = &config.orchestrator;
    if orchestrator.url.contains(".invalid") {
        return DoctorCheck {
            name: "orchestrator_credentials",
            status: CheckStatus::Fail,
            details: format!(
                "orchestrator.url `{}` is the placeholder default; set TOOLRELAY_ORCHESTRATOR_URL",
                orchestrator.url
            ),
        };
    }

    DoctorCheck {
        name: "orchestrator_credentials",
        status: CheckStatus::Pass,
        details: format!(
            "worker `{}` will connect to {} with api key {}",
            orchestrator.worker_name,
            orchestrator.url,
            redact_secret(orchestrator.api_key.expose_secret())
        ),
    }
}

fn check_runtime_limits(config: &AppConfig) -> DoctorCheck {
    let runtime = &config.runtime;
    if runtime.heartbeat_retry_secs > runtime.heartbeat_interval_secs {
        return DoctorCheck {
            name: "runtime_limits",
            status: CheckStatus::Fail,
            details: format!(
                "runtime.heartbeat_retry_secs ({}) exceeds runtime.heartbeat_interval_secs ({})",
                runtime.heartbeat_retry_secs, runtime.heartbeat_interval_secs
            ),
        };
    }

    DoctorCheck {
        name: "runtime_limits",
        status: CheckStatus::Pass,
        details: format!(
            "max {} concurrent calls (limit {MAX_CONCURRENT_CALLS_LIMIT}), heartbeat every {}s, reconnect backoff {}s",
            runtime.max_concurrent_calls,
            runtime.heartbeat_interval_secs,
            runtime.reconnect_backoff_secs
        ),
    }
}

fn check_health_endpoint_bind(config: &AppConfig) -> DoctorCheck {
    let address = format!("{}:{}", config.server.bind_address, config.server.health_check_port);
    match TcpListener::bind(&address) {
        Ok(_listener) => DoctorCheck {
            name: "health_endpoint_bind",
            status: CheckStatus::Pass,
            details: format!("health endpoint can bind `{address}`"),
        },
        Err(error) => DoctorCheck {
            name: "health_endpoint_bind",
            status: CheckStatus::Fail,
            details: format!("cannot bind `{address}`: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

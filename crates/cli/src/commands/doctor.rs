//! Doctor command - validate configuration and show status

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::args::DoctorArgs;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    data_dir: CheckResult,
    source: CheckResult,
    mastodon: CheckResult,
    bluesky: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: "warn".to_string(),
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        data_dir: CheckResult::error("Not checked"),
        source: CheckResult::error("Not checked"),
        mastodon: CheckResult::error("Not checked"),
        bluesky: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.data_dir = check_data_dir(config);
        report.source = check_source(config);
        report.mastodon = check_mastodon(config);
        report.bluesky = check_bluesky(config);
    }

    let checks = [
        &report.config,
        &report.data_dir,
        &report.source,
        &report.mastodon,
        &report.bluesky,
    ];
    let has_error = checks.iter().any(|c| c.is_error());
    let all_ok = checks.iter().all(|c| c.is_ok());

    report.overall = if has_error {
        "error".to_string()
    } else if all_ok {
        "ok".to_string()
    } else {
        "warn".to_string()
    };

    // Output report
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

fn check_data_dir(config: &AppConfig) -> CheckResult {
    let dir = &config.general.data_dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::error(format!("Cannot create data dir {}: {}", dir.display(), e));
    }

    let probe = dir.join(".doctor_probe");
    match std::fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult::ok(format!("Data dir {} is writable", dir.display()))
        }
        Err(e) => CheckResult::error(format!("Data dir {} not writable: {}", dir.display(), e)),
    }
}

fn check_source(config: &AppConfig) -> CheckResult {
    if config.source.user_handle.is_empty() || config.source.user_id.is_empty() {
        return CheckResult::error("source.user_handle and source.user_id must be set");
    }
    match check_env(&config.source.session_token_env) {
        Ok(()) => CheckResult::ok(format!("Watching @{}", config.source.user_handle)),
        Err(message) => CheckResult::error(message),
    }
}

fn check_mastodon(config: &AppConfig) -> CheckResult {
    if !config.mastodon.enabled {
        return CheckResult::warn("Mastodon disabled");
    }
    if config.mastodon.instance_url.is_empty() {
        return CheckResult::error("mastodon.instance_url must be set");
    }
    match check_env(&config.mastodon.access_token_env) {
        Ok(()) => CheckResult::ok(format!("Publishing to {}", config.mastodon.instance_url)),
        Err(message) => CheckResult::error(message),
    }
}

fn check_bluesky(config: &AppConfig) -> CheckResult {
    if !config.bluesky.enabled {
        return CheckResult::warn("Bluesky disabled");
    }
    if config.bluesky.identifier.is_empty() {
        return CheckResult::error("bluesky.identifier must be set");
    }
    match check_env(&config.bluesky.app_password_env) {
        Ok(()) => CheckResult::ok(format!("Publishing as {}", config.bluesky.identifier)),
        Err(message) => CheckResult::error(message),
    }
}

fn check_env(env_var: &str) -> Result<(), String> {
    if env_var.trim().is_empty() {
        return Err("No credential env var configured".to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(()),
        Ok(_) => Err(format!("Env var {} is empty", env_var)),
        Err(_) => Err(format!("Env var {} is not set", env_var)),
    }
}

fn print_report(report: &DoctorReport) {
    let rows = [
        ("config", &report.config),
        ("data_dir", &report.data_dir),
        ("source", &report.source),
        ("mastodon", &report.mastodon),
        ("bluesky", &report.bluesky),
    ];
    for (name, check) in rows {
        println!("{:10} [{:5}] {}", name, check.status, check.message);
    }
    println!("overall: {}", report.overall);
}

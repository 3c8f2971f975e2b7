//! Logging setup.
//!
//! All logs go to **stderr**; stdout carries the plugin handshake line.
//!
//! # Environment Variables
//!
//! The first one that is set decides the filter:
//!
//! - `TF_LOG_PROVIDER`: provider-only log level set by the host
//! - `TF_LOG`: host log level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`,
//!   `OFF`; `JSON` means trace)
//! - `RUST_LOG`: any `EnvFilter` directive, e.g. `terraform_provider_snyk=debug`
//!
//! Without any of them the level is `info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when no environment variable is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize the global subscriber from the environment.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with_default(DEFAULT_LOG_LEVEL)
}

/// Like [`init_logging`], with a custom fallback level.
pub fn init_logging_with_default(default_level: &str) -> bool {
    let directive = filter_directive(|key| std::env::var(key).ok(), default_level);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}

/// Resolve the filter directive from an environment lookup.
pub fn filter_directive<F>(lookup: F, default_level: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(level) = non_empty("TF_LOG_PROVIDER").or_else(|| non_empty("TF_LOG")) {
        return terraform_level(&level).to_string();
    }
    non_empty("RUST_LOG").unwrap_or_else(|| default_level.to_string())
}

fn terraform_level(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "JSON" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" => "warn",
        "ERROR" => "error",
        "OFF" => "off",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_level() {
        assert_eq!(filter_directive(lookup(&[]), "info"), "info");
    }

    #[test]
    fn test_provider_level_wins() {
        let env = lookup(&[("TF_LOG_PROVIDER", "debug"), ("TF_LOG", "ERROR"), ("RUST_LOG", "warn")]);
        assert_eq!(filter_directive(env, "info"), "debug");
    }

    #[test]
    fn test_terraform_levels() {
        assert_eq!(filter_directive(lookup(&[("TF_LOG", "JSON")]), "info"), "trace");
        assert_eq!(filter_directive(lookup(&[("TF_LOG", "off")]), "info"), "off");
        // unknown values turn on everything, like the host does
        assert_eq!(filter_directive(lookup(&[("TF_LOG", "1")]), "info"), "trace");
    }

    #[test]
    fn test_rust_log_fallback() {
        let env = lookup(&[("TF_LOG", ""), ("RUST_LOG", "terraform_provider_snyk=debug")]);
        assert_eq!(filter_directive(env, "info"), "terraform_provider_snyk=debug");
        assert!(EnvFilter::try_new("warn,terraform_provider_snyk=debug").is_ok());
    }
}

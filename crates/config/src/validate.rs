//! Semantic checks over a loaded [`HeraldConfig`].

use secrecy::ExposeSecret;

use crate::{env_subst::unresolved_placeholders, schema::HeraldConfig};

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "scheduler.max_workers"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check a config for values that would make the process misbehave.
#[must_use]
pub fn validate(config: &HeraldConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let token = config.telegram.token.expose_secret();
    if token.is_empty() {
        result.push(Severity::Error, "telegram.token", "bot token is not set");
    } else if !unresolved_placeholders(token).is_empty() {
        result.push(
            Severity::Error,
            "telegram.token",
            "bot token references an unset environment variable",
        );
    }
    if config.telegram.operators.is_empty() {
        result.push(
            Severity::Warning,
            "telegram.operators",
            "no operators configured, broadcast commands are unreachable",
        );
    }

    if config.scheduler.max_workers == 0 {
        result.push(
            Severity::Error,
            "scheduler.max_workers",
            "must be at least 1",
        );
    }
    if config.scheduler.default_max_instances == 0 {
        result.push(
            Severity::Error,
            "scheduler.default_max_instances",
            "must be at least 1",
        );
    }
    if config.scheduler.coalesce && config.scheduler.max_catchup > 1 {
        result.push(
            Severity::Warning,
            "scheduler.max_catchup",
            "ignored when coalesce is enabled",
        );
    }
    if config.broadcast.progress_report_every_ms == Some(0) {
        result.push(
            Severity::Error,
            "broadcast.progress_report_every_ms",
            "must be greater than 0",
        );
    }

    if config.metrics.textfile.is_some() && !config.metrics.enabled {
        result.push(
            Severity::Warning,
            "metrics.textfile",
            "ignored while metrics are disabled",
        );
    }
    if config.metrics.export_every_ms == 0 {
        result.push(
            Severity::Error,
            "metrics.export_every_ms",
            "must be greater than 0",
        );
    }

    result
}

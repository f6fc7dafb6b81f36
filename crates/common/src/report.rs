//! Stats reporting.
//!
//! Components that have something to say in the operator `stats` output
//! implement [`Reportable`] and are registered explicitly with a
//! [`ReportRegistry`] at startup. Nothing is discovered at runtime.

use std::sync::Arc;

use {async_trait::async_trait, tracing::warn};

use crate::Result;

/// A component that can contribute lines to the stats report.
#[async_trait]
pub trait Reportable: Send + Sync {
    /// Short section name, e.g. `"scheduler"`.
    fn name(&self) -> &'static str;

    /// Human-readable report lines, one fact per line.
    async fn report(&self) -> Result<Vec<String>>;
}

/// Ordered, static list of reporters.
#[derive(Default, Clone)]
pub struct ReportRegistry {
    reporters: Vec<Arc<dyn Reportable>>,
}

impl ReportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reporter: Arc<dyn Reportable>) {
        self.reporters.push(reporter);
    }

    #[must_use]
    pub fn with(mut self, reporter: Arc<dyn Reportable>) -> Self {
        self.register(reporter);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.reporters.iter().map(|r| r.name()).collect()
    }

    /// Render every reporter under a title. A failing reporter produces a
    /// single "unavailable" line instead of aborting the whole report.
    pub async fn render(&self, title: &str) -> String {
        let mut text = format!("{title}\n");
        for reporter in &self.reporters {
            match reporter.report().await {
                Ok(lines) => {
                    for line in lines {
                        text.push_str("* ");
                        text.push_str(&line);
                        text.push('\n');
                    }
                },
                Err(e) => {
                    warn!(reporter = reporter.name(), error = %e, "stats reporter failed");
                    text.push_str(&format!("* {}: unavailable ({e})\n", reporter.name()));
                },
            }
        }
        text
    }
}

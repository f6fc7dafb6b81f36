//! Named job handlers.
//!
//! Persisted jobs reference their handler by name; the implementations are
//! registered at startup, before the scheduler is started.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::Result;

/// Everything a handler gets to know about the fire it serves.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub job_name: String,
    pub args: serde_json::Value,
    /// The fire time this execution was dispatched for.
    pub scheduled_for_ms: u64,
}

/// Unit of work executed when a job fires.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns an optional output line recorded in run history.
    async fn run(&self, ctx: JobContext) -> Result<Option<String>>;
}

type BoxedHandlerFn =
    dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send>>
        + Send
        + Sync;

struct FnHandler(Box<BoxedHandlerFn>);

#[async_trait]
impl JobHandler for FnHandler {
    async fn run(&self, ctx: JobContext) -> Result<Option<String>> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>>> + Send + 'static,
{
    Arc::new(FnHandler(Box::new(move |ctx| Box::pin(f(ctx)))))
}

/// Handler lookup table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(args: serde_json::Value) -> JobContext {
        JobContext {
            job_id: "j".into(),
            job_name: "n".into(),
            args,
            scheduled_for_ms: 0,
        }
    }

    #[tokio::test]
    async fn closure_handler_runs() {
        let registry = HandlerRegistry::new();
        registry.register(
            "echo",
            handler_fn(|ctx| async move { Ok(ctx.args.as_str().map(str::to_string)) }),
        );

        let handler = registry.get("echo").unwrap();
        let out = handler.run(ctx(serde_json::json!("hi"))).await.unwrap();
        assert_eq!(out.as_deref(), Some("hi"));
    }

    #[test]
    fn lookup_and_names() {
        let registry = HandlerRegistry::new();
        registry.register("b", handler_fn(|_| async { Ok(None) }));
        registry.register("a", handler_fn(|_| async { Ok(None) }));

        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}

//! Metrics collection and export for herald.
//!
//! Crates record through the `metrics` facade macros using the names in this
//! crate. When the `prometheus` feature is enabled, [`init_metrics`] installs
//! a Prometheus recorder whose output can be rendered on demand.
//!
//! ```rust,ignore
//! use herald_metrics::{counter, broadcast};
//!
//! counter!(broadcast::DELIVERIES_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};

//! Shared error definitions and the stats reporting interface used across all
//! herald crates.

pub mod error;
pub mod report;

pub use {
    error::{Error, FromMessage, Result},
    report::{ReportRegistry, Reportable},
};

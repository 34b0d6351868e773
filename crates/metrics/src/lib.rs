//! Metrics collection and export for switchboard.
//!
//! Thin layer over the `metrics` crate facade. Call sites record through the
//! re-exported macros using the names in [`definitions`]; with the
//! `prometheus` feature the recorder renders them in Prometheus text format.
//!
//! ```rust,ignore
//! use switchboard_metrics::{counter, dispatch};
//!
//! counter!(dispatch::ASSIGNMENTS_TOTAL, "kind" => "affinity").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};

//! Monitoring Module
//!
//! Provides counters for tracking engine throughput and outcomes.
//!
//! # Components
//!
//! - [`EngineMetrics`]: Execution and step counters
//! - [`MetricsSnapshot`]: Serializable point-in-time report

pub mod metrics;

pub use metrics::{EngineMetrics, MetricsSnapshot};

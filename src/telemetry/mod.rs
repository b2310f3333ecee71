//! Telemetry module for logging and metrics.

mod logging;
mod metrics;

pub(crate) use logging::{is_known_format, is_known_level};
pub use logging::{LogConfig, init_logging};
pub use metrics::{Counter, DirectionStats, MetricsRegistry};

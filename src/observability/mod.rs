mod metrics;
mod tracing_init;

pub use metrics::{Metrics, MetricsError};
pub use tracing_init::init_tracing;

mod auth;
mod metrics;
mod request_id;
mod shutdown;

pub use auth::{AuthedTenant, auth_middleware};
pub use metrics::http_metrics_middleware;
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use shutdown::{ShutdownFlag, shutdown_gate_middleware};

//! Shutdown gate.
//!
//! A single atomic flag — no mutex on the hot path. Once flipped, new
//! requests are answered 503 with `Connection: close` so keep-alive
//! clients re-resolve to a healthy instance while in-flight work drains.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GatewayError;

#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub async fn shutdown_gate_middleware(
    State(flag): State<ShutdownFlag>,
    req: Request,
    next: Next,
) -> Response {
    if flag.is_shutting_down() {
        let mut response = GatewayError::ShuttingDown.into_response();
        response
            .headers_mut()
            .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        return response;
    }
    next.run(req).await
}

//! Bearer-credential authentication.
//!
//! Resolves `Authorization: Bearer <credential>` to a tenant via the
//! directory and stores it as a request extension. A missing credential
//! and an unknown one produce distinct 401 messages; store outages are
//! 500, never silently unauthenticated.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    error::GatewayError,
    tenants::{StoreError, Tenant, TenantStore},
};

/// The authenticated tenant for the current request.
#[derive(Clone)]
pub struct AuthedTenant(pub Arc<Tenant>);

pub async fn auth_middleware(
    State(tenants): State<Arc<dyn TenantStore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let credential = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("missing API key".to_string()))?
        .to_string();

    let tenant = match tenants.find_by_credential(&credential).await {
        Ok(tenant) => tenant,
        Err(StoreError::NotFound) => {
            return Err(GatewayError::Unauthorized("invalid API key".to_string()));
        }
        Err(e) => return Err(GatewayError::internal(e)),
    };

    tracing::debug!(tenant_id = %tenant.id, tenant = %tenant.name, "tenant authenticated");
    req.extensions_mut().insert(AuthedTenant(Arc::new(tenant)));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, middleware, routing::get};
    use http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::tenants::{MemoryTenantStore, test_tenant};

    async fn app() -> Router {
        let store = MemoryTenantStore::new();
        store.create(test_tenant("acme", "pl_live_good")).await.unwrap();
        let store: Arc<dyn TenantStore> = Arc::new(store);

        Router::new()
            .route(
                "/",
                get(|axum::Extension(AuthedTenant(tenant)): axum::Extension<AuthedTenant>| async move {
                    tenant.name.clone()
                }),
            )
            .layer(middleware::from_fn_with_state(store.clone(), auth_middleware))
    }

    async fn send(app: Router, auth: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn valid_credential_resolves_tenant() {
        let (status, _) = send(app().await, Some("Bearer pl_live_good")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_credential_is_401_with_envelope() {
        let (status, body) = send(app().await, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "missing API key");
        assert_eq!(body["error"]["type"], "error");
        assert_eq!(body["error"]["code"], 401);
    }

    #[tokio::test]
    async fn unknown_credential_is_401_invalid() {
        let (status, body) = send(app().await, Some("Bearer pl_live_wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "invalid API key");
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_missing_key() {
        let (status, body) = send(app().await, Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "missing API key");
    }
}

//! `GET /v1/models` — the union of every registered provider's models.

use axum::{Json, extract::State};
use futures::future::join_all;

use crate::{
    AppState,
    api_types::{ModelInfo, ModelsResponse},
};

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let registry = state.router.registry();

    let listings = join_all(registry.iter().map(|provider| {
        let client = state.http_client.clone();
        let provider = provider.clone();
        async move {
            let id = provider.id().to_string();
            (id, provider.list_models(&client).await)
        }
    }))
    .await;

    let mut models: Vec<ModelInfo> = Vec::new();
    for (provider_id, listing) in listings {
        match listing {
            Ok(provider_models) => {
                for model in provider_models {
                    // First provider to enumerate a model id wins.
                    if !models.iter().any(|m| m.id == model.id) {
                        models.push(model);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(provider = %provider_id, error = %e, "model listing failed, skipping provider");
            }
        }
    }

    Json(ModelsResponse::new(models))
}

//! Model listing endpoint
//!
//! `GET /models` lists the names in the model → provider table. Callers may
//! also send any other name; it is routed to the default provider.

use crate::handlers::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

/// Known model names, sorted
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

pub async fn handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state
        .config()
        .routing
        .model_providers()
        .keys()
        .cloned()
        .collect();
    Json(ModelsResponse { models })
}

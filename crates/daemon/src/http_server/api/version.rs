use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};

use crate::http_server::ProxyState;

pub async fn version(State(state): State<ProxyState>) -> Response {
    Json(serde_json::json!({ "version": state.version })).into_response()
}

pub async fn updates(State(state): State<ProxyState>) -> Response {
    Json(state.updates.status()).into_response()
}

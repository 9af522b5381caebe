//! Keypair routes: list org keypairs, generate fresh ones.

use axum::extract::{Json, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use common::identity::Id;

use crate::http_server::{ApiError, ProxyState};
use crate::logic::LogicError;

#[derive(Debug, Deserialize)]
pub struct OrgQuery {
    pub org_id: Id,
}

pub async fn list(
    State(state): State<ProxyState>,
    Query(query): Query<OrgQuery>,
) -> Result<Response, ApiError> {
    let keypairs = state
        .logic
        .client()
        .keypairs()
        .list(&query.org_id)
        .await
        .map_err(LogicError::from)?;
    Ok(Json(keypairs).into_response())
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub org_id: Id,
}

pub async fn generate(
    State(state): State<ProxyState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let keypairs = state.logic.generate_org_keypairs(request.org_id).await?;
    Ok(Json(keypairs).into_response())
}

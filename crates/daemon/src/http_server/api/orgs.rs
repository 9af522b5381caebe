use axum::extract::{Json, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::http_server::{ApiError, ProxyState};
use crate::logic::LogicError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub name: Option<String>,
}

pub async fn list(
    State(state): State<ProxyState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let orgs = state
        .logic
        .client()
        .orgs()
        .list(query.name.as_deref())
        .await
        .map_err(LogicError::from)?;
    Ok(Json(orgs).into_response())
}

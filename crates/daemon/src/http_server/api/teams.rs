use axum::extract::{Json, Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use common::identity::Id;

use crate::http_server::{ApiError, ProxyState};
use crate::logic::LogicError;
use crate::registry::TeamFilter;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub org_id: Id,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub team_type: Option<String>,
}

pub async fn list(
    State(state): State<ProxyState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let filter = match query.team_type.as_deref() {
        None | Some("any") => TeamFilter::Any,
        Some("user") => TeamFilter::User,
        Some("machine") => TeamFilter::Machine,
        Some("system") => TeamFilter::System,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown team type filter: {other}"
            )))
        }
    };

    let teams = state
        .logic
        .client()
        .teams()
        .list(&query.org_id, query.name.as_deref(), filter)
        .await
        .map_err(LogicError::from)?;
    Ok(Json(teams).into_response())
}

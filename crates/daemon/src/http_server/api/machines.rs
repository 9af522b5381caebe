//! Machine routes: list, create (progress-streamed), destroy.

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use data_encoding::BASE64;
use serde::Deserialize;

use common::identity::Id;
use common::primitive::MachineState;

use crate::http_server::{progress_response, ApiError, ProxyState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub org_id: Id,
    pub state: Option<String>,
    pub name: Option<String>,
    pub team_id: Option<Id>,
}

pub async fn list(
    State(state): State<ProxyState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let machine_state = match query.state.as_deref() {
        None => None,
        Some("active") => Some(MachineState::Active),
        Some("destroyed") => Some(MachineState::Destroyed),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown machine state filter: {other}"
            )))
        }
    };

    let segments = state
        .logic
        .client()
        .machines()
        .list(
            &query.org_id,
            machine_state,
            query.name.as_deref(),
            query.team_id.as_ref(),
        )
        .await
        .map_err(crate::logic::LogicError::from)?;
    Ok(Json(segments).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub org_id: Id,
    pub team_id: Id,
    pub name: String,
}

/// Create a machine, streaming progress chunks. The final chunk carries the
/// new machine id, token id, and the base64 token secret; the secret is
/// shown exactly once and never persisted.
pub async fn create(
    State(state): State<ProxyState>,
    Json(request): Json<CreateRequest>,
) -> Response {
    let logic = state.logic.clone();
    progress_response(move |notifier| async move {
        let created = logic
            .create_machine(&notifier, request.org_id, request.team_id, &request.name)
            .await?;

        let token_secret = BASE64.encode(created.token_secret.borrow());
        Ok(serde_json::json!({
            "machine_id": created.segment.machine.id,
            "token_id": created.token_id,
            "token_secret": token_secret,
        }))
    })
}

pub async fn destroy(
    State(state): State<ProxyState>,
    Path(id): Path<Id>,
) -> Result<Response, ApiError> {
    state
        .logic
        .client()
        .machines()
        .destroy(&id)
        .await
        .map_err(crate::logic::LogicError::from)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

//! Credential routes: decrypted reads, progress-streamed writes.

use axum::extract::{Json, Query, State};
use axum::response::{IntoResponse, Response};

use common::identity::Id;
use common::pathexp::PathExp;

use crate::http_server::{progress_response, ApiError, ProxyState};
use crate::logic::CredentialRequest;

pub async fn get_values(
    State(state): State<ProxyState>,
    // repeated team_id params arrive as separate pairs
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let mut pathexp: Option<PathExp> = None;
    let mut team_ids: Vec<Id> = Vec::new();

    for (key, value) in &params {
        match key.as_str() {
            "pathexp" | "path" => {
                let parsed = value
                    .parse()
                    .map_err(|err| ApiError::bad_request(format!("invalid pathexp: {err}")))?;
                pathexp = Some(parsed);
            }
            "team_id" => {
                let parsed = value
                    .parse()
                    .map_err(|err| ApiError::bad_request(format!("invalid team_id: {err}")))?;
                team_ids.push(parsed);
            }
            _ => {}
        }
    }

    let pathexp = pathexp.ok_or_else(|| ApiError::bad_request("pathexp required"))?;
    let values = state.logic.get_credentials(&pathexp, &team_ids).await?;
    Ok(Json(values).into_response())
}

pub async fn set_values(
    State(state): State<ProxyState>,
    Json(requests): Json<Vec<CredentialRequest>>,
) -> Response {
    let logic = state.logic.clone();
    progress_response(move |notifier| async move {
        let created = logic.set_credentials(&notifier, requests).await?;
        let ids: Vec<_> = created.iter().map(|envelope| envelope.id).collect();
        Ok(serde_json::json!({ "credentials": ids }))
    })
}

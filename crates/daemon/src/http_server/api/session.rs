//! Session lifecycle routes: `/v1/login`, `/v1/logout`, `/v1/session`.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use common::encoding::Base64Url;
use common::identity::Id;

use crate::http_server::{ApiError, ProxyState};

/// Login body: a user logs in with email and passphrase, a machine with its
/// token id and secret.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LoginRequest {
    User {
        email: String,
        passphrase: String,
    },
    Machine {
        token_id: Id,
        secret: Base64Url,
    },
}

pub async fn login(
    State(state): State<ProxyState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    match request {
        LoginRequest::User { email, passphrase } => {
            state.logic.user_login(&email, &passphrase).await?;
        }
        LoginRequest::Machine { token_id, secret } => {
            state.logic.machine_login(token_id, &secret).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn logout(State(state): State<ProxyState>) -> Result<Response, ApiError> {
    state.logic.logout().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn status(State(state): State<ProxyState>) -> Result<Response, ApiError> {
    let status = state.logic.session_status();
    if !(status.token && status.passphrase) {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            body: crate::http_server::WireError::new("unauthorized", "not logged in"),
        });
    }
    Ok(Json(status).into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_login_request_shapes() {
        let user: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b","passphrase":"p"}"#).unwrap();
        assert!(matches!(user, LoginRequest::User { .. }));

        let id = Id::new_mutable(common::identity::ObjectType::MachineToken);
        let body = format!(r#"{{"token_id":"{id}","secret":"dG9ydXM"}}"#);
        let machine: LoginRequest = serde_json::from_str(&body).unwrap();
        assert!(matches!(machine, LoginRequest::Machine { .. }));
    }
}

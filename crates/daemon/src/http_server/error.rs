//! Wire error mapping
//!
//! Every handler failure crosses the socket as `{type, error}` with a
//! matching status code. Cancelled operations map to a 499-style abort.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::crypto::CryptoError;
use crate::logic::LogicError;
use crate::registry::RegistryError;

/// Client closed request; nginx's non-standard code, useful in logs.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: String,
}

impl WireError {
    pub fn new(kind: &'static str, error: impl Into<String>) -> Self {
        WireError {
            kind,
            error: error.into(),
        }
    }
}

/// A handler error: a wire body plus the status it travels with.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: WireError,
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            body: WireError::new("bad_request", error),
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            body: WireError::new("not_found", error),
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: WireError::new("internal_server", error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<LogicError> for ApiError {
    fn from(err: LogicError) -> Self {
        let (status, kind) = match &err {
            LogicError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            LogicError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            LogicError::AlreadyAuthenticated => (StatusCode::CONFLICT, "already_authenticated"),
            LogicError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            LogicError::Cancelled => (
                StatusCode::from_u16(STATUS_CLIENT_CLOSED)
                    .expect("499 is a valid status code"),
                "cancelled",
            ),
            LogicError::Crypto(crypto) => {
                let status = match crypto {
                    CryptoError::SessionRequired => StatusCode::UNAUTHORIZED,
                    CryptoError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_REQUEST,
                };
                let kind = match crypto {
                    CryptoError::SessionRequired => "unauthorized",
                    _ => "bad_request",
                };
                (status, kind)
            }
            LogicError::Registry(registry) => return registry_error(registry, err.to_string()),
            LogicError::Database(_) | LogicError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_server")
            }
        };

        if status.is_server_error() {
            tracing::error!("handler failed: {err}");
        }
        ApiError {
            status,
            body: WireError::new(kind, err.to_string()),
        }
    }
}

fn registry_error(err: &RegistryError, message: String) -> ApiError {
    match err {
        RegistryError::Api { status, body } => {
            let message = body.message.clone().unwrap_or(message);
            if status.is_client_error() {
                let kind = match status.as_u16() {
                    401 | 403 => "unauthorized",
                    404 => "not_found",
                    _ => "bad_request",
                };
                ApiError {
                    status: *status,
                    body: WireError::new(kind, message),
                }
            } else {
                ApiError {
                    status: StatusCode::BAD_GATEWAY,
                    body: WireError::new("bad_gateway", message),
                }
            }
        }
        RegistryError::Network(_) => ApiError {
            status: StatusCode::BAD_GATEWAY,
            body: WireError::new("bad_gateway", message),
        },
        _ => ApiError::internal(message),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::RemoteErrorBody;

    #[test]
    fn test_logic_error_mapping() {
        let err: ApiError = LogicError::AlreadyAuthenticated.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.body.kind, "already_authenticated");

        let err: ApiError = LogicError::Unauthorized.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err: ApiError = LogicError::Cancelled.into();
        assert_eq!(err.status.as_u16(), STATUS_CLIENT_CLOSED);
    }

    #[test]
    fn test_remote_5xx_maps_to_bad_gateway() {
        let err: ApiError = LogicError::Registry(RegistryError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: RemoteErrorBody::default(),
        })
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.body.kind, "bad_gateway");
    }

    #[test]
    fn test_remote_4xx_keeps_status_and_detail() {
        let err: ApiError = LogicError::Registry(RegistryError::Api {
            status: StatusCode::NOT_FOUND,
            body: RemoteErrorBody {
                code: None,
                message: Some("no such org".to_string()),
                trigger: None,
            },
        })
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.kind, "not_found");
        assert_eq!(err.body.error, "no such org");
    }

    #[test]
    fn test_crypto_failure_is_bad_request() {
        let err: ApiError =
            LogicError::Crypto(CryptoError::Failure("master key unwrap")).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.body.error.contains("cryptographic operation failed"));
    }
}

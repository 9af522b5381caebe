//! Transparent forwarding
//!
//! Recognized registry paths that have no internal handler are forwarded
//! with the session's bearer token attached and the response streamed back.
//! Anything else is a local 404.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;

use crate::http_server::{ApiError, ProxyState};

/// Registry collections the proxy forwards verbatim.
const FORWARD_PREFIXES: &[&str] = &[
    "/users",
    "/profiles",
    "/self",
    "/memberships",
    "/invites",
    "/policies",
    "/policy-attachments",
    "/claimtree",
];

const MAX_FORWARD_BODY: usize = 1024 * 1024;

pub async fn handler(
    State(state): State<ProxyState>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    let Some(remote_path) = path.strip_prefix("/v1") else {
        return Err(ApiError::not_found("unknown route"));
    };
    if !FORWARD_PREFIXES
        .iter()
        .any(|prefix| remote_path.starts_with(prefix))
    {
        return Err(ApiError::not_found("unknown route"));
    }

    let method = request.method().clone();
    let query = request.uri().query().map(str::to_string);
    let content_type = request.headers().get(CONTENT_TYPE).cloned();

    let body = axum::body::to_bytes(request.into_body(), MAX_FORWARD_BODY)
        .await
        .map_err(|err| ApiError::bad_request(format!("unreadable request body: {err}")))?;

    let client = state.logic.client();
    let mut url = client
        .endpoint(remote_path)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    url.set_query(query.as_deref());

    let mut builder = client.http_client().request(method, url);
    if let Some(token) = state.session.auth_token() {
        builder = builder.bearer_auth(token);
    }
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    let upstream = builder.send().await.map_err(|err| ApiError {
        status: axum::http::StatusCode::BAD_GATEWAY,
        body: crate::http_server::WireError::new("bad_gateway", err.to_string()),
    })?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(content_type) = upstream.headers().get(CONTENT_TYPE) {
        response = response.header(CONTENT_TYPE, content_type);
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|err| ApiError::internal(err.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_forward_prefix_recognition() {
        let recognized = |path: &str| {
            path.strip_prefix("/v1")
                .map(|rest| FORWARD_PREFIXES.iter().any(|p| rest.starts_with(p)))
                .unwrap_or(false)
        };

        assert!(recognized("/v1/users/self"));
        assert!(recognized("/v1/policies"));
        assert!(!recognized("/v1/credentials"));
        assert!(!recognized("/totally/unknown"));
    }
}

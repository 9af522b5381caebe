use axum::routing::{delete, get, post};
use axum::Router;

mod credentials;
mod forward;
mod keypairs;
mod machines;
mod orgs;
mod session;
mod teams;
mod version;

use super::ProxyState;

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/login", post(session::login))
        .route("/v1/logout", post(session::logout))
        .route("/v1/session", get(session::status))
        .route(
            "/v1/machines",
            get(machines::list).post(machines::create),
        )
        .route("/v1/machines/{id}", delete(machines::destroy))
        .route(
            "/v1/credentials",
            get(credentials::get_values).post(credentials::set_values),
        )
        .route("/v1/keypairs", get(keypairs::list))
        .route("/v1/keypairs/generate", post(keypairs::generate))
        .route("/v1/orgs", get(orgs::list))
        .route("/v1/teams", get(teams::list))
        .route("/v1/version", get(version::version))
        .route("/v1/updates", get(version::updates))
        .fallback(forward::handler)
        .with_state(state)
}

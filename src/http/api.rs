use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::SharedState;
use crate::errors::RequestError;
use crate::history::render_table;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        text(StatusCode::BAD_REQUEST, format!("{}\n", self))
    }
}

pub(super) fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}

pub(super) async fn index(State(state): State<SharedState>) -> Response {
    let summary = format!(
        "saturated: build-trigger daemon\n\
         \n\
         GET /v1/build/<repo-url>[?environ=KEY=value...]\n    \
             update the mirror of <repo-url>, build branch '{}' and stream the log\n    \
             answers 200 once the build is queued; the last line ('* build completed'\n    \
             or '* error during build: ...') and the x-build-status trailer\n    \
             ('success' or 'error') carry the outcome\n\
         GET /v1/builds\n    \
             list the last {} builds\n\
         GET /v1/key\n    \
             show the public SSH key used to fetch repositories\n",
        state.config.branch,
        state.history.capacity()
    );
    text(StatusCode::OK, summary)
}

pub(super) async fn list_builds(State(state): State<SharedState>) -> Response {
    let records = state.history.list();
    text(StatusCode::OK, render_table(&records, Utc::now()))
}

pub(super) async fn public_key(State(state): State<SharedState>) -> Response {
    match tokio::fs::read_to_string(&state.public_key).await {
        Ok(key) => text(StatusCode::OK, key),
        Err(e) => {
            tracing::warn!(path = %state.public_key.display(), error = %e, "can't read public key");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("can't read public key: {}\n", e),
            )
        }
    }
}

/// `/v1/build` without a repository is a malformed request; anything else is unknown.
pub(super) async fn fallback(request: Request) -> Response {
    match request.uri().path().trim_end_matches('/') {
        "/v1/build" => RequestError::MissingRepoUrl.into_response(),
        _ => text(StatusCode::NOT_FOUND, "404 page not found\n"),
    }
}

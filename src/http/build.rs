//! `GET /v1/build/<repo-url>`: queue, run and stream one build.
//!
//! The response status is committed before any output: 400 for a malformed
//! request, 500 when builds cannot run as the configured user, 200 otherwise.
//! The build outcome arrives as the last streamed line and as the
//! `x-build-status` trailer.
//!
//! The build runs in its own task. If the client goes away the remote sink
//! turns into a no-op while the build, its cleanup and its history entry
//! carry on.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, RawQuery, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use http_body_util::StreamBody;
use hyper::body::Frame;
use tokio::sync::mpsc::{self, Sender};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::SharedState;
use super::api::text;
use crate::errors::{RequestError, TaskError};
use crate::pipeline::{ConsoleSink, LineFlushWriter, LogSink, PrefixWriter, ResponseSink, SharedSink, Tee};
use crate::repo::RepoKey;
use crate::task::{BuildPlan, BuildTask};

pub const BUILD_STATUS_TRAILER: &str = "x-build-status";

/// Body frames buffered per client before output is dropped.
const RESPONSE_BUFFER: usize = 1024;

/// A validated trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub repo_url: String,
    pub environ: Vec<(String, String)>,
    pub client: String,
}

/// Collects the `environ=KEY=value` query parameters, in order.
pub fn parse_environ(query: Option<&str>) -> Result<Vec<(String, String)>, RequestError> {
    let Some(query) = query else {
        return Ok(Vec::new());
    };

    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| name == "environ")
        .map(|(_, entry)| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(RequestError::InvalidEnviron {
                entry: entry.into_owned(),
            }),
        })
        .collect()
}

pub(super) async fn trigger_build(
    State(state): State<SharedState>,
    Path(repo_url): Path<String>,
    RawQuery(query): RawQuery,
    request: Request,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.to_string());

    if repo_url.trim().is_empty() {
        return RequestError::MissingRepoUrl.into_response();
    }
    let environ = match parse_environ(query.as_deref()) {
        Ok(environ) => environ,
        Err(e) => {
            tracing::info!(client = %client, error = %e, "rejected build request");
            return e.into_response();
        }
    };

    if let Err(e) = state.config.identity.verify() {
        tracing::error!(repo = %repo_url, client = %client, error = %e, "can't run build");
        return text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("can't run build: {}\n", e),
        );
    }

    tracing::info!(repo = %repo_url, client = %client, "build requested");
    let request = BuildRequest {
        repo_url,
        environ,
        client,
    };

    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
    tokio::spawn(stream_build(state, request, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::new(StreamBody::new(stream)),
    )
        .into_response()
}

/// Wires the log pipeline for one client, runs the build and ends the stream
/// with the status trailer.
async fn stream_build(state: SharedState, request: BuildRequest, tx: Sender<Frame<Bytes>>) {
    let remote = ResponseSink::new(tx.clone());
    let console = PrefixWriter::new(ConsoleSink::new(), format!("({}) ", request.client));
    let tee = Tee::new(vec![remote.clone() as SharedSink, console]);
    let root = PrefixWriter::new(LineFlushWriter::new(tee), "");

    let result = run_build(&state, &request, &root).await;
    if let Err(e) = root.close() {
        tracing::debug!(error = %e, "can't close build log");
    }

    let status = if result.is_ok() { "success" } else { "error" };
    let mut trailers = HeaderMap::new();
    trailers.insert(BUILD_STATUS_TRAILER, HeaderValue::from_static(status));
    if tx.send(Frame::trailers(trailers)).await.is_err() {
        tracing::debug!(repo = %request.repo_url, "client gone before trailers");
    }
}

/// Queues for the repository, runs the build task and records the outcome.
pub async fn run_build(
    state: &SharedState,
    request: &BuildRequest,
    root: &Arc<PrefixWriter>,
) -> Result<(), TaskError> {
    let logger = root.with_prefix("* ");
    let say = |message: String| {
        if let Err(e) = logger.write_line(&message) {
            tracing::debug!(error = %e, "dropped progress message");
        }
    };

    let key = RepoKey::from_url(&request.repo_url);
    let position = state.queue.size(&key);
    if position > 0 {
        say(format!("you are {} in the build queue", position));
    }
    let slot = state.queue.acquire(&key).await;

    let handle = state.history.record(&request.repo_url);
    tracing::info!(repo = %request.repo_url, key = %key, build_id = handle.id(), "build started");
    say(format!("running build task for '{}'", request.repo_url));
    say(format!("building as uid {}", state.config.identity.uid()));

    let plan = BuildPlan {
        branch: state.config.branch.clone(),
        build_command: state.config.build_command.clone(),
        install_command: state.config.install_command().map(str::to_string),
        environ: request.environ.clone(),
    };
    let task = BuildTask::new(
        Arc::clone(&state.runner),
        Arc::clone(root),
        &request.repo_url,
        &state.config.workdir,
    );
    let result = task.execute(&plan).await;
    slot.release();

    match &result {
        Ok(()) => {
            state.history.finish(handle, None);
            tracing::info!(repo = %request.repo_url, build_id = handle.id(), "build succeeded");
            say("build completed".to_string());
        }
        Err(e) => {
            state.history.finish(handle, Some(e.to_string()));
            tracing::warn!(repo = %request.repo_url, build_id = handle.id(), error = %e, "build failed");
            say(format!("error during build: {}", e));
        }
    }
    result
}

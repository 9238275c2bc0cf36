//! Typed error hierarchy for the build daemon.
//!
//! Four enums cover the layers a build request passes through:
//! - `RequestError`: malformed trigger requests, rejected before admission
//! - `PrivilegeError`: build identity lookup and verification
//! - `RunError`: a single external command invocation
//! - `TaskError`: a build task stage, wrapping the `RunError` that broke it

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors from a single external command.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("can't start '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed: {status}")]
    NonZeroExit { command: String, status: ExitStatus },

    #[error("can't relay output of '{command}': {source}")]
    Output {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the build task state machine, one variant per stage.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("can't update mirror: {0}")]
    MirrorUpdate(#[source] RunError),

    #[error("can't create working dir: {0}")]
    Workspace(#[source] RunError),

    #[error("can't checkout branch '{branch}': {source}")]
    Checkout {
        branch: String,
        #[source]
        source: RunError,
    },

    #[error("can't build package: {0}")]
    Build(#[source] RunError),

    #[error("can't install package: {0}")]
    Install(#[source] RunError),
}

/// Errors from resolving or assuming the unprivileged build identity.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("user '{name}' not found")]
    UnknownUser { name: String },

    #[error("can't lookup user '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("can't run commands as uid {uid}: daemon runs as uid {euid} without root privileges")]
    NotPermitted { uid: u32, euid: u32 },

    #[error("can't prepare workdir {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't hand workdir {path} to the build user: {source}")]
    Chown {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("workdir {path} is not writable by user '{name}'")]
    WorkdirNotWritable { path: PathBuf, name: String },
}

/// Errors from parsing a build trigger request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("<repo-url> required in URL /v1/build/<repo-url>")]
    MissingRepoUrl,

    #[error("invalid environ entry '{entry}': expected KEY=value")]
    InvalidEnviron { entry: String },
}

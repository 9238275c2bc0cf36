//! Integration tests for saturated
//!
//! Binary smoke tests plus end-to-end runs over a real TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc, oneshot};

use saturated::config::DaemonConfig;
use saturated::errors::RunError;
use saturated::http::{AppState, SharedState, serve_on};
use saturated::pipeline::{LogSink, SharedSink};
use saturated::privilege::BuildIdentity;
use saturated::runner::{CommandRunner, CommandSpec, ProcessRunner};

fn saturated() -> Command {
    cargo_bin_cmd!("saturated")
}

// =============================================================================
// Binary
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_flags() {
        saturated()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--build-command"))
            .stdout(predicate::str::contains("--install-command"))
            .stdout(predicate::str::contains("--keep"));
    }

    #[test]
    fn test_version() {
        saturated()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_address_required() {
        saturated().assert().failure();
    }

    #[test]
    fn test_zero_keep_rejected() {
        saturated().args(["-k", "0", ":0"]).assert().failure();
    }

    #[test]
    fn test_unknown_user_fails_startup() {
        saturated()
            .args(["-u", "no-such-user-saturated", "127.0.0.1:0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no-such-user-saturated"));
    }

    #[test]
    fn test_unusable_workdir_fails_startup() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();
        let user = BuildIdentity::current();

        saturated()
            .args(["-u", user.name(), "-w"])
            .arg(file.join("work"))
            .arg("127.0.0.1:0")
            .assert()
            .failure()
            .stderr(predicate::str::contains("workdir"));
    }
}

// =============================================================================
// End to end
// =============================================================================

/// Holds every build command until a permit is released on `gate`.
struct GatedRunner {
    gate: Arc<Semaphore>,
    builds: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl CommandRunner for GatedRunner {
    async fn run(&self, spec: &CommandSpec, sink: SharedSink) -> Result<(), RunError> {
        if spec.program == "sh" {
            let _ = self.builds.send(());
            self.gate.acquire().await.unwrap().forget();
        }
        sink.write_line(&format!("ran {}", spec.program)).unwrap();
        sink.close().unwrap();
        Ok(())
    }
}

fn config(workdir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        address: "127.0.0.1:0".into(),
        build_command: "makepkg -sr".into(),
        install_command: String::new(),
        workdir: workdir.path().to_path_buf(),
        branch: "pkgbuild".into(),
        keep: 10,
        identity: BuildIdentity::current(),
    }
}

struct Server {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Server {
    async fn start(state: SharedState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve_on(listener, state, async move {
            let _ = stopped.await;
        }));
        Self { addr, stop, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_builds_of_one_repository_queue() {
    let workdir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (builds_tx, mut builds) = mpsc::unbounded_channel();
    let runner = Arc::new(GatedRunner {
        gate: Arc::clone(&gate),
        builds: builds_tx,
    });
    let state = AppState::with_public_key(config(&workdir), runner, workdir.path().join("k"));
    let server = Server::start(state.clone()).await;
    let build_url = server.url("/v1/build/git://host/repo.git");

    let mut first = reqwest::get(&build_url).await.unwrap();
    assert_eq!(first.status(), 200);
    builds.recv().await.unwrap();

    let mut second = reqwest::get(&build_url).await.unwrap();
    let chunk = second.chunk().await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"* you are 1 in the build queue\n");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(builds.try_recv().is_err());

    gate.add_permits(1);
    let mut first_log = Vec::new();
    while let Some(chunk) = first.chunk().await.unwrap() {
        first_log.extend_from_slice(&chunk);
    }
    let first_log = String::from_utf8(first_log).unwrap();
    assert!(first_log.contains("[build] ran sh\n"));
    assert!(first_log.ends_with("* build completed\n"));

    builds.recv().await.unwrap();
    gate.add_permits(1);
    let rest = second.text().await.unwrap();
    assert!(rest.ends_with("* build completed\n"));

    let table = reqwest::get(server.url("/v1/builds")).await.unwrap().text().await.unwrap();
    let rows: Vec<&str> = table.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("Repo URL"));
    assert!(rows[1].starts_with("git://host/repo.git"));
    assert!(rows[1].contains("success"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_repository_reports_mirror_error() {
    let workdir = TempDir::new().unwrap();
    let runner = Arc::new(ProcessRunner::new(BuildIdentity::current()));
    let state = AppState::with_public_key(config(&workdir), runner, workdir.path().join("k"));
    let server = Server::start(state.clone()).await;

    let missing = "no-such-origin-saturated/repo.git";
    let response = reqwest::get(server.url(&format!("/v1/build/{}", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let log = response.text().await.unwrap();
    let last = log.lines().last().unwrap();
    assert!(last.starts_with("* error during build: can't update mirror: "), "{}", log);

    let record = &state.history.list()[0];
    assert_eq!(record.repository, missing);
    assert!(record.error.starts_with("can't update mirror: "));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_path_over_tcp() {
    let workdir = TempDir::new().unwrap();
    let runner = Arc::new(ProcessRunner::new(BuildIdentity::current()));
    let state = AppState::with_public_key(config(&workdir), runner, workdir.path().join("k"));
    let server = Server::start(state).await;

    let response = reqwest::get(server.url("/nope")).await.unwrap();
    assert_eq!(response.status(), 404);
    let response = reqwest::get(server.url("/v1/build/")).await.unwrap();
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

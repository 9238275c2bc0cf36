//! External command execution with output relayed to a log sink.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::errors::RunError;
use crate::pipeline::{LogSink, SharedSink};
use crate::privilege::BuildIdentity;

const READ_CHUNK: usize = 8 * 1024;

/// A command to run: program, arguments, working directory, env overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// `sh -c <command>`.
    pub fn shell(command: &str) -> Self {
        Self::new("sh").args(["-c", command])
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Adds variables on top of the inherited environment. For a key given
    /// more than once, the first occurrence wins.
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Program and arguments joined by spaces, for messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs external commands, streaming their stdout and stderr into a sink.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion. Both output streams go to `sink`, which is
    /// closed once the command exits. Fails if the command cannot be started
    /// or exits unsuccessfully.
    async fn run(&self, spec: &CommandSpec, sink: SharedSink) -> Result<(), RunError>;
}

/// `CommandRunner` backed by real child processes started as `identity`.
pub struct ProcessRunner {
    identity: BuildIdentity,
}

impl ProcessRunner {
    pub fn new(identity: BuildIdentity) -> Self {
        Self { identity }
    }

    fn command(&self, spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }
        self.identity.apply(&mut command);

        let mut seen = HashSet::new();
        for (key, value) in &spec.env {
            if seen.insert(key.as_str()) {
                command.env(key, value);
            }
        }
        command
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, sink: SharedSink) -> Result<(), RunError> {
        let command_line = spec.display();
        tracing::debug!(command = %command_line, dir = ?spec.dir, "spawning");

        let mut child = self
            .command(spec)
            .spawn()
            .map_err(|source| RunError::SpawnFailed {
                command: command_line.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out, err, status) = tokio::join!(
            relay(stdout, sink.as_ref()),
            relay(stderr, sink.as_ref()),
            child.wait()
        );

        let output_err = |source| RunError::Output {
            command: command_line.clone(),
            source,
        };
        let status = status.map_err(output_err)?;
        sink.close().map_err(output_err)?;
        out.and(err).map_err(output_err)?;

        if !status.success() {
            return Err(RunError::NonZeroExit {
                command: command_line,
                status,
            });
        }
        Ok(())
    }
}

/// Copies `reader` into `sink` chunk by chunk until EOF.
///
/// The pipe is drained even after the sink fails, so the child never blocks on
/// a full pipe; the first sink error is returned at the end.
async fn relay<R>(reader: Option<R>, sink: &dyn LogSink) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut buf = vec![0u8; READ_CHUNK];
    let mut sink_err = None;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if sink_err.is_none()
            && let Err(e) = sink.write(&buf[..n])
        {
            sink_err = Some(e);
        }
    }
    sink_err.map_or(Ok(()), Err)
}

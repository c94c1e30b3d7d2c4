//! External tool execution.
//!
//! Every tool the pipeline touches (git, jekyll, bundle, rsync, aws) runs
//! through a [`CommandRunner`]. The process-backed [`ProcessRunner`] streams
//! stdout and stderr into the [`BuildLog`] line by line; tests substitute a
//! recording runner.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::build::log::BuildLog;

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Prefix of the failure message.
    pub description: String,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(tool: impl Into<String>, cwd: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Invocation {
            tool: tool.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            description: description.into(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// `<tool> <args...>`
    pub fn command_line(&self) -> String {
        command_line(&self.tool, &self.args)
    }
}

/// Description used when the caller has nothing more specific.
pub fn default_description(repo: &str) -> String {
    format!("{repo}: command failed")
}

fn command_line(tool: &str, args: &[String]) -> String {
    std::iter::once(tool)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn exit_status(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("with exit code {code}"),
        None => "without an exit code".to_string(),
    }
}

/// A tool that could not be started or did not exit with status 0.
#[derive(Debug, Clone, Error)]
#[error("{description} {} from command: {}", exit_status(.exit_code), command_line(.tool, .args))]
pub struct CommandError {
    pub description: String,
    pub tool: String,
    pub args: Vec<String>,
    /// `None` when the process failed to start or was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured output lines, stdout and stderr interleaved.
    pub output: Vec<String>,
}

impl CommandError {
    pub fn new(invocation: &Invocation, exit_code: Option<i32>, output: Vec<String>) -> Self {
        CommandError {
            description: invocation.description.clone(),
            tool: invocation.tool.clone(),
            args: invocation.args.clone(),
            exit_code,
            output,
        }
    }
}

/// Runs external tools on behalf of a pipeline.
pub trait CommandRunner: Send + Sync {
    /// Runs `invocation` to completion, streaming its output into `log`.
    fn run(
        &self,
        invocation: &Invocation,
        log: &BuildLog,
    ) -> impl Future<Output = Result<(), CommandError>> + Send;
}

/// Runs tools as child processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

/// Reads the next line, replacing invalid UTF-8. Drops the reader (closing
/// the pipe) at end of stream or on a read error.
async fn next_line<R>(reader: &mut Option<R>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let stream = reader.as_mut()?;
    let mut buf = Vec::new();
    match stream.read_until(b'\n', &mut buf).await {
        Ok(0) => {
            *reader = None;
            None
        }
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        Err(e) => {
            debug!(error = %e, "failed to read command output");
            *reader = None;
            None
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, log: &BuildLog) -> Result<(), CommandError> {
        debug!(command = %invocation.command_line(), cwd = %invocation.cwd.display(), "running");

        let mut command = Command::new(&invocation.tool);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {e}", invocation.tool);
                log.error(message.clone());
                return Err(CommandError::new(invocation, None, vec![message]));
            }
        };

        let mut stdout = child.stdout.take().map(BufReader::new);
        let mut stderr = child.stderr.take().map(BufReader::new);
        let mut output = Vec::new();

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                Some(line) = next_line(&mut stdout), if stdout.is_some() => {
                    log.info(line.clone());
                    output.push(line);
                }
                Some(line) = next_line(&mut stderr), if stderr.is_some() => {
                    log.error(line.clone());
                    output.push(line);
                }
                else => {}
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("failed to wait for {}: {e}", invocation.tool);
                log.error(message.clone());
                output.push(message);
                return Err(CommandError::new(invocation, None, output));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::new(invocation, status.code(), output))
        }
    }
}

/// Returns `path` as a string argument for a tool.
pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::log::LogLevel;
    use tempfile::tempdir;

    fn sh(script: &str, cwd: &Path) -> Invocation {
        Invocation::new("sh", cwd, default_description("foo")).args(["-c", script])
    }

    #[test]
    fn error_message_names_tool_args_and_exit_code() {
        let invocation = Invocation::new("git", "/tmp", "failed to clone foo")
            .args(["clone", "git@github.com:mbland/foo.git", "--branch", "pages"]);
        let err = CommandError::new(&invocation, Some(1), vec![]);
        assert_eq!(
            err.to_string(),
            "failed to clone foo with exit code 1 from command: \
             git clone git@github.com:mbland/foo.git --branch pages"
        );
    }

    #[test]
    fn error_message_without_exit_code() {
        let invocation = Invocation::new("jekyll", "/tmp", default_description("foo")).arg("build");
        let err = CommandError::new(&invocation, None, vec![]);
        assert_eq!(
            err.to_string(),
            "foo: command failed without an exit code from command: jekyll build"
        );
    }

    #[test]
    fn command_line_with_no_args() {
        assert_eq!(Invocation::new("rsync", "/", "").command_line(), "rsync");
    }

    #[tokio::test]
    async fn streams_stdout_and_stderr_into_log() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");

        ProcessRunner
            .run(&sh("echo out; echo err >&2", dir.path()), &log)
            .await
            .unwrap();

        let messages = log.messages();
        assert!(messages.contains(&"out".to_string()));
        assert_eq!(log.errors(), vec!["err"]);
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");

        ProcessRunner
            .run(&sh("touch created-here", dir.path()), &log)
            .await
            .unwrap();

        assert!(dir.path().join("created-here").exists());
    }

    #[tokio::test]
    async fn passes_environment() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");
        let invocation = sh("echo \"$PAGES_TEST_VALUE\"", dir.path()).env("PAGES_TEST_VALUE", "hello");

        ProcessRunner.run(&invocation, &log).await.unwrap();

        assert_eq!(log.messages(), vec!["hello"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");

        let err = ProcessRunner
            .run(&sh("echo partial; exit 3", dir.path()), &log)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code, Some(3));
        assert_eq!(err.output, vec!["partial"]);
        assert!(err.to_string().starts_with("foo: command failed with exit code 3"));
    }

    #[tokio::test]
    async fn invalid_utf8_output_is_logged_and_drained() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");
        // More output than a pipe buffer holds, after a Latin-1 file name.
        let script = "printf 'caf\\351.html\\n'; \
                      head -c 400000 /dev/zero | tr '\\0' a; echo; \
                      printf 'ol\\351\\n' >&2; echo done";

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ProcessRunner.run(&sh(script, dir.path()), &log),
        )
        .await
        .expect("command output was not drained");
        result.unwrap();

        let stdout: Vec<String> = log
            .lines()
            .into_iter()
            .filter(|l| l.level == LogLevel::Info)
            .map(|l| l.message)
            .collect();
        assert_eq!(stdout.len(), 3);
        assert_eq!(stdout[0], "caf\u{FFFD}.html");
        assert_eq!(stdout[1].len(), 400_000);
        assert!(stdout[1].bytes().all(|b| b == b'a'));
        assert_eq!(stdout[2], "done");
        assert_eq!(log.errors(), vec!["ol\u{FFFD}"]);
    }

    #[tokio::test]
    async fn crlf_line_endings_are_trimmed() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");

        ProcessRunner
            .run(&sh("printf 'one\\r\\ntwo'", dir.path()), &log)
            .await
            .unwrap();

        assert_eq!(log.messages(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn missing_tool_is_an_error() {
        let dir = tempdir().unwrap();
        let log = BuildLog::in_memory("foo");
        let invocation = Invocation::new("pages-builder-no-such-tool", dir.path(), "missing");

        let err = ProcessRunner.run(&invocation, &log).await.unwrap_err();

        assert_eq!(err.exit_code, None);
        assert_eq!(log.errors().len(), 1);
    }
}

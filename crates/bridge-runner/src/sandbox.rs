use crate::error::{IoContext, Result};
use crate::privilege::PrivilegeBoundary;
use std::ffi::OsString;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Where a child's output stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Null,
    /// Truncated on open. Two streams naming the same path share one handle.
    File(PathBuf),
}

/// How a sandboxed child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// A single untrusted invocation: fixed program, directory, identity and sinks.
#[derive(Debug, Clone)]
pub struct SandboxedProcess {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    pub identity: String,
    pub stdout: Sink,
    pub stderr: Sink,
    pub env_remove: Vec<String>,
    /// `PATH` the child sees; `None` leaves it to the boundary.
    pub path_env: Option<OsString>,
}

impl SandboxedProcess {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>, identity: &str) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            identity: identity.to_string(),
            stdout: Sink::Null,
            stderr: Sink::Null,
            env_remove: Vec::new(),
            path_env: None,
        }
    }

    /// Both streams into one file, interleaved in write order.
    pub fn capture_combined(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.stdout = Sink::File(path.clone());
        self.stderr = Sink::File(path);
        self
    }

    pub fn without_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_remove.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_path_env(mut self, path_env: Option<OsString>) -> Self {
        self.path_env = path_env;
        self
    }

    /// Runs to completion. Handles are closed when this returns, on every path.
    pub fn run(&self, boundary: &dyn PrivilegeBoundary) -> Result<ExitOutcome> {
        let mut cmd = boundary.command_as(&self.identity, &self.program, self.path_env.as_deref());
        cmd.current_dir(&self.working_dir);
        for name in &self.env_remove {
            cmd.env_remove(name);
        }
        let (stdout, stderr) = self.open_sinks()?;
        cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        let status = spawn_and_wait(cmd, &self.program)?;
        Ok(ExitOutcome::from(status))
    }

    fn open_sinks(&self) -> Result<(Stdio, Stdio)> {
        let stdout_file = match &self.stdout {
            Sink::File(path) => Some(create_sink(path)?),
            _ => None,
        };
        let stderr_file = match (&self.stderr, &self.stdout, &stdout_file) {
            (Sink::File(err), Sink::File(out), Some(shared)) if err == out => Some(
                shared
                    .try_clone()
                    .with_path("duplicating handle for", err)?,
            ),
            (Sink::File(path), _, _) => Some(create_sink(path)?),
            _ => None,
        };
        Ok((to_stdio(stdout_file), to_stdio(stderr_file)))
    }
}

fn create_sink(path: &Path) -> Result<File> {
    File::create(path).with_path("creating capture file", path)
}

fn to_stdio(file: Option<File>) -> Stdio {
    file.map_or_else(Stdio::null, Stdio::from)
}

fn spawn_and_wait(mut cmd: Command, program: &Path) -> Result<ExitStatus> {
    let mut child = cmd.spawn().with_path("spawning", program)?;
    child.wait().with_path("waiting for", program)
}

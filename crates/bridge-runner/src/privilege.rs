//! Crossing between the invoking user, root, and the unprivileged service
//! identity that runs untrusted grading code.
//!
//! The pipeline crosses the boundary twice: once upward, by re-executing the
//! whole binary under `sudo`, and once downward, for the single grader
//! invocation.

use crate::error::{BridgeError, IoContext, Result};
use nix::unistd::{geteuid, User};
use std::ffi::{OsStr, OsString};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};

const ELEVATION_TOOL: &str = "sudo";

/// Result of asking for elevated privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// This process already runs as root; continue in-process.
    AlreadyElevated,
    /// An elevated copy ran to completion; the caller should exit with `code`.
    Delegated { code: i32 },
}

pub trait PrivilegeBoundary {
    /// True iff the effective identity may perform the staging steps.
    fn is_elevated(&self) -> bool;

    /// Re-invokes the current executable with `args` under elevation unless
    /// already elevated. Blocks until the elevated child exits.
    fn ensure_elevated(&self, args: &[OsString]) -> Result<Elevation>;

    /// Hands the tree at `root` to `identity` so a dropped process can use it.
    fn grant(&self, root: &Path, identity: &str) -> Result<()>;

    /// Builds a command that runs `program` as `identity` with `path_env` as
    /// its `PATH`, when given.
    fn command_as(&self, identity: &str, program: &Path, path_env: Option<&OsStr>) -> Command;
}

/// Production boundary: `sudo` upward, `sudo -u` downward.
#[derive(Debug, Clone, Default)]
pub struct SudoBoundary {
    /// `PATH` carried across the upward re-exec.
    path_env: Option<OsString>,
}

impl SudoBoundary {
    pub fn new(path_env: Option<OsString>) -> Self {
        Self { path_env }
    }

    fn elevation_command(&self, exe: &Path, args: &[OsString]) -> Command {
        // sudo may sanitise PATH even with -E, so pass it through env(1).
        let mut cmd = Command::new(ELEVATION_TOOL);
        cmd.arg("-E").arg("env");
        if let Some(assignment) = path_assignment(self.path_env.as_deref()) {
            cmd.arg(assignment);
        }
        cmd.arg(exe).args(args);
        cmd
    }
}

impl PrivilegeBoundary for SudoBoundary {
    fn is_elevated(&self) -> bool {
        geteuid().is_root()
    }

    fn ensure_elevated(&self, args: &[OsString]) -> Result<Elevation> {
        if self.is_elevated() {
            return Ok(Elevation::AlreadyElevated);
        }
        tracing::info!("switching to root");
        let exe = std::env::current_exe()
            .map_err(|e| BridgeError::Elevation(format!("cannot locate own executable: {}", e)))?;
        let status = self
            .elevation_command(&exe, args)
            .status()
            .map_err(|e| BridgeError::Elevation(format!("cannot run {}: {}", ELEVATION_TOOL, e)))?;
        Ok(Elevation::Delegated {
            code: mirrored_exit_code(status),
        })
    }

    fn grant(&self, root: &Path, identity: &str) -> Result<()> {
        let user = User::from_name(identity)
            .map_err(|e| BridgeError::io(format!("looking up user {}", identity), e.into()))?
            .ok_or_else(|| BridgeError::UnknownIdentity(identity.to_string()))?;
        let (uid, gid) = (user.uid.as_raw(), user.gid.as_raw());
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.map_err(|e| {
                let context = format!("walking {}", root.display());
                BridgeError::io(context, e.into())
            })?;
            // lchown: never follow links planted in the tree.
            std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
                .with_path("changing owner of", entry.path())?;
        }
        tracing::info!(identity, uid, gid, root = %root.display(), "handed staging area over");
        Ok(())
    }

    fn command_as(&self, identity: &str, program: &Path, path_env: Option<&OsStr>) -> Command {
        let mut cmd = Command::new(ELEVATION_TOOL);
        cmd.arg("-u").arg(identity).arg("env");
        if let Some(assignment) = path_assignment(path_env) {
            cmd.arg(assignment);
        }
        cmd.arg(program);
        cmd
    }
}

/// Runs every stage as the current identity: no re-exec, no ownership change,
/// no identity switch. Suitable for local dry runs of an assignment bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBoundary;

impl PrivilegeBoundary for DirectBoundary {
    fn is_elevated(&self) -> bool {
        true
    }

    fn ensure_elevated(&self, _args: &[OsString]) -> Result<Elevation> {
        Ok(Elevation::AlreadyElevated)
    }

    fn grant(&self, _root: &Path, identity: &str) -> Result<()> {
        tracing::debug!(identity, "direct boundary: ownership left unchanged");
        Ok(())
    }

    fn command_as(&self, _identity: &str, program: &Path, path_env: Option<&OsStr>) -> Command {
        let mut cmd = Command::new(program);
        if let Some(path) = path_env {
            cmd.env("PATH", path);
        }
        cmd
    }
}

fn path_assignment(path_env: Option<&OsStr>) -> Option<OsString> {
    path_env.map(|path| {
        let mut assignment = OsString::from("PATH=");
        assignment.push(path);
        assignment
    })
}

/// Exit code to mirror for a finished child; signals map to 128+N like a shell.
pub fn mirrored_exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

use crate::config::{PipelineConfig, CALLBACK_SECRET_VARS};
use crate::error::{BridgeError, IoContext, Result};
use crate::privilege::PrivilegeBoundary;
use crate::sandbox::{ExitOutcome, SandboxedProcess, Sink};
use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const EXECUTABLE_MODE: u32 = 0o777;

/// Runs the optional `setup.sh` shipped in the bundle, output discarded.
///
/// Runs before ownership is handed over, as the pipeline's own identity.
pub fn run_setup_hook(config: &PipelineConfig, boundary: &dyn PrivilegeBoundary) -> Result<()> {
    let script = config.staging.setup_script();
    tracing::info!("run setup.sh");
    fs::set_permissions(&script, Permissions::from_mode(EXECUTABLE_MODE))
        .with_path("making executable", &script)?;

    let process = SandboxedProcess {
        program: script,
        working_dir: config.staging.source(),
        identity: current_identity(),
        stdout: Sink::Null,
        stderr: Sink::Null,
        env_remove: CALLBACK_SECRET_VARS.iter().map(|v| v.to_string()).collect(),
        path_env: config.path_env.clone(),
    };
    let outcome = process.run(boundary)?;
    if !outcome.success() {
        return Err(BridgeError::SetupFailed(describe(&outcome)));
    }
    Ok(())
}

/// Copies the entry point out of the bundle, hands the staging area to the
/// service identity and runs the grader there with combined output captured.
pub fn run_grader_entry_point(
    config: &PipelineConfig,
    boundary: &dyn PrivilegeBoundary,
) -> Result<ExitOutcome> {
    let staging = &config.staging;
    let source = staging.entry_point_source();
    let target = staging.entry_point();

    tracing::info!("Copy run_autograde");
    let bytes = copy_regular_file(&source, &target)?;
    tracing::debug!(bytes, "copied entry point");
    fs::set_permissions(&target, Permissions::from_mode(EXECUTABLE_MODE))
        .with_path("making executable", &target)?;

    boundary.grant(&staging.root, &config.service_identity)?;

    tracing::info!("Executing run_autograde");
    let process = SandboxedProcess::new(&target, &staging.root, &config.service_identity)
        .capture_combined(staging.capture_file())
        .without_env(CALLBACK_SECRET_VARS)
        .with_path_env(config.path_env.clone());
    let outcome = process.run(boundary)?;
    tracing::info!(code = ?outcome.code, signal = ?outcome.signal, "run_autograder exited");
    grader_verdict(outcome)
}

/// Only a zero exit lets the run go on to translation.
fn grader_verdict(outcome: ExitOutcome) -> Result<ExitOutcome> {
    match (outcome.code, outcome.signal) {
        (Some(0), _) => Ok(outcome),
        (Some(code), _) => Err(BridgeError::GraderFailed { code }),
        (None, Some(signal)) => Err(BridgeError::GraderSignalled { signal }),
        (None, None) => Err(BridgeError::GraderFailed { code: -1 }),
    }
}

/// Copies `src` to `dst`, refusing anything that is not a regular file.
pub fn copy_regular_file(src: &Path, dst: &Path) -> Result<u64> {
    let meta = fs::symlink_metadata(src).with_path("inspecting", src)?;
    if !meta.file_type().is_file() {
        return Err(BridgeError::NotRegularFile(src.to_path_buf()));
    }
    let mut source = File::open(src).with_path("opening", src)?;
    let mut destination = File::create(dst).with_path("creating", dst)?;
    io::copy(&mut source, &mut destination).with_path("copying to", dst)
}

fn current_identity() -> String {
    nix::unistd::User::from_uid(nix::unistd::geteuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "root".to_string())
}

fn describe(outcome: &ExitOutcome) -> String {
    match (outcome.code, outcome.signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => "unknown termination".to_string(),
    }
}

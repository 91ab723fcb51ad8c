use anyhow::Result;
use bridge_runner::config::{DEFAULT_SERVICE_IDENTITY, DEFAULT_STAGING_ROOT, DEFAULT_WORKSPACE_ROOT};
use bridge_runner::{run_pipeline, Elevation, PipelineConfig, PrivilegeBoundary, RunOptions, SudoBoundary};
use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gradescope_wrapper",
    version,
    about = "Run a Gradescope autograder bundle in a Codio workspace and report the grade"
)]
struct Cli {
    /// Run source/setup.sh from the bundle before grading.
    #[arg(long)]
    run_setup: bool,
    /// Include each test's captured output in the feedback.
    #[arg(long)]
    logs: bool,
    #[arg(long, default_value = DEFAULT_STAGING_ROOT)]
    staging_root: PathBuf,
    #[arg(long, default_value = DEFAULT_WORKSPACE_ROOT)]
    workspace: PathBuf,
    /// Unprivileged user that runs run_autograder.
    #[arg(long, default_value = DEFAULT_SERVICE_IDENTITY)]
    service_user: String,
    /// Bare-word switches used by existing assignment launch commands
    /// (`run-setup`, `logs`). Other words are ignored.
    #[arg(value_name = "MODE")]
    modes: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    #[value(name = "run-setup")]
    RunSetup,
    #[value(name = "logs")]
    Logs,
}

impl Cli {
    fn mode_words(&self) -> Vec<ModeArg> {
        self.modes
            .iter()
            .filter_map(|word| match ModeArg::from_str(word, false) {
                Ok(mode) => Some(mode),
                Err(_) => {
                    tracing::warn!(word = %word, "ignoring unknown argument");
                    None
                }
            })
            .collect()
    }

    fn run_options(self, path_env: Option<OsString>) -> RunOptions {
        let modes = self.mode_words();
        RunOptions {
            run_setup: self.run_setup || modes.contains(&ModeArg::RunSetup),
            extended_logs: self.logs || modes.contains(&ModeArg::Logs),
            staging_root: self.staging_root,
            workspace_root: self.workspace,
            service_identity: self.service_user,
            path_env,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).map_err(|err| {
        tracing::error!("{:#}", err);
        err
    })
}

fn run(cli: Cli) -> Result<()> {
    let forwarded: Vec<OsString> = std::env::args_os().skip(1).collect();
    let path_env = std::env::var_os("PATH");

    let boundary = SudoBoundary::new(path_env.clone());
    if let Elevation::Delegated { code } = boundary.ensure_elevated(&forwarded)? {
        std::process::exit(code);
    }

    let config = PipelineConfig::from_env(cli.run_options(path_env))?;
    let outcome = run_pipeline(&config, &boundary)?;
    tracing::info!(
        score = outcome.score,
        passed = outcome.passed,
        failed = outcome.failed,
        elapsed_ms = (outcome.finished_at - outcome.started_at).num_milliseconds(),
        "grade recorded: {}",
        outcome.acknowledgment.message
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

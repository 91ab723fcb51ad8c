use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;

pub const CALLBACK_URL_VAR: &str = "CODIO_AUTOGRADE_V2_URL";
pub const DEPRECATED_CALLBACK_URL_VAR: &str = "CODIO_PARTIAL_POINTS_V2_URL";
pub const CONTEXT_VAR: &str = "CODIO_AUTOGRADE_ENV";

/// Variables that carry a callback URL. None of them reach untrusted children.
pub const CALLBACK_SECRET_VARS: [&str; 4] = [
    "CODIO_AUTOGRADE_V2_URL",
    "CODIO_PARTIAL_POINTS_V2_URL",
    "CODIO_AUTOGRADE_URL",
    "CODIO_PARTIAL_POINTS_URL",
];

pub const DEFAULT_STAGING_ROOT: &str = "/autograder";
pub const DEFAULT_WORKSPACE_ROOT: &str = "/home/codio/workspace";
pub const DEFAULT_SERVICE_IDENTITY: &str = "codio";

/// Course and student context supplied by the LMS as a JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContext {
    #[serde(default)]
    pub completed_date: String,
    #[serde(default)]
    pub student: StudentContext,
    #[serde(default)]
    pub course: CourseInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentContext {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub lti: bool,
    #[serde(default)]
    pub assignment: AssignmentWindow,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentWindow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl CourseContext {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            BridgeError::Configuration(format!("{} is not a valid context document: {}", CONTEXT_VAR, e))
        })
    }
}

/// Fixed directory tree owned by one grading attempt.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    pub root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn source(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn results(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn submission(&self) -> PathBuf {
        self.root.join("submission")
    }

    /// Root first, so creating in order never needs parents.
    pub fn directories(&self) -> [PathBuf; 4] {
        [
            self.root.clone(),
            self.source(),
            self.results(),
            self.submission(),
        ]
    }

    pub fn entry_point_source(&self) -> PathBuf {
        self.source().join("run_autograder")
    }

    pub fn entry_point(&self) -> PathBuf {
        self.root.join("run_autograder")
    }

    pub fn setup_script(&self) -> PathBuf {
        self.source().join("setup.sh")
    }

    pub fn results_file(&self) -> PathBuf {
        self.results().join("results.json")
    }

    pub fn capture_file(&self) -> PathBuf {
        self.results().join("stdout")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join("submission_metadata.json")
    }
}

/// The student's workspace and the places the grading bundle may live in it.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
}

impl WorkspaceLayout {
    pub const ARCHIVE_NAME: &'static str = "autograder.zip";

    /// Names skipped at any depth when snapshotting the workspace.
    pub const SNAPSHOT_EXCLUDES: [&'static str; 5] = [
        "autograder.zip",
        "gradescope_wrapper",
        ".guides",
        ".codio",
        ".settings",
    ];

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Public location first, secured fallback second.
    pub fn archive_candidates(&self) -> [PathBuf; 2] {
        let guides = self.root.join(".guides");
        [
            guides.join(Self::ARCHIVE_NAME),
            guides.join("secure").join(Self::ARCHIVE_NAME),
        ]
    }
}

/// Switches taken from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_setup: bool,
    pub extended_logs: bool,
    pub staging_root: PathBuf,
    pub workspace_root: PathBuf,
    pub service_identity: String,
    /// `PATH` captured by the caller; read from the environment when unset.
    pub path_env: Option<OsString>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_setup: false,
            extended_logs: false,
            staging_root: PathBuf::from(DEFAULT_STAGING_ROOT),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            service_identity: DEFAULT_SERVICE_IDENTITY.to_string(),
            path_env: None,
        }
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub callback_url: String,
    pub run_setup: bool,
    pub extended_logs: bool,
    pub context: CourseContext,
    pub staging: StagingLayout,
    pub workspace: WorkspaceLayout,
    pub service_identity: String,
    pub path_env: Option<OsString>,
}

impl PipelineConfig {
    pub fn from_env(options: RunOptions) -> Result<Self> {
        Self::from_lookup(options, |key| std::env::var_os(key))
    }

    pub fn from_lookup<F>(options: RunOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.to_string_lossy().trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let callback_url = match non_empty(CALLBACK_URL_VAR) {
            Some(url) => url,
            None => match non_empty(DEPRECATED_CALLBACK_URL_VAR) {
                Some(url) => {
                    tracing::warn!(
                        "{} is deprecated, set {} instead",
                        DEPRECATED_CALLBACK_URL_VAR,
                        CALLBACK_URL_VAR
                    );
                    url
                }
                None => {
                    return Err(BridgeError::Configuration(
                        "no feedback URL, enable partial points".to_string(),
                    ))
                }
            },
        };
        let raw_context = non_empty(CONTEXT_VAR).ok_or_else(|| {
            BridgeError::Configuration(format!("{} is not set", CONTEXT_VAR))
        })?;
        let context = CourseContext::parse(&raw_context)?;

        Ok(Self {
            callback_url,
            run_setup: options.run_setup,
            extended_logs: options.extended_logs,
            context,
            staging: StagingLayout::new(options.staging_root),
            workspace: WorkspaceLayout::new(options.workspace_root),
            service_identity: options.service_identity,
            path_env: options.path_env.or_else(|| lookup("PATH")),
        })
    }
}

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Every failure is terminal for the run; variants are grouped by the stage
/// that raises them.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // configuration
    #[error("configuration: {0}")]
    Configuration(String),

    // staging
    #[error("autograder.zip not found in {}", format_candidates(.candidates))]
    ArchiveNotFound { candidates: Vec<PathBuf> },
    #[error("archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive entry {name:?} escapes the staging area")]
    UnsafeEntry { name: String },

    // execution
    #[error("{0} is not a regular file")]
    NotRegularFile(PathBuf),
    #[error("failed to elevate privileges: {0}")]
    Elevation(String),
    #[error("unknown service identity {0:?}")]
    UnknownIdentity(String),
    #[error("setup script failed: {0}")]
    SetupFailed(String),
    #[error("run_autograder failed with {code}")]
    GraderFailed { code: i32 },
    #[error("run_autograder terminated by signal {signal}")]
    GraderSignalled { signal: i32 },

    // translation
    #[error("Gradescope results file not found at {0}")]
    ResultsNotFound(PathBuf),
    #[error("malformed results document: {0}")]
    MalformedResults(#[source] serde_json::Error),
    #[error("cannot compute a score: results carry no score and no test has a positive max_score")]
    NoGradableTests,

    // transport
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unreadable callback acknowledgment (HTTP {status}): {body}")]
    BadAcknowledgment { status: u16, body: String },
    #[error("Response {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Io {
            context: context.into(),
            source,
        }
    }
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Attaches a human-readable context to `std::io` failures.
pub(crate) trait IoContext<T> {
    fn with_path(self, what: &str, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, what: &str, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| BridgeError::io(format!("{} {}", what, path.display()), e))
    }
}

//! Runs a Gradescope-style autograder bundle inside a Codio workspace and
//! reports the result back to Codio.
//!
//! Stages, in order: reset `/autograder` and unpack the bundle, optionally
//! run `setup.sh`, snapshot the submission with its metadata, run
//! `run_autograder` as the unprivileged service user, then translate
//! `results.json` into a grade and HTML feedback for the callback.

pub mod callback;
pub mod config;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod pipeline;
pub mod privilege;
pub mod reporter;
pub mod results;
pub mod sandbox;
pub mod stager;

pub use config::{PipelineConfig, RunOptions};
pub use error::{BridgeError, Result};
pub use pipeline::{run_pipeline, PipelineOutcome};
pub use privilege::{DirectBoundary, Elevation, PrivilegeBoundary, SudoBoundary};

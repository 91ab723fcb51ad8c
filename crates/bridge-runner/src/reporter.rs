use crate::config::{CourseContext, WorkspaceLayout};
use crate::error::{BridgeError, IoContext, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

/// Placeholder for fields this integration has no value for.
pub const NOT_IN_USE: &str = "not_in_use";
const TOTAL_POINTS: &str = "100.0";
const METADATA_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionMetadata {
    pub id: String,
    pub created_at: String,
    pub assignment: AssignmentMetadata,
    pub submission_method: String,
    pub users: Vec<SubmissionUser>,
    pub previous_submissions: Vec<PreviousSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentMetadata {
    pub due_date: String,
    pub group_size: u32,
    pub group_submission: bool,
    pub id: String,
    pub course_id: String,
    pub late_due_date: String,
    pub release_date: String,
    pub title: String,
    pub total_points: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionUser {
    pub email: String,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviousSubmission {
    pub submission_time: String,
    pub score: f64,
    pub results: String,
}

/// Maps the LMS context onto the metadata record graders expect. Written
/// before grading, so the score is a fixed placeholder.
pub fn build_metadata(context: &CourseContext) -> SubmissionMetadata {
    let assignment = &context.course.assignment;
    SubmissionMetadata {
        id: NOT_IN_USE.to_string(),
        created_at: context.completed_date.clone(),
        assignment: AssignmentMetadata {
            due_date: String::new(),
            group_size: 0,
            group_submission: false,
            id: assignment.id.clone(),
            course_id: context.course.id.clone(),
            late_due_date: assignment.end.clone(),
            release_date: assignment.start.clone(),
            title: NOT_IN_USE.to_string(),
            total_points: TOTAL_POINTS.to_string(),
        },
        submission_method: "upload".to_string(),
        users: vec![SubmissionUser {
            email: context.student.email.clone(),
            id: context.student.id.clone(),
            name: context.student.full_name.clone(),
        }],
        previous_submissions: Vec::new(),
    }
}

pub fn write_metadata(path: &Path, metadata: &SubmissionMetadata) -> Result<()> {
    tracing::info!("Prepare submission info");
    let bytes = serde_json::to_vec_pretty(metadata)
        .map_err(|e| BridgeError::io("serialising submission metadata", e.into()))?;
    atomic_write_bytes(path, &bytes)?;
    fs::set_permissions(path, Permissions::from_mode(METADATA_MODE))
        .with_path("setting permissions on", path)
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp).with_path("creating", &tmp)?;
    file.write_all(bytes).with_path("writing", &tmp)?;
    file.sync_all().with_path("syncing", &tmp)?;
    fs::rename(&tmp, path).with_path("renaming into", path)
}

/// One-way mirror of the student's workspace into `dst`.
///
/// Entries with an excluded name are skipped at any depth together with
/// everything below them. Symlinks are recreated, never followed. Directory
/// modes are applied once their contents are in place.
pub fn snapshot_workspace(src: &Path, dst: &Path) -> Result<u64> {
    tracing::info!("Prepare submission");
    let excluded = |name: &std::ffi::OsStr| {
        WorkspaceLayout::SNAPSHOT_EXCLUDES
            .iter()
            .any(|ex| name == std::ffi::OsStr::new(ex))
    };
    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !excluded(e.file_name()));

    let mut copied = 0;
    let mut dir_modes = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| BridgeError::io(format!("walking {}", src.display()), e.into()))?;
        let path = entry.path();
        let rel = match path.strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).with_path("creating", &target)?;
            let meta = entry
                .metadata()
                .map_err(|e| BridgeError::io(format!("inspecting {}", path.display()), e.into()))?;
            dir_modes.push((target, meta.permissions()));
        } else if file_type.is_symlink() {
            let link = fs::read_link(path).with_path("reading link", path)?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target).with_path("replacing", &target)?;
            }
            symlink(&link, &target).with_path("linking", &target)?;
            copied += 1;
        } else if file_type.is_file() {
            fs::copy(path, &target).with_path("copying to", &target)?;
            copied += 1;
        }
    }
    // Deepest first, so a read-only parent never blocks a child.
    for (dir, permissions) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, permissions).with_path("setting permissions on", &dir)?;
    }
    Ok(copied)
}

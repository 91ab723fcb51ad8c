use crate::config::{StagingLayout, WorkspaceLayout};
use crate::error::{BridgeError, IoContext, Result};
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const LAYOUT_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Deletes the staging area, logging instead of failing.
pub fn remove_staging(layout: &StagingLayout) {
    match fs::remove_dir_all(&layout.root) {
        Ok(()) => tracing::info!(root = %layout.root.display(), "removed staging area"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(root = %layout.root.display(), "cleanup failed: {}", e),
    }
}

/// Wipes any stale staging area and recreates the fixed layout.
pub fn reset_layout(layout: &StagingLayout) -> Result<()> {
    remove_staging(layout);
    tracing::info!("createPaths");
    let mut builder = DirBuilder::new();
    builder.mode(LAYOUT_MODE);
    for dir in layout.directories() {
        builder.create(&dir).with_path("creating", &dir)?;
        // the umask may have narrowed the requested mode
        fs::set_permissions(&dir, Permissions::from_mode(LAYOUT_MODE))
            .with_path("setting permissions on", &dir)?;
    }
    Ok(())
}

/// First candidate that exists wins.
pub fn locate_archive(workspace: &WorkspaceLayout) -> Result<PathBuf> {
    let candidates = workspace.archive_candidates();
    for candidate in &candidates {
        match fs::symlink_metadata(candidate) {
            Ok(_) => return Ok(candidate.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(BridgeError::io(format!("checking {}", candidate.display()), e)),
        }
    }
    Err(BridgeError::ArchiveNotFound {
        candidates: candidates.to_vec(),
    })
}

/// Extracts every entry of `archive_path` below `destination`, in archive order.
///
/// Works whether or not the archive carries explicit directory entries: each
/// file entry first creates its full path as directories, then swaps the leaf
/// directory for the real file. Returns the number of files written.
pub fn extract_archive(archive_path: &Path, destination: &Path) -> Result<usize> {
    let archive_err = |source| BridgeError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };
    let file = File::open(archive_path).with_path("opening", archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(archive_err)?;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_err)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| BridgeError::UnsafeEntry {
                name: entry.name().to_string(),
            })?;
        let path = destination.join(&relative);

        remove_existing(&path);
        fs::create_dir_all(&path).with_path("creating", &path)?;
        if entry.is_dir() {
            tracing::debug!(entry = %relative.display(), "directory");
            continue;
        }
        fs::remove_dir(&path).with_path("removing placeholder", &path)?;

        let mode = entry
            .unix_mode()
            .map(|m| m & 0o7777)
            .filter(|m| *m != 0)
            .unwrap_or(DEFAULT_FILE_MODE);
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&path)
            .with_path("creating", &path)?;
        io::copy(&mut entry, &mut out).with_path("writing", &path)?;
        fs::set_permissions(&path, Permissions::from_mode(mode))
            .with_path("setting permissions on", &path)?;
        tracing::debug!(entry = %relative.display(), mode = %format!("{:o}", mode), "file");
        written += 1;
    }
    Ok(written)
}

/// Absence is fine; anything else surfaces in the following step.
fn remove_existing(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = result {
        tracing::debug!(path = %path.display(), "left in place: {}", e);
    }
}

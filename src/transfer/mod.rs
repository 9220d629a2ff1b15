//! Size-bounded archive transfer between the local host and a sandbox.
//!
//! Directories move as gzip-compressed tarballs with a single fixed top-level
//! directory named [`ARCHIVE_ROOT`]. Fixing the root is a hard contract: the
//! extraction side never has to search for a payload nested under timestamp
//! directories, it strips exactly one component.
//!
//! Files larger than the configured threshold are excluded before archiving.
//! Every excluded path is logged; exclusion bounds transfer size, it never
//! silently drops awareness of the file.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::TransferError;
use crate::sandbox::{validate_remote_path, RemoteExecutor};

/// Fixed top-level directory name inside every archive.
pub const ARCHIVE_ROOT: &str = "submission";

/// Default per-file size threshold: 10 MB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Archive transfer protocol bound to one remote executor.
pub struct ArchiveTransfer<'a> {
    exec: &'a dyn RemoteExecutor,
    max_file_bytes: u64,
}

impl<'a> ArchiveTransfer<'a> {
    /// Create a transfer protocol with the default size threshold.
    pub fn new(exec: &'a dyn RemoteExecutor) -> Self {
        Self {
            exec,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    /// Set the per-file size threshold in bytes.
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Archive a remote directory and download it to `local_archive`.
    ///
    /// The archive is built at a remote temporary path and downloaded as a
    /// single unit; the local file is written atomically, so a mid-transfer
    /// failure never leaves a partial archive behind.
    pub async fn download_dir(
        &self,
        remote_dir: &str,
        local_archive: &Path,
    ) -> Result<(), TransferError> {
        validate_remote_path(remote_dir)?;

        let token = Uuid::new_v4();
        let exclude_path = format!("/tmp/reprobench-xfer-{token}.exclude");
        let archive_path = format!("/tmp/reprobench-xfer-{token}.tar.gz");

        // Enumerate oversized files. A failing enumeration is non-fatal and
        // falls back to transferring everything.
        let find_cmd = format!(
            "cd '{}' && find . -type f -size +{}c",
            remote_dir, self.max_file_bytes
        );
        let exclude_list = match self.exec.send_shell_command(&find_cmd).await {
            Ok(result) if result.is_success() => {
                let listing = result.output_lossy();
                let paths: Vec<String> = listing
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                for path in &paths {
                    warn!(
                        file = %path.trim_start_matches("./"),
                        threshold_bytes = self.max_file_bytes,
                        "Excluding oversized file from transfer"
                    );
                }
                paths
            }
            Ok(result) => {
                warn!(
                    exit_code = result.exit_code,
                    stderr = %result.stderr,
                    "Oversized-file enumeration failed, transferring everything"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Oversized-file enumeration failed, transferring everything");
                Vec::new()
            }
        };

        let mut exclude_file = exclude_list.join("\n");
        if !exclude_file.is_empty() {
            exclude_file.push('\n');
        }
        self.exec
            .upload(exclude_file.as_bytes(), &exclude_path)
            .await?;

        // Build the archive with the payload pinned under ARCHIVE_ROOT.
        let tar_cmd = format!(
            "tar -czf '{}' --exclude-from='{}' --transform 's,^\\./,{}/,' -C '{}' .",
            archive_path, exclude_path, ARCHIVE_ROOT, remote_dir
        );
        let tar_result = self.exec.send_shell_command(&tar_cmd).await?;
        if !tar_result.is_success() {
            let _ = self.cleanup_remote(&exclude_path, &archive_path).await;
            return Err(TransferError::ArchiveFailed {
                exit_code: tar_result.exit_code,
                stderr: tar_result.stderr,
            });
        }

        let bytes = self.exec.download(&archive_path).await?;
        self.cleanup_remote(&exclude_path, &archive_path).await;

        write_atomically(local_archive, &bytes)?;
        debug!(
            archive = %local_archive.display(),
            bytes = bytes.len(),
            excluded = exclude_list.len(),
            "Downloaded remote directory"
        );
        Ok(())
    }

    /// Pack a local directory and extract it into a remote directory.
    ///
    /// The destination is created non-destructively; extracting into an
    /// already-populated directory is a pure merge.
    pub async fn upload_dir(
        &self,
        local_dir: &Path,
        remote_dir: &str,
    ) -> Result<(), TransferError> {
        validate_remote_path(remote_dir)?;

        let staging = tempfile::tempdir()?;
        let local_archive = staging.path().join("upload.tar.gz");
        pack_dir(local_dir, &local_archive, self.max_file_bytes)?;
        let bytes = std::fs::read(&local_archive)?;

        let token = Uuid::new_v4();
        let archive_path = format!("/tmp/reprobench-xfer-{token}.tar.gz");
        self.exec.upload(&bytes, &archive_path).await?;

        let extract_cmd = format!(
            "mkdir -p '{}' && tar -xzf '{}' -C '{}' --strip-components=1",
            remote_dir, archive_path, remote_dir
        );
        let result = self.exec.send_shell_command(&extract_cmd).await?;
        let rm_cmd = format!("rm -f '{}'", archive_path);
        let _ = self.exec.send_shell_command(&rm_cmd).await;

        if !result.is_success() {
            return Err(TransferError::ExtractionFailed(result.stderr));
        }
        debug!(
            local = %local_dir.display(),
            remote = %remote_dir,
            bytes = bytes.len(),
            "Uploaded directory to sandbox"
        );
        Ok(())
    }

    /// Remove remote temporary files left by a transfer (best-effort).
    async fn cleanup_remote(&self, exclude_path: &str, archive_path: &str) {
        let rm_cmd = format!("rm -f '{}' '{}'", exclude_path, archive_path);
        if let Err(e) = self.exec.send_shell_command(&rm_cmd).await {
            debug!(error = %e, "Failed to remove remote transfer temp files");
        }
    }
}

/// Build a size-filtered tar.gz of `dir` with the fixed [`ARCHIVE_ROOT`] root.
///
/// Returns the relative paths of excluded oversized files.
pub fn pack_dir(
    dir: &Path,
    archive: &Path,
    max_file_bytes: u64,
) -> Result<Vec<String>, TransferError> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut excluded = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| TransferError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?;
        let name = Path::new(ARCHIVE_ROOT).join(rel);

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > max_file_bytes {
                warn!(
                    file = %rel.display(),
                    size_bytes = size,
                    threshold_bytes = max_file_bytes,
                    "Excluding oversized file from archive"
                );
                excluded.push(rel.to_string_lossy().to_string());
                continue;
            }
            builder.append_path_with_name(entry.path(), &name)?;
        }
        // Symlinks and special files are skipped.
    }

    builder.into_inner()?.finish()?;
    Ok(excluded)
}

/// Extract a downloaded archive into `dest_dir`.
///
/// Every entry must live under [`ARCHIVE_ROOT`]; an archive with any other
/// top-level name is rejected. Extraction happens in a staging directory
/// first, so a mid-extraction failure never leaves a partial tree in
/// `dest_dir`. Extracting into an existing directory is a pure merge.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<(), TransferError> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));

    let staging_parent = dest_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&staging_parent)?;
    let staging = tempfile::tempdir_in(&staging_parent)?;

    for entry in tarball.entries()? {
        let mut entry = entry?;
        let path = entry
            .path()
            .map_err(|e| TransferError::ExtractionFailed(e.to_string()))?
            .into_owned();

        let first = path
            .components()
            .find_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            });
        match first {
            Some(root) if root == ARCHIVE_ROOT => {}
            Some(root) => {
                return Err(TransferError::BadArchiveRoot {
                    expected: ARCHIVE_ROOT.to_string(),
                    found: root,
                });
            }
            // Bare "./" entries carry no payload.
            None => continue,
        }

        entry
            .unpack_in(staging.path())
            .map_err(|e| TransferError::ExtractionFailed(e.to_string()))?;
    }

    let payload = staging.path().join(ARCHIVE_ROOT);
    if !payload.exists() {
        return Err(TransferError::ExtractionFailed(format!(
            "archive contained no '{}' directory",
            ARCHIVE_ROOT
        )));
    }
    merge_tree(&payload, dest_dir)?;
    Ok(())
}

/// Write bytes to `path` via a temp file and rename, so readers never observe
/// a half-written file.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), TransferError> {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| TransferError::Io(e.error))?;
    Ok(())
}

/// Move a directory tree into `dst`, merging with any existing contents.
fn merge_tree(src: &Path, dst: &Path) -> Result<(), TransferError> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            merge_tree(&entry.path(), &target)?;
        } else if std::fs::rename(entry.path(), &target).is_err() {
            // Rename fails across filesystems; fall back to a copy.
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_pack_extract_round_trip() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("main.py"), b"print('hi')");
        write_file(&src.path().join("results/metrics.json"), b"{}");
        fs::create_dir_all(src.path().join("empty")).unwrap();

        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("out.tar.gz");
        let excluded = pack_dir(src.path(), &archive, DEFAULT_MAX_FILE_BYTES).unwrap();
        assert!(excluded.is_empty());

        let dest = work.path().join("restored");
        extract_archive(&archive, &dest).unwrap();

        assert_eq!(fs::read(dest.join("main.py")).unwrap(), b"print('hi')");
        assert_eq!(fs::read(dest.join("results/metrics.json")).unwrap(), b"{}");
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn test_pack_excludes_oversized_files() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("small.bin"), &vec![0u8; 1024]);
        write_file(&src.path().join("data/large.bin"), &vec![0u8; 64 * 1024]);

        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("out.tar.gz");
        let excluded = pack_dir(src.path(), &archive, 32 * 1024).unwrap();

        assert_eq!(excluded, vec!["data/large.bin".to_string()]);

        let dest = work.path().join("restored");
        extract_archive(&archive, &dest).unwrap();
        assert!(dest.join("small.bin").exists());
        assert!(!dest.join("data/large.bin").exists());
    }

    #[test]
    fn test_pack_keeps_files_at_threshold() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("exact.bin"), &vec![0u8; 4096]);

        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("out.tar.gz");
        let excluded = pack_dir(src.path(), &archive, 4096).unwrap();

        // Threshold is "larger than", not "at least".
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_extract_rejects_foreign_root() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("a.txt"), b"x");

        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("bad.tar.gz");

        // Build an archive with the wrong top-level directory by hand.
        let file = File::create(&archive).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_path_with_name(src.path().join("a.txt"), "run-20240101/a.txt")
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = work.path().join("restored");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert!(matches!(err, TransferError::BadArchiveRoot { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_extract_merges_into_populated_destination() {
        let src = tempfile::tempdir().unwrap();
        write_file(&src.path().join("new.txt"), b"new");

        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("out.tar.gz");
        pack_dir(src.path(), &archive, DEFAULT_MAX_FILE_BYTES).unwrap();

        let dest = work.path().join("restored");
        write_file(&dest.join("existing.txt"), b"keep");

        extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("existing.txt")).unwrap(), b"keep");
        assert_eq!(fs::read(dest.join("new.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_write_atomically_overwrites() {
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("file.bin");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    Linked,
    Copied,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("output already exists: {}", path.display())]
    DestinationExists { path: PathBuf },
    #[error("commit {operation} failed for {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("copied output {} is {actual} bytes, expected {expected}", path.display())]
    VerifyMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

impl CommitError {
    fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Moves `source` to `destination` without ever replacing an existing file.
///
/// A hard link is the no-clobber primitive: it either creates the destination
/// or fails with `AlreadyExists`, so exactly one of several racing writers wins.
/// When the two paths live on different volumes the bytes are staged next to
/// the destination first, verified, and then linked into place.
pub fn commit_no_clobber(source: &Path, destination: &Path) -> Result<CommitMode, CommitError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CommitError::io("create_parent", parent, e))?;
    }
    let expected = fs::metadata(source)
        .map_err(|e| CommitError::io("stat_source", source, e))?
        .len();

    match fs::hard_link(source, destination) {
        Ok(()) => {
            remove_source(source);
            verify_len(destination, expected)?;
            debug!(output = %destination.display(), "committed output by link");
            Ok(CommitMode::Linked)
        }
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            Err(CommitError::DestinationExists {
                path: destination.to_path_buf(),
            })
        }
        Err(error) => {
            debug!(
                output = %destination.display(),
                error = %error,
                "link commit unavailable; staging a copy"
            );
            copy_then_link(source, destination, expected)?;
            remove_source(source);
            Ok(CommitMode::Copied)
        }
    }
}

pub(crate) fn copy_then_link(
    source: &Path,
    destination: &Path,
    expected: u64,
) -> Result<(), CommitError> {
    let staging = staging_path_for(destination);
    let copy_result = stage_copy(source, staging.as_path(), expected);
    if let Err(error) = copy_result {
        let _ = fs::remove_file(staging.as_path());
        return Err(error);
    }

    let link_result = match fs::hard_link(staging.as_path(), destination) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            Err(CommitError::DestinationExists {
                path: destination.to_path_buf(),
            })
        }
        // Filesystems without hard links: exclusive create, then copy in.
        Err(_) => copy_into_new(staging.as_path(), destination, expected),
    };
    let _ = fs::remove_file(staging.as_path());
    link_result?;
    verify_len(destination, expected)
}

/// Copies into a destination that must not exist yet; `create_new` keeps the
/// no-clobber guarantee on filesystems that cannot link.
pub(crate) fn copy_into_new(
    source: &Path,
    destination: &Path,
    expected: u64,
) -> Result<(), CommitError> {
    let mut writer = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
    {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            return Err(CommitError::DestinationExists {
                path: destination.to_path_buf(),
            })
        }
        Err(error) => return Err(CommitError::io("create_destination", destination, error)),
    };
    let written = File::open(source)
        .map_err(|e| CommitError::io("open_staging", source, e))
        .and_then(|mut reader| {
            io::copy(&mut reader, &mut writer).map_err(|e| CommitError::io("copy", destination, e))
        })
        .and_then(|_| {
            writer
                .sync_all()
                .map_err(|e| CommitError::io("sync_destination", destination, e))
        })
        .and_then(|()| verify_len(destination, expected));
    if written.is_err() {
        // The file was created above, so it is ours to remove.
        let _ = fs::remove_file(destination);
    }
    written
}

fn stage_copy(source: &Path, staging: &Path, expected: u64) -> Result<(), CommitError> {
    let mut reader = File::open(source).map_err(|e| CommitError::io("open_source", source, e))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .map_err(|e| CommitError::io("create_staging", staging, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| CommitError::io("copy", staging, e))?;
    writer
        .sync_all()
        .map_err(|e| CommitError::io("sync_staging", staging, e))?;
    verify_len(staging, expected)
}

fn staging_path_for(destination: &Path) -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let name = destination
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("output"));
    destination.with_file_name(format!(".{name}.{}-{nanos}.partial", std::process::id()))
}

fn verify_len(path: &Path, expected: u64) -> Result<(), CommitError> {
    let actual = fs::metadata(path)
        .map_err(|e| CommitError::io("verify", path, e))?
        .len();
    if actual != expected {
        return Err(CommitError::VerifyMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn remove_source(source: &Path) {
    if let Err(error) = fs::remove_file(source) {
        if error.kind() != ErrorKind::NotFound {
            warn!(
                path = %source.display(),
                error = %error,
                "could not remove committed temp artifact"
            );
        }
    }
}

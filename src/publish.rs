//! Publisher
//!
//! Writes rendered content to its destination safely and idempotently:
//! digest comparison to skip unchanged output, a staging file in the
//! destination directory, an optional validation command against the staging
//! file, an atomic rename commit, and an optional notification command after
//! the commit. Hook commands run synchronously through `/bin/sh -c` with no
//! enforced timeout; callers needing one must enforce it externally.

use crate::config::TemplateJob;
use crate::error::PublishError;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Token in a check command that is replaced by the staging file path.
const STAGING_PLACEHOLDER: &str = "{{staging}}";

// Rename failures with these OS codes mean source and destination live on
// different mounts; the non-atomic copy fallback applies.
const EBUSY: i32 = 16;
const EXDEV: i32 = 18;

/// What a publish attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Destination was updated and hooks ran.
    Published,
    /// Destination already held identical content; nothing was written and
    /// no hooks ran.
    Skipped,
    /// No destination configured; content went to standard output.
    Stdout,
}

/// Publish rendered content according to the job's destination and hooks.
pub fn publish(content: &[u8], job: &TemplateJob) -> Result<Outcome, PublishError> {
    let Some(dest) = job.dest.as_deref() else {
        debug!("No destination specified, writing to stdout");
        let mut stdout = io::stdout();
        stdout.write_all(content)?;
        stdout.flush()?;
        return Ok(Outcome::Stdout);
    };

    if same_content(content, dest)? {
        debug!(dest = %dest.display(), "Destination is up to date");
        return Ok(Outcome::Skipped);
    }

    let staging = create_staging_file(content, dest)?;
    debug!(staging = %staging.path().display(), "Created staging file");

    if let Some(check) = job.check_cmd.as_deref() {
        let command = check.replace(STAGING_PLACEHOLDER, &staging.path().to_string_lossy());
        debug!(%command, "Running check command");
        let output = run_command(&command)?;
        if !output.status.success() {
            log_command_output(&command, &output);
            // staging is removed on drop, destination stays untouched
            return Err(PublishError::CheckFailed {
                command,
                status: output.status.to_string(),
            });
        }
    }

    commit_staging(staging, dest)?;
    info!(dest = %dest.display(), "Destination file updated");

    if let Some(notify) = job.notify_cmd.as_deref() {
        info!(command = %notify, "Executing notify command");
        match run_command(notify) {
            Ok(output) if output.status.success() => {
                if job.notify_output {
                    log_command_output(notify, &output);
                }
            }
            Ok(output) => {
                // The destination is already committed; a failing notify is
                // reported but never rolled back.
                warn!(command = %notify, status = %output.status, "Notify command failed");
                log_command_output(notify, &output);
            }
            Err(e) => {
                warn!(command = %notify, "Could not run notify command: {}", e);
            }
        }
    }

    Ok(Outcome::Published)
}

/// Compare the content digest against the current destination file. A missing
/// destination counts as a mismatch.
fn same_content(content: &[u8], dest: &Path) -> Result<bool, PublishError> {
    let dest_digest = match fs::read(dest) {
        Ok(bytes) => hex::encode(blake3::hash(&bytes).as_bytes()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let content_digest = hex::encode(blake3::hash(content).as_bytes());
    debug!(content = %content_digest, file = %dest_digest, "Comparing digests");

    Ok(dest_digest == content_digest)
}

/// Create a staging file next to the destination (same directory guarantees
/// the same filesystem for the rename) and copy the destination's permission
/// bits and owner onto it when the destination already exists.
fn create_staging_file(content: &[u8], dest: &Path) -> Result<NamedTempFile, PublishError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let base = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dest".to_string());

    let staging_error = |source: io::Error| PublishError::Staging {
        dest: dest.to_path_buf(),
        source,
    };

    let mut staging = tempfile::Builder::new()
        .prefix(&format!(".{}-", base))
        .tempfile_in(dir)
        .map_err(staging_error)?;

    staging.write_all(content).map_err(staging_error)?;
    staging.flush().map_err(staging_error)?;

    if let Ok(meta) = fs::metadata(dest) {
        debug!("Copying file permissions and owner from destination");
        fs::set_permissions(staging.path(), meta.permissions()).map_err(staging_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            std::os::unix::fs::chown(staging.path(), Some(meta.uid()), Some(meta.gid()))
                .map_err(staging_error)?;
        }
    }

    Ok(staging)
}

/// Atomically rename the staging file onto the destination, falling back to a
/// copy when they live on different mounts.
fn commit_staging(staging: NamedTempFile, dest: &Path) -> Result<(), PublishError> {
    match staging.persist(dest) {
        Ok(_) => Ok(()),
        Err(persist) if is_cross_device(&persist.error) => {
            debug!(
                "Rename to {} failed ({}), falling back to copy",
                dest.display(),
                persist.error
            );
            copy_staging_to_destination(persist.file, dest)
        }
        Err(persist) => Err(PublishError::Io(persist.error)),
    }
}

/// Best-effort fallback for cross-mount destinations. Not atomic: the
/// destination is rewritten in place with the staging file's content, mode
/// and owner.
fn copy_staging_to_destination(staging: NamedTempFile, dest: &Path) -> Result<(), PublishError> {
    let content = fs::read(staging.path())?;
    let meta = fs::metadata(staging.path())?;

    fs::write(dest, content)?;
    fs::set_permissions(dest, meta.permissions())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        std::os::unix::fs::chown(dest, Some(meta.uid()), Some(meta.gid()))?;
    }

    Ok(())
}

fn is_cross_device(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(EBUSY) | Some(EXDEV))
}

pub(crate) fn run_command(command: &str) -> Result<Output, PublishError> {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| PublishError::Hook {
            command: command.to_string(),
            source: e,
        })
}

/// Log a hook command's combined output line by line.
pub(crate) fn log_command_output(command: &str, output: &Output) {
    let combined = [&output.stdout[..], &output.stderr[..]].concat();
    for line in String::from_utf8_lossy(&combined).lines() {
        if !line.is_empty() {
            info!("[{}]: {}", command, line);
        }
    }
}

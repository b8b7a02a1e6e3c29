//! Clip upload.
//!
//! `sync_dir` pushes every clip in a directory through an `Uploader`, retrying
//! each file a bounded number of times. Each upload appends a
//! `name<TAB>size<TAB>mtime-ns` line to a `.uploaded` ledger in the same
//! directory. Later syncs skip a file only while all three still match, so a
//! clip the recorder has since replaced is uploaded again.
//!
//! Nothing in the capture path depends on this module.

#[cfg(feature = "upload-http")]
pub mod http;

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[cfg(feature = "upload-http")]
pub use http::{HttpBlobConfig, HttpBlobUploader};

/// Name of the ledger file kept in each synced directory.
pub const LEDGER_FILE: &str = ".uploaded";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Remote store for finished clips.
pub trait Uploader {
    /// Upload one file. Returns where it landed.
    fn upload(&self, path: &Path) -> Result<String>;
}

impl<U: Uploader + ?Sized> Uploader for &U {
    fn upload(&self, path: &Path) -> Result<String> {
        (**self).upload(path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        path: PathBuf,
        location: String,
        attempts: u32,
    },
    /// Listed in the ledger by an earlier sync.
    AlreadyUploaded { path: PathBuf },
    Failed {
        path: PathBuf,
        attempts: u32,
        error: String,
    },
}

impl UploadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Uploaded { path, .. }
            | Self::AlreadyUploaded { path }
            | Self::Failed { path, .. } => path,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<UploadOutcome>,
}

impl SyncReport {
    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::Uploaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UploadOutcome::AlreadyUploaded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(UploadOutcome::is_failure)
    }

    fn count(&self, pred: impl Fn(&UploadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Upload every `*.{extension}` file in `dir` not already in the ledger.
///
/// Each file gets up to `max_attempts` tries. A file that exhausts them is
/// reported as failed and the sync moves on to the next one. Errors are only
/// returned when the directory or the ledger cannot be read or written.
pub fn sync_dir(
    dir: &Path,
    extension: &str,
    uploader: &dyn Uploader,
    max_attempts: u32,
) -> Result<SyncReport> {
    if max_attempts == 0 {
        return Err(anyhow!("max_attempts must be at least 1"));
    }
    let extension = extension.trim_start_matches('.');
    let done = read_ledger(dir)?;
    let files = list_clips(dir, extension)?;
    log::info!(
        "syncing {} {} file(s) from {} ({} already uploaded)",
        files.len(),
        extension,
        dir.display(),
        done.len()
    );

    let mut report = SyncReport::default();
    for path in files {
        let entry = ledger_entry(&path)?;
        if done.contains(&entry) {
            report.outcomes.push(UploadOutcome::AlreadyUploaded { path });
            continue;
        }

        let outcome = upload_with_retry(uploader, &path, max_attempts);
        if let UploadOutcome::Uploaded { .. } = outcome {
            append_ledger(dir, &entry)?;
        }
        report.outcomes.push(outcome);
    }
    Ok(report)
}

fn upload_with_retry(uploader: &dyn Uploader, path: &Path, max_attempts: u32) -> UploadOutcome {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match uploader.upload(path) {
            Ok(location) => {
                log::info!("uploaded {} to {}", path.display(), location);
                return UploadOutcome::Uploaded {
                    path: path.to_path_buf(),
                    location,
                    attempts: attempt,
                };
            }
            Err(err) => {
                log::warn!(
                    "upload of {} failed (attempt {}/{}): {:#}",
                    path.display(),
                    attempt,
                    max_attempts,
                    err
                );
                last_error = format!("{:#}", err);
            }
        }
    }
    UploadOutcome::Failed {
        path: path.to_path_buf(),
        attempts: max_attempts,
        error: last_error,
    }
}

fn list_clips(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_ledger(dir: &Path) -> Result<HashSet<String>> {
    let path = dir.join(LEDGER_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(raw
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn append_ledger(dir: &Path, entry: &str) -> Result<()> {
    let path = dir.join(LEDGER_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{}", entry).with_context(|| format!("failed to append to {}", path.display()))?;
    file.sync_all()?;
    Ok(())
}

/// Ledger line identifying this version of the file at `path`.
fn ledger_entry(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("clip path {} has no usable file name", path.display()))?;
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    let modified_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    Ok(format!("{}\t{}\t{}", name, meta.len(), modified_ns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recording {
        seen: RefCell<Vec<PathBuf>>,
    }

    impl Uploader for Recording {
        fn upload(&self, path: &Path) -> Result<String> {
            self.seen.borrow_mut().push(path.to_path_buf());
            Ok(format!("mem://{}", path.display()))
        }
    }

    #[test]
    fn only_matching_extension_is_uploaded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("recording_1.mjpeg"), b"a")?;
        std::fs::write(dir.path().join("recording_2.MJPEG"), b"b")?;
        std::fs::write(dir.path().join("notes.txt"), b"c")?;
        std::fs::create_dir(dir.path().join("nested.mjpeg"))?;

        let uploader = Recording {
            seen: RefCell::new(Vec::new()),
        };
        let report = sync_dir(dir.path(), ".mjpeg", &uploader, 3)?;

        assert_eq!(report.uploaded(), 2);
        let seen = uploader.seen.borrow();
        assert_eq!(seen[0].file_name().unwrap(), "recording_1.mjpeg");
        assert_eq!(seen[1].file_name().unwrap(), "recording_2.MJPEG");
        Ok(())
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = Recording {
            seen: RefCell::new(Vec::new()),
        };
        assert!(sync_dir(dir.path(), "mjpeg", &uploader, 0).is_err());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = Recording {
            seen: RefCell::new(Vec::new()),
        };
        assert!(sync_dir(&dir.path().join("absent"), "mjpeg", &uploader, 3).is_err());
    }
}

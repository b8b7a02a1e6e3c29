use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use trigger_recorder::upload::{sync_dir, UploadOutcome, Uploader, LEDGER_FILE};

/// Fails each file a configured number of times before accepting it.
struct FlakyUploader {
    failures_before_success: HashMap<String, u32>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FlakyUploader {
    fn new(failures: &[(&str, u32)]) -> Self {
        Self {
            failures_before_success: failures
                .iter()
                .map(|(name, n)| (name.to_string(), *n))
                .collect(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts_for(&self, name: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl Uploader for FlakyUploader {
    fn upload(&self, path: &Path) -> Result<String> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts.entry(name.clone()).or_insert(0);
        *attempt += 1;
        let failures = self.failures_before_success.get(&name).copied().unwrap_or(0);
        if *attempt <= failures {
            return Err(anyhow!("connection reset uploading {}", name));
        }
        Ok(format!("https://blobs.test/recordings/{}", name))
    }
}

fn clip_dir(names: &[&str]) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    for name in names {
        std::fs::write(dir.path().join(name), b"\xFF\xD8clip\xFF\xD9")?;
    }
    Ok(dir)
}

fn outcome_for<'a>(outcomes: &'a [UploadOutcome], name: &str) -> &'a UploadOutcome {
    outcomes
        .iter()
        .find(|o| o.path().file_name().unwrap() == name)
        .expect("outcome for file")
}

#[test]
fn retries_each_file_up_to_the_limit() -> Result<()> {
    let dir = clip_dir(&["recording_1.mjpeg", "recording_2.mjpeg", "recording_3.mjpeg"])?;
    let uploader = FlakyUploader::new(&[("recording_1.mjpeg", 2), ("recording_2.mjpeg", 5)]);

    let report = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.uploaded(), 2);
    assert_eq!(report.failed(), 1);

    match outcome_for(&report.outcomes, "recording_1.mjpeg") {
        UploadOutcome::Uploaded { attempts, location, .. } => {
            assert_eq!(*attempts, 3);
            assert!(location.ends_with("/recording_1.mjpeg"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    match outcome_for(&report.outcomes, "recording_2.mjpeg") {
        UploadOutcome::Failed { attempts, error, .. } => {
            assert_eq!(*attempts, 3);
            assert!(error.contains("connection reset"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    // A failing file does not stop the ones after it.
    assert!(matches!(
        outcome_for(&report.outcomes, "recording_3.mjpeg"),
        UploadOutcome::Uploaded { attempts: 1, .. }
    ));
    assert_eq!(uploader.attempts_for("recording_2.mjpeg"), 3);
    Ok(())
}

#[test]
fn ledger_skips_uploaded_files_on_later_syncs() -> Result<()> {
    let dir = clip_dir(&["recording_1.mjpeg", "recording_2.mjpeg"])?;
    let uploader = FlakyUploader::new(&[("recording_2.mjpeg", 3)]);

    let first = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;
    assert_eq!(first.uploaded(), 1);
    assert_eq!(first.failed(), 1);

    let ledger = std::fs::read_to_string(dir.path().join(LEDGER_FILE))?;
    let entries: Vec<&str> = ledger.lines().collect();
    assert_eq!(entries.len(), 1);
    let fields: Vec<&str> = entries[0].split('\t').collect();
    assert_eq!(fields[0], "recording_1.mjpeg");
    assert_eq!(fields[1], "8");

    std::fs::write(dir.path().join("recording_3.mjpeg"), b"clip")?;
    let second = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;

    assert_eq!(second.skipped(), 1);
    assert_eq!(second.uploaded(), 2);
    assert_eq!(second.failed(), 0);
    assert_eq!(uploader.attempts_for("recording_1.mjpeg"), 1);
    assert_eq!(uploader.attempts_for("recording_2.mjpeg"), 4);

    let third = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;
    assert_eq!(third.skipped(), 3);
    assert_eq!(third.uploaded(), 0);
    Ok(())
}

#[test]
fn empty_directory_syncs_nothing() -> Result<()> {
    let dir = clip_dir(&[])?;
    let uploader = FlakyUploader::new(&[]);

    let report = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;

    assert!(report.outcomes.is_empty());
    assert!(!PathBuf::from(dir.path()).join(LEDGER_FILE).exists());
    Ok(())
}

#[test]
fn replaced_clip_is_uploaded_again() -> Result<()> {
    let dir = clip_dir(&["recording_1.mjpeg"])?;
    let uploader = FlakyUploader::new(&[]);

    let first = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;
    assert_eq!(first.uploaded(), 1);

    // A restarted recorder writes a new clip under the same name.
    std::fs::write(dir.path().join("recording_1.mjpeg"), b"\xFF\xD8a longer clip\xFF\xD9")?;
    let second = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;

    assert_eq!(second.uploaded(), 1);
    assert_eq!(second.skipped(), 0);
    assert_eq!(uploader.attempts_for("recording_1.mjpeg"), 2);

    let third = sync_dir(dir.path(), "mjpeg", &uploader, 3)?;
    assert_eq!(third.skipped(), 1);
    Ok(())
}

//! clip_sync - upload finished clips to blob storage.
//!
//! Every clip in the directory that is not yet in its `.uploaded` ledger is PUT
//! to the container, with a bounded number of attempts per file.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use trigger_recorder::upload::{
    sync_dir, HttpBlobConfig, HttpBlobUploader, UploadOutcome, DEFAULT_MAX_ATTEMPTS,
};

#[derive(Parser, Debug)]
#[command(name = "clip_sync", about = "Upload recorded clips to a blob container")]
struct Args {
    /// Directory holding the clips
    #[arg(long, default_value = "recordings", value_name = "PATH")]
    dir: PathBuf,

    /// Clip file extension
    #[arg(long, default_value = "mjpeg")]
    extension: String,

    /// Container URL, e.g. https://account.blob.core.windows.net/recordings
    #[arg(long, env = "CLIP_SYNC_CONTAINER_URL", value_name = "URL")]
    container_url: String,

    /// Shared access signature appended to each request
    #[arg(long, env = "CLIP_SYNC_SAS_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    sas_token: Option<String>,

    /// Attempts per file before giving up on it
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let uploader = HttpBlobUploader::new(HttpBlobConfig {
        container_url: args.container_url.clone(),
        sas_token: args.sas_token.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
        ..HttpBlobConfig::default()
    })?;

    println!("clip_sync: {} -> {}", args.dir.display(), args.container_url);
    let report = sync_dir(&args.dir, &args.extension, &uploader, args.max_attempts)?;

    for outcome in &report.outcomes {
        match outcome {
            UploadOutcome::Uploaded {
                path,
                location,
                attempts,
            } => println!("  uploaded {} -> {} ({} attempt(s))", path.display(), location, attempts),
            UploadOutcome::AlreadyUploaded { path } => {
                println!("  skipped  {} (already uploaded)", path.display())
            }
            UploadOutcome::Failed {
                path,
                attempts,
                error,
            } => println!("  FAILED   {} after {} attempt(s): {}", path.display(), attempts, error),
        }
    }
    println!();
    println!(
        "uploaded={} skipped={} failed={}",
        report.uploaded(),
        report.skipped(),
        report.failed()
    );

    if report.failed() > 0 {
        return Err(anyhow!("{} clip(s) failed to upload", report.failed()));
    }
    Ok(())
}

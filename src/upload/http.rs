//! Blob-store uploader over plain HTTP.
//!
//! Each clip is PUT as a block blob named `<unix-seconds>-<random hex>.<ext>`
//! under the container URL. A shared access signature, when given, is appended
//! as the query string.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use super::Uploader;

#[derive(Clone, Debug)]
pub struct HttpBlobConfig {
    /// Container URL, e.g. `https://account.blob.core.windows.net/recordings`.
    pub container_url: String,
    /// Shared access signature query, with or without a leading `?`.
    pub sas_token: Option<String>,
    pub content_type: String,
    pub timeout: Duration,
}

impl Default for HttpBlobConfig {
    fn default() -> Self {
        Self {
            container_url: String::new(),
            sas_token: None,
            content_type: "video/x-motion-jpeg".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct HttpBlobUploader {
    container: Url,
    sas_token: Option<String>,
    content_type: String,
    agent: ureq::Agent,
}

impl HttpBlobUploader {
    pub fn new(config: HttpBlobConfig) -> Result<Self> {
        let container = Url::parse(&config.container_url).context("parse container url")?;
        if container.cannot_be_a_base() {
            return Err(anyhow!(
                "container url {} cannot hold blob paths",
                config.container_url
            ));
        }
        match container.scheme() {
            "http" | "https" => {}
            other => return Err(anyhow!("unsupported container url scheme '{}'", other)),
        }
        let sas_token = config
            .sas_token
            .map(|token| token.trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            container,
            sas_token,
            content_type: config.content_type,
            agent,
        })
    }

    /// URL a blob with this name would be written to, signature included.
    pub fn blob_url(&self, blob_name: &str) -> Result<Url> {
        let mut url = self.container.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("container url cannot hold blob paths"))?
            .pop_if_empty()
            .push(blob_name);
        url.set_query(self.sas_token.as_deref());
        Ok(url)
    }
}

impl Uploader for HttpBlobUploader {
    fn upload(&self, path: &Path) -> Result<String> {
        let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin");
        let url = self.blob_url(&blob_name(extension)?)?;

        self.agent
            .put(url.as_str())
            .set("x-ms-blob-type", "BlockBlob")
            .set("Content-Type", &self.content_type)
            .send_bytes(&data)
            .with_context(|| format!("put {}", path.display()))?;

        let mut location = url;
        location.set_query(None);
        Ok(location.to_string())
    }
}

fn blob_name(extension: &str) -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_secs();
    let suffix: [u8; 8] = rand::random();
    Ok(format!("{}-{}.{}", secs, hex::encode(suffix), extension))
}

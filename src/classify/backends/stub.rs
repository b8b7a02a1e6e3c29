use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::backend::Classifier;
use crate::frame::Frame;

/// Stub classifier for testing and dry runs.
///
/// Every `period`-th call reports `target`. Other calls hash the pixels into a
/// label that is never `target`, so runs are repeatable for a given source.
pub struct StubClassifier {
    target: usize,
    period: u64,
    num_labels: usize,
    calls: u64,
}

impl StubClassifier {
    pub fn new(target: usize, period: u64, num_labels: usize) -> Result<Self> {
        if period == 0 {
            return Err(anyhow!("stub classifier period must be at least 1"));
        }
        if num_labels < 2 || target >= num_labels {
            return Err(anyhow!(
                "stub classifier needs target {} inside {} labels",
                target,
                num_labels
            ));
        }
        Ok(Self {
            target,
            period,
            num_labels,
            calls: 0,
        })
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, frame: &Frame) -> Result<usize> {
        if frame.is_empty() {
            return Err(anyhow!("cannot classify an empty frame"));
        }
        self.calls += 1;
        if self.calls % self.period == 0 {
            return Ok(self.target);
        }

        let digest = Sha256::digest(frame.pixels());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        let label = (u64::from_le_bytes(word) % self.num_labels as u64) as usize;
        if label == self.target {
            Ok((label + 1) % self.num_labels)
        } else {
            Ok(label)
        }
    }
}

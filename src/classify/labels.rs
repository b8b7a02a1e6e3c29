use anyhow::{Context, Result};
use std::path::Path;

/// Label descriptions, one per line, indexed by classifier output.
#[derive(Clone, Debug, Default)]
pub struct Labels {
    lines: Vec<String>,
}

impl Labels {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            lines: raw.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    /// Description for logs; falls back to the bare index.
    pub fn describe(&self, index: usize) -> String {
        match self.get(index) {
            Some(name) if !name.is_empty() => format!("{} ({})", name, index),
            _ => format!("label {}", index),
        }
    }
}

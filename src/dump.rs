//! Best-effort dump of rewritten units
//!
//! Each unit lands at `<root>/<internal/name>.unit`, mirroring its namespace.
//! Failures are logged and otherwise ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory under the user's home used when no root is given
pub const DEFAULT_DUMP_DIR: &str = "exembellish-units";

const UNIT_EXTENSION: &str = "unit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugDump {
    root: PathBuf,
}

impl DebugDump {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/exembellish-units`, or `None` when no home directory is known
    pub fn in_home() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(DEFAULT_DUMP_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path for a unit; empty and `..` segments are dropped
    pub fn path_for(&self, unit_name: &str) -> PathBuf {
        let mut path = self.root.clone();
        let segments: Vec<&str> = unit_name
            .split(['/', '.'])
            .filter(|s| !s.is_empty() && *s != "..")
            .collect();
        for segment in &segments {
            path.push(segment);
        }
        if segments.is_empty() {
            path.push("_");
        }
        path.set_extension(UNIT_EXTENSION);
        path
    }

    pub fn try_write(&self, unit_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(unit_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Write and log; never fails
    pub fn write(&self, unit_name: &str, bytes: &[u8]) -> Option<PathBuf> {
        match self.try_write(unit_name, bytes) {
            Ok(path) => {
                tracing::debug!("dumped {} to {}", unit_name, path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("failed to dump {}: {}", unit_name, e);
                None
            }
        }
    }
}

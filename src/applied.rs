//! The configuration last written to the workload
use std::io::Write;
use std::path::{Path, PathBuf};

use ex::fs::{create_dir_all, read};
use serde_yaml::from_slice;
use tempfile::NamedTempFile;

use crate::aggregate::DesiredConfig;
use crate::error::CharmError;
use crate::paths;

/// Durable storage for the applied configuration; the reconciler is its only writer
pub trait AppliedStore {
    fn load(&self) -> Result<Option<DesiredConfig>, CharmError>;

    /// Replaces the record; the new record is durable once this returns
    fn store(&mut self, applied: &DesiredConfig) -> Result<(), CharmError>;
}

/// Keeps the record as a YAML file in the unit's state directory
#[derive(Debug, Clone)]
pub struct FileAppliedStore {
    path: PathBuf,
}

impl FileAppliedStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The store at its usual location
    pub fn in_state_dir() -> Self {
        Self::new(paths::unit_state_dir().join("applied.yaml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AppliedStore for FileAppliedStore {
    fn load(&self) -> Result<Option<DesiredConfig>, CharmError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(from_slice(&read(&self.path)?)?))
    }

    fn store(&mut self, applied: &DesiredConfig) -> Result<(), CharmError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(serde_yaml::to_string(applied)?.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;

        Ok(())
    }
}

/// Keeps the record in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAppliedStore {
    pub record: Option<DesiredConfig>,

    /// Number of times the record was replaced
    pub writes: usize,
}

impl AppliedStore for MemoryAppliedStore {
    fn load(&self) -> Result<Option<DesiredConfig>, CharmError> {
        Ok(self.record.clone())
    }

    fn store(&mut self, applied: &DesiredConfig) -> Result<(), CharmError> {
        self.record = Some(applied.clone());
        self.writes += 1;
        Ok(())
    }
}

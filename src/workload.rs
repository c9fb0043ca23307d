//! Access to the NMS container
//!
//! Files are reached through the storage the container shares with the charm, so the
//! container paths are mapped onto the charm-side mount of the same storage. Services are
//! driven through the `pebble` CLI against the container's socket.
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

use ex::fs::{create_dir_all, read, remove_file};
use serde_yaml::from_slice;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cmd::get_output_with_env;
use crate::definition::CharmDefinition;
use crate::error::CharmError;
use crate::paths;
use crate::pebble::Layer;

/// Operations the reconciler performs on the workload
pub trait Workload {
    /// Returns true if the container's Pebble answers
    fn can_connect(&self) -> bool;

    /// Returns true if every storage mounted into the container is attached
    fn storage_attached(&self) -> bool;

    fn exists(&self, path: &str) -> Result<bool, CharmError>;

    /// Reads a file, returning `None` if it doesn't exist
    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, CharmError>;

    /// Writes a file, replacing any previous content
    ///
    /// Once this returns, the content is durable.
    fn push(&mut self, path: &str, content: &[u8]) -> Result<(), CharmError>;

    /// Removes a file; removing a missing file is not an error
    fn remove(&mut self, path: &str) -> Result<(), CharmError>;

    /// The combined plan of every layer
    fn plan(&self) -> Result<Layer, CharmError>;

    /// Combines `layer` into the plan under `label` and replans
    fn add_layer(&mut self, label: &str, layer: &Layer) -> Result<(), CharmError>;

    fn restart(&mut self, service: &str) -> Result<(), CharmError>;

    fn is_running(&self, service: &str) -> Result<bool, CharmError>;
}

/// `Workload` backed by shared storage and the Pebble CLI
#[derive(Debug, Clone)]
pub struct MountedWorkload {
    container: String,

    /// Container location of each mount, and where the charm sees it
    mounts: Vec<(String, PathBuf)>,

    socket: PathBuf,
}

impl MountedWorkload {
    /// Builds the adapter for `container` as declared in metadata.yaml
    pub fn new(definition: &CharmDefinition, container: &str) -> Result<Self, CharmError> {
        let declared = definition.container(container).ok_or_else(|| {
            CharmError::WorkloadUnavailable(format!("Container `{}` is not declared", container))
        })?;

        let mounts = declared
            .mounts
            .iter()
            .map(|m| (m.location.clone(), paths::storage_dir(&m.storage)))
            .collect();

        Ok(Self {
            container: container.into(),
            mounts,
            socket: paths::pebble_socket(container),
        })
    }

    /// Where the charm sees the container path `path`
    fn host_path(&self, path: &str) -> Result<PathBuf, CharmError> {
        self.mounts
            .iter()
            .filter_map(|(location, host)| {
                let location = location.trim_end_matches('/');
                Path::new(path)
                    .strip_prefix(location)
                    .ok()
                    .map(|rel| (location.len(), host.join(rel)))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, host)| host)
            .ok_or_else(|| {
                CharmError::WorkloadUnavailable(format!(
                    "`{}` is not on any storage mounted into `{}`",
                    path, self.container
                ))
            })
    }

    fn pebble<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Vec<u8>, CharmError> {
        get_output_with_env(
            "pebble",
            args,
            &[("PEBBLE_SOCKET", self.socket.as_os_str())],
        )
    }
}

/// Reads the `Current` column for `service` out of `pebble services` output
fn service_state<'a>(output: &'a str, service: &str) -> Option<&'a str> {
    output
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|cols| cols.first() == Some(&service))
        .and_then(|cols| cols.get(2).cloned())
}

impl Workload for MountedWorkload {
    fn can_connect(&self) -> bool {
        self.socket.exists() && self.pebble(&["plan"]).is_ok()
    }

    fn storage_attached(&self) -> bool {
        self.mounts.iter().all(|(_, host)| host.is_dir())
    }

    fn exists(&self, path: &str) -> Result<bool, CharmError> {
        Ok(self.host_path(path)?.exists())
    }

    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, CharmError> {
        let host = self.host_path(path)?;
        if !host.exists() {
            return Ok(None);
        }
        Ok(Some(read(host)?))
    }

    fn push(&mut self, path: &str, content: &[u8]) -> Result<(), CharmError> {
        let host = self.host_path(path)?;
        let dir = host
            .parent()
            .ok_or_else(|| CharmError::WorkloadUnavailable(format!("`{}` has no parent", path)))?;
        create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(content)?;
        file.as_file().sync_all()?;
        file.persist(&host).map_err(|err| err.error)?;

        debug!(path, "Pushed file to workload");
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), CharmError> {
        let host = self.host_path(path)?;
        if host.exists() {
            remove_file(host)?;
            info!(path, "Removed file from workload");
        }
        Ok(())
    }

    fn plan(&self) -> Result<Layer, CharmError> {
        let output = self.pebble(&["plan"])?;
        if output.iter().all(u8::is_ascii_whitespace) {
            return Ok(Layer::default());
        }
        Ok(from_slice(&output)?)
    }

    fn add_layer(&mut self, label: &str, layer: &Layer) -> Result<(), CharmError> {
        let mut file = NamedTempFile::new()?;
        file.write_all(serde_yaml::to_string(layer)?.as_bytes())?;
        file.flush()?;

        self.pebble(&[
            OsStr::new("add"),
            OsStr::new("--combine"),
            OsStr::new(label),
            file.path().as_os_str(),
        ])?;
        self.pebble(&["replan"])?;

        info!(container = %self.container, label, "Added layer and replanned");
        Ok(())
    }

    fn restart(&mut self, service: &str) -> Result<(), CharmError> {
        self.pebble(&["restart", service])?;
        info!(container = %self.container, service, "Restarted service");
        Ok(())
    }

    fn is_running(&self, service: &str) -> Result<bool, CharmError> {
        let output = self.pebble(&["services", service])?;
        let output = String::from_utf8_lossy(&output);
        Ok(service_state(&output, service) == Some("active"))
    }
}

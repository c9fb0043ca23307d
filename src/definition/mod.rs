//! The charm's own definition: metadata.yaml and config.yaml
pub mod config;
pub mod container;
pub mod metadata;
pub mod relation;
pub mod storage;

pub use config::{Config, ConfigOption};
pub use container::{Container, ContainerMount};
pub use metadata::{Metadata, Resource};
pub use relation::{Endpoint, RelationScope, Role};
pub use storage::Storage;

use std::path::{Path, PathBuf};

use ex::fs::read;
use serde_yaml::from_slice;

use crate::error::CharmError;

/// A charm, as represented by its unpacked directory
#[derive(Debug, Clone, PartialEq)]
pub struct CharmDefinition {
    /// The directory the definition was loaded from
    source: PathBuf,

    /// The charm's config.yaml file
    pub config: Option<Config>,

    /// The charm's metadata.yaml file
    pub metadata: Metadata,
}

impl CharmDefinition {
    /// Load a charm's definition from its directory
    ///
    /// `metadata.yaml` must exist; a charm with no options doesn't need `config.yaml`.
    pub fn load<P: Into<PathBuf>>(source: P) -> Result<Self, CharmError> {
        let source = source.into();
        let config: Option<Config> = read(source.join("config.yaml"))
            .map(|bytes| from_slice(&bytes))
            .unwrap_or(Ok(None))?;
        let metadata = from_slice(&read(source.join("metadata.yaml"))?)?;

        Ok(Self {
            source,
            config,
            metadata,
        })
    }

    /// Build a definition from already-parsed parts
    pub fn new(metadata: Metadata, config: Option<Config>) -> Self {
        Self {
            source: PathBuf::new(),
            config,
            metadata,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Look up an endpoint by name on any side
    pub fn endpoint(&self, name: &str) -> Result<(Role, &Endpoint), CharmError> {
        let md = &self.metadata;
        md.requires
            .get(name)
            .map(|e| (Role::Requires, e))
            .or_else(|| md.provides.get(name).map(|e| (Role::Provides, e)))
            .or_else(|| md.peers.get(name).map(|e| (Role::Peer, e)))
            .ok_or_else(|| CharmError::UnknownEndpoint(name.to_string()))
    }

    /// The declared workload container
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.metadata.containers.get(name)
    }
}

use serde_derive::{Deserialize, Serialize};

/// Where a charm storage is mounted inside a workload container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerMount {
    /// Name of the storage to mount from the charm storage
    pub storage: String,

    /// In the case of filesystem storages, the location to mount the storage
    pub location: String,
}

/// A Kubernetes sidecar container running the workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Container {
    /// Reference for an entry in the resources field
    ///
    /// Specifies the oci-image resource used to create the container.
    pub resource: String,

    /// List of mounted storages for this container
    #[serde(default)]
    pub mounts: Vec<ContainerMount>,
}

impl Container {
    /// Finds the mount whose location contains `path`, preferring the longest match
    pub fn mount_for(&self, path: &str) -> Option<&ContainerMount> {
        self.mounts
            .iter()
            .filter(|m| {
                let location = m.location.trim_end_matches('/');
                path == location || path.starts_with(&format!("{}/", location))
            })
            .max_by_key(|m| m.location.len())
    }
}

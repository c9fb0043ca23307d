use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use super::container::Container;
use super::relation::Endpoint;
use super::storage::Storage;

/// Resource declared by the charm, e.g. the workload's OCI image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub upstream_source: Option<String>,
}

/// A charm's metadata.yaml file
///
/// See https://juju.is/docs/sdk/metadata-reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Metadata {
    /// The name of the charm, also the default application name
    pub name: String,

    /// Human-friendly name of the charm
    #[serde(default)]
    pub display_name: Option<String>,

    /// A short, one-line description of the charm
    pub summary: String,

    /// A full description of the charm
    pub description: String,

    /// Sidecar containers, keyed by container name
    #[serde(default)]
    pub containers: BTreeMap<String, Container>,

    /// Additional resources that accompany the charm
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,

    /// Map of relations provided by this charm
    #[serde(default)]
    pub provides: BTreeMap<String, Endpoint>,

    /// Map of relations required by this charm
    #[serde(default)]
    pub requires: BTreeMap<String, Endpoint>,

    /// Mutual relations between units/peers of this charm
    #[serde(default)]
    pub peers: BTreeMap<String, Endpoint>,

    /// Storage requests for the charm
    #[serde(default)]
    pub storage: BTreeMap<String, Storage>,
}

//! Pebble layer documents, as accepted by `pebble add` and printed by `pebble plan`
use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Override {
    Merge,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Startup {
    Enabled,
    Disabled,
}

/// A service managed by Pebble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    #[serde(rename = "override")]
    pub override_: Override,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Startup>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// Where Pebble forwards service logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogTarget {
    #[serde(rename = "override")]
    pub override_: Override,

    #[serde(rename = "type")]
    pub kind: String,

    pub location: String,

    /// Services whose logs are forwarded; `all` means every service
    #[serde(default)]
    pub services: Vec<String>,
}

impl LogTarget {
    pub fn loki<S: Into<String>>(location: S) -> Self {
        Self {
            override_: Override::Replace,
            kind: "loki".into(),
            location: location.into(),
            services: vec!["all".into()],
        }
    }
}

/// A layer, or the combined plan of all layers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Layer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log_targets: BTreeMap<String, LogTarget>,
}

impl Layer {
    /// Returns true if applying this layer to `plan` would change nothing
    ///
    /// Descriptions aren't part of a plan, so only services and log targets are compared.
    pub fn is_applied_in(&self, plan: &Layer) -> bool {
        let services = self
            .services
            .iter()
            .all(|(name, service)| plan.services.get(name) == Some(service));
        let targets = self
            .log_targets
            .iter()
            .all(|(name, target)| plan.log_targets.get(name) == Some(target));

        services && targets
    }
}

use serde_derive::{Deserialize, Serialize};

/// Scope of a given relation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub enum RelationScope {
    Global,
    Container,
}

impl Default for RelationScope {
    fn default() -> Self {
        Self::Global
    }
}

/// Which side of an interface this charm sits on for a given endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Provides,
    Requires,
    Peer,
}

/// A relation endpoint declared in metadata.yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Endpoint {
    /// The interface schema that this relation conforms to
    pub interface: String,

    /// Maximum number of supported connections to this relation endpoint
    pub limit: Option<u32>,

    /// Defines if the relation is required
    ///
    /// Informational only as far as Juju is concerned; the reconciler only treats a fixed set of
    /// endpoints as mandatory.
    #[serde(default)]
    pub optional: bool,

    /// The scope of the relation. Defaults to "global"
    pub scope: Option<RelationScope>,
}

impl Endpoint {
    /// Returns true if `count` concurrent relations exceed the declared limit
    pub fn exceeds_limit(&self, count: usize) -> bool {
        match self.limit {
            Some(limit) => count > limit as usize,
            None => false,
        }
    }
}

//! Read-only snapshot of what the orchestration runtime knows about this unit
//!
//! A snapshot is taken once at the start of a hook and passed into the reconciler; nothing here
//! is cached across passes.

use std::collections::BTreeMap;
use std::fmt;

use serde_derive::{Deserialize, Serialize};
use serde_yaml::Value;

/// A relation's key/value data bag
pub type DataBag = BTreeMap<String, String>;

/// Identifier assigned to a relation by Juju
///
/// Identifiers grow monotonically, so a lower id means an earlier established relation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whose bag a piece of local data is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BagScope {
    App,
    Unit,
}

/// An edge between this unit and one remote application
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relation {
    pub id: RelationId,

    /// Name of the endpoint as known by this charm
    pub endpoint: String,

    /// Interface the endpoint conforms to
    pub interface: String,

    /// Remote application name; absent until the remote side has joined
    pub remote_app: Option<String>,

    pub remote_app_data: DataBag,

    /// Remote unit bags, keyed by unit name
    pub remote_units_data: BTreeMap<String, DataBag>,

    pub local_app_data: DataBag,

    pub local_unit_data: DataBag,
}

impl Relation {
    pub fn new<E: Into<String>, I: Into<String>>(id: u32, endpoint: E, interface: I) -> Self {
        Self {
            id: RelationId(id),
            endpoint: endpoint.into(),
            interface: interface.into(),
            ..Default::default()
        }
    }

    /// Sets the remote application and its data bag
    pub fn with_remote_app<S: Into<String>>(mut self, app: S, data: DataBag) -> Self {
        self.remote_app = Some(app.into());
        self.remote_app_data = data;
        self
    }

    /// Adds a remote unit's data bag
    pub fn with_remote_unit<S: Into<String>>(mut self, unit: S, data: DataBag) -> Self {
        self.remote_units_data.insert(unit.into(), data);
        self
    }

    pub fn with_local_app_data(mut self, data: DataBag) -> Self {
        self.local_app_data = data;
        self
    }

    pub fn with_local_unit_data(mut self, data: DataBag) -> Self {
        self.local_unit_data = data;
        self
    }

    pub fn local_data(&self, scope: BagScope) -> &DataBag {
        match scope {
            BagScope::App => &self.local_app_data,
            BagScope::Unit => &self.local_unit_data,
        }
    }
}

/// All relations of the unit, ordered by relation id
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelationSet {
    relations: Vec<Relation>,
}

impl RelationSet {
    pub fn new(mut relations: Vec<Relation>) -> Self {
        relations.sort_by_key(|r| r.id);
        Self { relations }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    /// Relations on `endpoint`, first-established first
    pub fn for_endpoint<'a>(&'a self, endpoint: &'a str) -> impl Iterator<Item = &'a Relation> {
        self.relations.iter().filter(move |r| r.endpoint == endpoint)
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.for_endpoint(endpoint).count()
    }

    pub fn is_related(&self, endpoint: &str) -> bool {
        self.for_endpoint(endpoint).next().is_some()
    }

    pub fn get(&self, id: RelationId) -> Option<&Relation> {
        self.relations.iter().find(|r| r.id == id)
    }
}

/// Facts about the unit the charm is running as
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitInfo {
    pub app_name: String,
    pub unit_name: String,
    pub model_name: String,
    pub is_leader: bool,

    /// Fully qualified domain name of the pod
    pub fqdn: String,

    /// Pod address, if the runtime could report one
    pub pod_ip: Option<String>,
}

/// Everything a reconciliation pass reads, captured at the start of the pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelSnapshot {
    pub unit: UnitInfo,

    /// Raw charm options, as reported by `config-get`
    pub config: BTreeMap<String, Value>,

    pub relations: RelationSet,
}

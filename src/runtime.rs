//! The orchestration runtime as the charm sees it: relation data, options, secrets, status
//!
//! `HookTools` talks to Juju through the hook tools on `$PATH`. Everything the reconciler
//! needs goes through the `Runtime` trait so that passes can run against an in-memory model.
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::io::Write;

use serde::de::DeserializeOwned;
use serde_yaml::{from_slice, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::cmd::{get_output, run};
use crate::definition::CharmDefinition;
use crate::error::CharmError;
use crate::hook::parse_relation_id;
use crate::model::{BagScope, DataBag, ModelSnapshot, Relation, RelationId, RelationSet, UnitInfo};

/// Status categories Juju understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Active,
    Blocked,
    Waiting,
    Maintenance,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            StatusKind::Active => "active",
            StatusKind::Blocked => "blocked",
            StatusKind::Waiting => "waiting",
            StatusKind::Maintenance => "maintenance",
        };
        write!(f, "{}", kind)
    }
}

/// Unit status as shown by `juju status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub kind: StatusKind,
    pub message: String,
}

impl UnitStatus {
    pub fn active() -> Self {
        Self {
            kind: StatusKind::Active,
            message: String::new(),
        }
    }

    pub fn blocked<S: Into<String>>(message: S) -> Self {
        Self {
            kind: StatusKind::Blocked,
            message: message.into(),
        }
    }

    pub fn waiting<S: Into<String>>(message: S) -> Self {
        Self {
            kind: StatusKind::Waiting,
            message: message.into(),
        }
    }

    pub fn maintenance<S: Into<String>>(message: S) -> Self {
        Self {
            kind: StatusKind::Maintenance,
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Access to the model the unit lives in
pub trait Runtime {
    /// Reads everything a reconciliation pass needs, relations included
    fn snapshot(&self, definition: &CharmDefinition) -> Result<ModelSnapshot, CharmError>;

    /// Writes `data` into one of our own bags on `relation`
    ///
    /// Keys with empty values are removed from the bag.
    fn publish(
        &mut self,
        relation: RelationId,
        scope: BagScope,
        data: &DataBag,
    ) -> Result<(), CharmError>;

    fn set_status(&mut self, status: &UnitStatus) -> Result<(), CharmError>;

    /// Content of the application secret with `label`, if it exists
    fn get_secret(&self, label: &str) -> Result<Option<DataBag>, CharmError>;

    /// Creates or updates the application secret with `label`
    fn set_secret(&mut self, label: &str, content: &DataBag) -> Result<(), CharmError>;
}

/// Runs a hook tool and parses its YAML output
fn hook_tool<T: DeserializeOwned>(tool: &str, args: &[&str]) -> Result<T, CharmError> {
    let mut full_args = args.to_vec();
    full_args.push("--format=yaml");
    Ok(from_slice(&get_output(tool, &full_args)?)?)
}

/// Null output from a hook tool deserializes as an empty map rather than an error
fn bag_from(value: Option<BTreeMap<String, Value>>) -> DataBag {
    value
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Number(n) => Some((k, n.to_string())),
            Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect()
}

/// `Runtime` backed by the Juju hook tools
#[derive(Debug, Clone, Default)]
pub struct HookTools {
    /// A relation being torn down in the current hook, hidden from snapshots
    departing: Option<RelationId>,
}

impl HookTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hides `relation` from snapshots, as Juju still lists it during its broken hook
    pub fn without_relation(mut self, relation: RelationId) -> Self {
        self.departing = Some(relation);
        self
    }

    fn unit_info(&self) -> Result<UnitInfo, CharmError> {
        let unit_name = env::var("JUJU_UNIT_NAME").unwrap_or_default();
        let app_name = unit_name.split('/').next().unwrap_or_default().to_string();
        let is_leader: Option<bool> = hook_tool("is-leader", &[])?;
        let pod_ip: Option<String> = hook_tool::<Option<String>>("unit-get", &["private-address"])
            .ok()
            .flatten();
        let fqdn = get_output("hostname", &["-f"])
            .map(|out| String::from_utf8_lossy(&out).trim().to_string())
            .unwrap_or_default();

        Ok(UnitInfo {
            app_name,
            unit_name,
            model_name: env::var("JUJU_MODEL_NAME").unwrap_or_default(),
            is_leader: is_leader.unwrap_or(false),
            fqdn,
            pod_ip,
        })
    }

    fn relation(
        &self,
        unit: &UnitInfo,
        key: &str,
        endpoint: &str,
        interface: &str,
    ) -> Result<Relation, CharmError> {
        let id = parse_relation_id(key).map_err(CharmError::DeserError)?;
        let mut relation = Relation::new(id.0, endpoint, interface);

        let remote_app: Option<String> = hook_tool("relation-list", &["-r", key, "--app"])?;
        if let Some(app) = remote_app.filter(|a| !a.is_empty()) {
            let data = hook_tool("relation-get", &["-r", key, "--app", "-", app.as_str()])?;
            relation = relation.with_remote_app(app, bag_from(data));
        }

        let units: Option<Vec<String>> = hook_tool("relation-list", &["-r", key])?;
        for remote_unit in units.unwrap_or_default() {
            let data = hook_tool("relation-get", &["-r", key, "-", remote_unit.as_str()])?;
            relation = relation.with_remote_unit(remote_unit, bag_from(data));
        }

        let local_unit = hook_tool("relation-get", &["-r", key, "-", unit.unit_name.as_str()])?;
        relation = relation.with_local_unit_data(bag_from(local_unit));

        if unit.is_leader {
            let local_app = hook_tool(
                "relation-get",
                &["-r", key, "--app", "-", unit.app_name.as_str()],
            )?;
            relation = relation.with_local_app_data(bag_from(local_app));
        }

        Ok(relation)
    }
}

impl Runtime for HookTools {
    fn snapshot(&self, definition: &CharmDefinition) -> Result<ModelSnapshot, CharmError> {
        let unit = self.unit_info()?;
        let config: Option<BTreeMap<String, Value>> = hook_tool("config-get", &[])?;

        let md = &definition.metadata;
        let endpoints = md.requires.iter().chain(md.provides.iter()).chain(md.peers.iter());

        let mut relations = vec![];
        for (name, endpoint) in endpoints {
            let keys: Option<Vec<String>> = hook_tool("relation-ids", &[name.as_str()])?;
            for key in keys.unwrap_or_default() {
                let relation = self.relation(&unit, &key, name, &endpoint.interface)?;
                if Some(relation.id) == self.departing {
                    debug!(relation = %key, "Skipping departing relation");
                    continue;
                }
                relations.push(relation);
            }
        }

        Ok(ModelSnapshot {
            unit,
            config: config.unwrap_or_default(),
            relations: RelationSet::new(relations),
        })
    }

    fn publish(
        &mut self,
        relation: RelationId,
        scope: BagScope,
        data: &DataBag,
    ) -> Result<(), CharmError> {
        // Values may span lines, so they go through a file rather than `key=value` arguments
        let mut file = NamedTempFile::new()?;
        file.write_all(serde_yaml::to_string(data)?.as_bytes())?;
        file.flush()?;

        let id = relation.to_string();
        let path = file.path().to_string_lossy().to_string();
        let mut args = vec!["-r", id.as_str(), "--file", path.as_str()];
        if scope == BagScope::App {
            args.push("--app");
        }

        run("relation-set", &args)
    }

    fn set_status(&mut self, status: &UnitStatus) -> Result<(), CharmError> {
        run("status-set", &[status.kind.to_string(), status.message.clone()])
    }

    fn get_secret(&self, label: &str) -> Result<Option<DataBag>, CharmError> {
        match hook_tool::<Option<BTreeMap<String, Value>>>("secret-get", &["--label", label]) {
            Ok(content) => Ok(Some(bag_from(content))),
            Err(CharmError::SubcommandError(_, stderr)) if stderr.contains("not found") => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set_secret(&mut self, label: &str, content: &DataBag) -> Result<(), CharmError> {
        let pairs: Vec<String> = content.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let existing: Result<BTreeMap<String, Value>, _> =
            hook_tool("secret-info-get", &["--label", label]);

        let mut args = match existing.ok().and_then(|info| info.keys().next().cloned()) {
            Some(id) => vec!["secret-set".to_string(), id],
            None => vec![
                "secret-add".to_string(),
                "--label".to_string(),
                label.to_string(),
            ],
        };
        let tool = args.remove(0);
        args.extend(pairs);

        run(&tool, &args)
    }
}

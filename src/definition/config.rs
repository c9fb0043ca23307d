use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};
use serde_yaml::Value;

/// Config option as defined in config.yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, tag = "type", rename_all = "kebab-case")]
pub enum ConfigOption {
    /// String config option
    #[serde(rename_all = "kebab-case")]
    String {
        default: Option<String>,
        description: String,
    },

    /// Integer config option
    #[serde(rename = "int", rename_all = "kebab-case")]
    Integer {
        default: Option<i64>,
        description: String,
    },

    /// Boolean config option
    #[serde(rename_all = "kebab-case")]
    Boolean {
        default: Option<bool>,
        description: String,
    },
}

impl ConfigOption {
    /// The declared default, if any, as a YAML value
    pub fn default_value(&self) -> Option<Value> {
        match self {
            ConfigOption::String { default, .. } => default.clone().map(Value::String),
            ConfigOption::Integer { default, .. } => default.map(|d| Value::Number(d.into())),
            ConfigOption::Boolean { default, .. } => default.map(Value::Bool),
        }
    }
}

/// A charm's config.yaml file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub options: BTreeMap<String, ConfigOption>,
}

impl Config {
    /// Default value for every option that declares one
    pub fn defaults(&self) -> BTreeMap<String, Value> {
        self.options
            .iter()
            .filter_map(|(name, option)| option.default_value().map(|v| (name.clone(), v)))
            .collect()
    }
}

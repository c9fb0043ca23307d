//! Typed charm options
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::CharmError;
use crate::model::UnitInfo;

/// Log levels understood by the NMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "panic" => Ok(LogLevel::Panic),
            other => Err(format!("Unknown log level `{}`", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Panic => "panic",
        };
        write!(f, "{}", level)
    }
}

/// Charm options after validation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CharmConfig {
    pub log_level: LogLevel,
}

impl CharmConfig {
    /// Validates raw options, falling back to `defaults` for anything unset
    ///
    /// Every invalid option is reported at once, by name.
    pub fn from_options(
        options: &BTreeMap<String, Value>,
        defaults: &BTreeMap<String, Value>,
    ) -> Result<Self, CharmError> {
        let mut invalid = vec![];

        let log_level = match options.get("log-level").or_else(|| defaults.get("log-level")) {
            Some(Value::String(level)) => level.parse().unwrap_or_else(|_| {
                invalid.push("log-level".to_string());
                LogLevel::default()
            }),
            None => LogLevel::default(),
            Some(_) => {
                invalid.push("log-level".to_string());
                LogLevel::default()
            }
        };

        if invalid.is_empty() {
            Ok(Self { log_level })
        } else {
            Err(CharmError::InvalidConfig(invalid))
        }
    }
}

/// How to pick one relation when several could supply the same value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// The relation with the lowest id wins
    FirstEstablished,

    /// The relation with the highest id wins
    LastEstablished,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak::FirstEstablished
    }
}

/// Everything besides relation data that feeds the desired configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StaticConfig {
    pub log_level: LogLevel,
    pub app_name: String,
    pub model_name: String,

    /// Address the UI is reachable on when no ingress is related
    pub pod_address: Option<String>,

    pub tie_break: TieBreak,
}

impl StaticConfig {
    pub fn new(config: &CharmConfig, unit: &UnitInfo) -> Self {
        Self {
            log_level: config.log_level,
            app_name: unit.app_name.clone(),
            model_name: unit.model_name.clone(),
            pod_address: unit.pod_ip.clone(),
            tie_break: TieBreak::default(),
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }
}

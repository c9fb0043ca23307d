//! Projection of the desired configuration into what the workload consumes
use std::collections::BTreeMap;

use serde_derive::Serialize;

use crate::aggregate::DesiredConfig;
use crate::error::CharmError;
use crate::pebble::{Layer, LogTarget, Override, Service, Startup};

pub const CONTAINER: &str = "nms";
pub const SERVICE: &str = "nms";

pub const CONFIG_DIR: &str = "/nms/config";
pub const CONFIG_PATH: &str = "/nms/config/nmscfg.conf";

pub const CERTS_DIR: &str = "/support/TLS";
pub const PRIVATE_KEY_PATH: &str = "/support/TLS/nms.key";
pub const CSR_PATH: &str = "/support/TLS/nms.csr";
pub const CERTIFICATE_PATH: &str = "/support/TLS/nms.pem";
pub const CA_PATH: &str = "/support/TLS/ca.pem";

#[derive(Serialize)]
struct Info {
    version: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct Database<'a> {
    name: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct Tls {
    pem: &'static str,
    key: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Configuration<'a> {
    mongodb: Database<'a>,
    webui_db_name: &'a str,
    webui_db_url: &'a str,
    auth_db_name: &'a str,
    auth_db_url: &'a str,
    tls: Tls,
    enable_authentication: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentLogger {
    debug_level: String,
}

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
struct Logger {
    webui: ComponentLogger,
}

#[derive(Serialize)]
struct NmsConfigFile<'a> {
    info: Info,
    configuration: Configuration<'a>,
    logger: Logger,
}

/// Renders `nmscfg.conf`
///
/// gNBs and UPFs aren't part of it; they go to the NMS inventory API.
pub fn config_file(desired: &DesiredConfig) -> Result<String, CharmError> {
    let file = NmsConfigFile {
        info: Info {
            version: "1.0.0",
            description: "NMS initial local configuration",
        },
        configuration: Configuration {
            mongodb: Database {
                name: &desired.common_database.name,
                url: &desired.common_database.url,
            },
            webui_db_name: &desired.webui_database.name,
            webui_db_url: &desired.webui_database.url,
            auth_db_name: &desired.auth_database.name,
            auth_db_url: &desired.auth_database.url,
            tls: Tls {
                pem: CERTIFICATE_PATH,
                key: PRIVATE_KEY_PATH,
            },
            enable_authentication: true,
        },
        logger: Logger {
            webui: ComponentLogger {
                debug_level: desired.log_level.to_string(),
            },
        },
    };

    Ok(serde_yaml::to_string(&file)?)
}

/// Builds the Pebble layer running the NMS
pub fn layer(desired: &DesiredConfig) -> Layer {
    let mut environment = BTreeMap::new();
    environment.insert("CONFIGPOD_DEPLOYMENT".to_string(), "5G".to_string());
    environment.insert("WEBUI_ENDPOINT".to_string(), desired.webui_endpoint.clone());

    let mut services = BTreeMap::new();
    services.insert(
        SERVICE.to_string(),
        Service {
            override_: Override::Replace,
            summary: None,
            command: format!("/bin/webconsole --cfg {}", CONFIG_PATH),
            startup: Some(Startup::Enabled),
            environment,
        },
    );

    let log_targets = desired
        .log_endpoints
        .iter()
        .enumerate()
        .map(|(i, url)| (format!("loki-{}", i), LogTarget::loki(url.as_str())))
        .collect();

    Layer {
        summary: Some("NMS layer".into()),
        description: Some("pebble config layer for the NMS".into()),
        services,
        log_targets,
    }
}

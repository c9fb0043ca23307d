//! Folds the current relation data into the configuration the workload should be running with
//!
//! Nothing in here performs I/O or logs. The same relations and options always produce the same
//! result, which is what lets the reconciler compare desired against applied state.
use std::collections::BTreeSet;

use serde_derive::{Deserialize, Serialize};

use crate::config::{LogLevel, StaticConfig, TieBreak};
use crate::definition::CharmDefinition;
use crate::error::CharmError;
use crate::interfaces::fiveg_core_gnb::GnbIdentity;
use crate::interfaces::fiveg_n4::UpfEndpoint;
use crate::interfaces::ingress::{IngressUrl, NMS_PORT};
use crate::interfaces::loki_push_api::LokiEndpoint;
use crate::interfaces::mongodb_client::DatabaseCredentials;
use crate::interfaces::tls_certificates::{CertificateRequests, IssuedCertificates};
use crate::interfaces::{Decoded, Payload};
use crate::model::{DataBag, Relation, RelationId, RelationSet};
use crate::runtime::UnitStatus;

/// Endpoint names, as declared in metadata.yaml
pub mod endpoint {
    pub const COMMON_DATABASE: &str = "common_database";
    pub const AUTH_DATABASE: &str = "auth_database";
    pub const WEBUI_DATABASE: &str = "webui_database";
    pub const CERTIFICATES: &str = "certificates";
    pub const FIVEG_N4: &str = "fiveg_n4";
    pub const FIVEG_CORE_GNB: &str = "fiveg_core_gnb";
    pub const SDCORE_CONFIG: &str = "sdcore_config";
    pub const INGRESS: &str = "ingress";
    pub const LOGGING: &str = "logging";
}

/// Database endpoints and the database requested over each
pub const DATABASES: [(&str, &str); 3] = [
    (endpoint::COMMON_DATABASE, "free5gc"),
    (endpoint::AUTH_DATABASE, "authentication"),
    (endpoint::WEBUI_DATABASE, "webui"),
];

/// How far a capability is from being usable
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// No relation on the endpoint
    Missing,

    /// Related, but the peer hasn't published these fields yet
    Pending { missing: Vec<&'static str> },

    /// The peer published something that doesn't decode
    Malformed { reason: String },

    /// More relations than the endpoint allows
    Conflict { count: usize, limit: u32 },

    Ready,
}

/// Readiness of one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub endpoint: &'static str,
    pub readiness: Readiness,
}

impl Capability {
    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    /// What to tell the operator while this capability holds things up
    pub fn status(&self) -> UnitStatus {
        let ep = self.endpoint;
        match &self.readiness {
            Readiness::Missing => {
                UnitStatus::blocked(format!("Waiting for {} relation to be created", ep))
            }
            Readiness::Pending { .. } => UnitStatus::waiting(format!(
                "Waiting for the {} relation data to be available",
                ep
            )),
            Readiness::Malformed { .. } => {
                UnitStatus::blocked(format!("Invalid data published on the {} relation", ep))
            }
            Readiness::Conflict { count, limit } => UnitStatus::blocked(format!(
                "Too many {} relations: {} (limit {})",
                ep, count, limit
            )),
            Readiness::Ready => UnitStatus::active(),
        }
    }

    /// The error behind a capability that isn't ready
    pub fn error(&self) -> Option<CharmError> {
        match &self.readiness {
            Readiness::Ready => None,
            Readiness::Missing | Readiness::Pending { .. } => {
                Some(CharmError::MissingCapability(self.endpoint.into()))
            }
            Readiness::Malformed { reason } => {
                Some(CharmError::malformed(self.endpoint, reason.clone()))
            }
            Readiness::Conflict { count, limit } => Some(CharmError::ConfigurationConflict {
                endpoint: self.endpoint.into(),
                count: *count,
                limit: *limit,
            }),
        }
    }
}

/// Mandatory capabilities in evaluation order, followed by any limit conflicts on optional
/// endpoints
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadinessReport {
    pub capabilities: Vec<Capability>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.capabilities.iter().all(Capability::is_ready)
    }

    /// The first capability that isn't ready, if any
    pub fn first_blocker(&self) -> Option<&Capability> {
        self.capabilities.iter().find(|c| !c.is_ready())
    }

    pub fn get(&self, endpoint: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.endpoint == endpoint)
    }
}

/// A peer's data that was left out of the desired configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub endpoint: &'static str,
    pub relation: RelationId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub name: String,
    pub url: String,
}

/// A certificate the provider signed for the CSR we published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub ca: String,
    pub chain: Vec<String>,
    pub csr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub log_level: LogLevel,
    pub common_database: DatabaseTarget,
    pub auth_database: DatabaseTarget,
    pub webui_database: DatabaseTarget,

    /// Certificate for the CSR currently published, once the provider has signed it
    pub certificate: Option<IssuedCertificate>,

    /// gNB names, sorted
    pub gnbs: Vec<String>,

    /// UPFs, sorted by hostname
    pub upfs: Vec<UpfEndpoint>,

    /// `host:port` the NMS UI is reached on
    pub webui_endpoint: String,

    /// Loki push URLs, in order of first appearance
    pub log_endpoints: Vec<String>,
}

/// Result of one aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Present only when every mandatory capability is ready
    pub desired: Option<DesiredConfig>,
    pub report: ReadinessReport,
    pub diagnostics: Vec<Diagnostic>,
}

/// Relations on `endpoint`, ordered so that the preferred one comes first
fn ordered<'a>(relations: &'a RelationSet, endpoint: &'a str, tie_break: TieBreak) -> Vec<&'a Relation> {
    let mut found: Vec<_> = relations.for_endpoint(endpoint).collect();
    if tie_break == TieBreak::LastEstablished {
        found.reverse();
    }
    found
}

/// Evaluates an endpoint supplying a single value through the remote application bag
fn evaluate<'a, T: Payload>(
    relations: &'a RelationSet,
    definition: &CharmDefinition,
    endpoint: &'static str,
    tie_break: TieBreak,
) -> (Readiness, Option<(&'a Relation, T)>) {
    let candidates = ordered(relations, endpoint, tie_break);
    if candidates.is_empty() {
        return (Readiness::Missing, None);
    }

    if let Ok((_, ep)) = definition.endpoint(endpoint) {
        if ep.exceeds_limit(candidates.len()) {
            let limit = ep.limit.unwrap_or_default();
            let count = candidates.len();
            return (Readiness::Conflict { count, limit }, None);
        }
    }

    let mut fallback = None;
    for relation in candidates {
        match T::decode(&relation.remote_app_data) {
            Ok(Decoded::Complete(payload)) => return (Readiness::Ready, Some((relation, payload))),
            Ok(Decoded::Incomplete { missing }) => {
                if fallback.is_none() {
                    fallback = Some(Readiness::Pending { missing });
                }
            }
            Err(err) => {
                if !matches!(fallback, Some(Readiness::Malformed { .. })) {
                    fallback = Some(Readiness::Malformed {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    (fallback.unwrap_or(Readiness::Missing), None)
}

/// Decodes every complete payload from the given bags, recording the malformed ones
fn collect<'a, T: Payload>(
    bags: impl Iterator<Item = (RelationId, &'a DataBag)>,
    endpoint: &'static str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<T> {
    let mut payloads = vec![];
    for (relation, bag) in bags {
        match T::decode(bag) {
            Ok(Decoded::Complete(payload)) => payloads.push(payload),
            Ok(Decoded::Incomplete { .. }) => {}
            Err(err) => diagnostics.push(Diagnostic {
                endpoint,
                relation,
                reason: err.to_string(),
            }),
        }
    }
    payloads
}

/// The certificate the provider issued for a CSR in our own unit bag
fn issued_certificate(relation: &Relation, issued: &IssuedCertificates) -> Option<IssuedCertificate> {
    let requests = CertificateRequests::decode(&relation.local_unit_data)
        .ok()
        .and_then(Decoded::complete)
        .unwrap_or_default();

    requests.requests.iter().find_map(|request| {
        issued
            .for_csr(&request.certificate_signing_request)
            .map(|cert| IssuedCertificate {
                certificate: cert.certificate.clone(),
                ca: cert.ca.clone(),
                chain: cert.chain.clone(),
                csr: cert.certificate_signing_request.clone(),
            })
    })
}

/// Computes the desired configuration and the readiness of every capability it depends on
pub fn aggregate(
    relations: &RelationSet,
    definition: &CharmDefinition,
    config: &StaticConfig,
) -> Aggregation {
    let tie_break = config.tie_break;
    let mut report = ReadinessReport::default();
    let mut diagnostics = vec![];

    let mut databases = vec![];
    for &(ep, name) in DATABASES.iter() {
        let (readiness, found) = evaluate::<DatabaseCredentials>(relations, definition, ep, tie_break);
        report.capabilities.push(Capability {
            endpoint: ep,
            readiness,
        });
        databases.push(found.map(|(_, creds)| DatabaseTarget {
            name: name.into(),
            url: creds.primary_uri().into(),
        }));
    }

    let (readiness, found) =
        evaluate::<IssuedCertificates>(relations, definition, endpoint::CERTIFICATES, tie_break);
    report.capabilities.push(Capability {
        endpoint: endpoint::CERTIFICATES,
        readiness,
    });
    let certificate = found.and_then(|(relation, issued)| issued_certificate(relation, &issued));

    let (readiness, ingress) = evaluate::<IngressUrl>(relations, definition, endpoint::INGRESS, tie_break);
    match readiness {
        Readiness::Conflict { .. } => report.capabilities.push(Capability {
            endpoint: endpoint::INGRESS,
            readiness,
        }),
        Readiness::Malformed { reason } => {
            for relation in relations.for_endpoint(endpoint::INGRESS) {
                diagnostics.push(Diagnostic {
                    endpoint: endpoint::INGRESS,
                    relation: relation.id,
                    reason: reason.clone(),
                });
            }
        }
        _ => {}
    }

    let upf_bags = ordered(relations, endpoint::FIVEG_N4, tie_break)
        .into_iter()
        .map(|r| (r.id, &r.remote_app_data));
    let mut seen = BTreeSet::new();
    let mut upfs: Vec<UpfEndpoint> = collect(upf_bags, endpoint::FIVEG_N4, &mut diagnostics)
        .into_iter()
        .filter(|upf: &UpfEndpoint| seen.insert(upf.hostname.clone()))
        .collect();
    upfs.sort();

    let gnb_bags = relations
        .for_endpoint(endpoint::FIVEG_CORE_GNB)
        .map(|r| (r.id, &r.remote_app_data));
    let gnbs: BTreeSet<String> = collect(gnb_bags, endpoint::FIVEG_CORE_GNB, &mut diagnostics)
        .into_iter()
        .map(|gnb: GnbIdentity| gnb.name)
        .collect();

    let loki_bags = relations
        .for_endpoint(endpoint::LOGGING)
        .flat_map(|r| r.remote_units_data.values().map(move |bag| (r.id, bag)));
    let mut log_endpoints: Vec<String> = vec![];
    for loki in collect::<LokiEndpoint>(loki_bags, endpoint::LOGGING, &mut diagnostics) {
        if !log_endpoints.contains(&loki.url) {
            log_endpoints.push(loki.url);
        }
    }

    let webui_endpoint = ingress
        .and_then(|(_, url)| url.netloc().map(String::from))
        .unwrap_or_else(|| {
            let host = config.pod_address.as_ref().unwrap_or(&config.app_name);
            format!("{}:{}", host, NMS_PORT)
        });

    let desired = match (report.is_ready(), databases.as_slice()) {
        (true, [Some(common), Some(auth), Some(webui)]) => Some(DesiredConfig {
            log_level: config.log_level,
            common_database: common.clone(),
            auth_database: auth.clone(),
            webui_database: webui.clone(),
            certificate,
            gnbs: gnbs.into_iter().collect(),
            upfs,
            webui_endpoint,
            log_endpoints,
        }),
        _ => None,
    };

    Aggregation {
        desired,
        report,
        diagnostics,
    }
}

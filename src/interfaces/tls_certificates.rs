//! `tls-certificates`: CSRs go out in our unit bag, signed certificates come back in the
//! provider's application bag
use serde_derive::{Deserialize, Serialize};

use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "tls-certificates";
const REQUESTS_KEY: &str = "certificate_signing_requests";
const CERTIFICATES_KEY: &str = "certificates";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub certificate_signing_request: String,

    #[serde(default)]
    pub ca: bool,
}

/// Outstanding signing requests of one unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CertificateRequests {
    pub requests: Vec<CertificateRequest>,
}

impl CertificateRequests {
    /// A single non-CA request for the given PEM CSR
    pub fn single<S: Into<String>>(csr: S) -> Self {
        Self {
            requests: vec![CertificateRequest {
                certificate_signing_request: csr.into(),
                ca: false,
            }],
        }
    }

    pub fn contains(&self, csr: &str) -> bool {
        self.requests
            .iter()
            .any(|r| same_pem(&r.certificate_signing_request, csr))
    }
}

impl Payload for CertificateRequests {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let fields = Fields::new(INTERFACE, bag);

        let requests = match fields.optional(REQUESTS_KEY) {
            Some(raw) => fields.json(REQUESTS_KEY, raw)?,
            None => vec![],
        };

        Ok(Decoded::Complete(Self { requests }))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        // Serializing a Vec of plain structs can't fail
        let encoded = serde_json::to_string(&self.requests).unwrap_or_else(|_| "[]".into());
        bag.insert(REQUESTS_KEY.into(), encoded);
        bag
    }
}

/// One certificate issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCertificate {
    pub certificate: String,
    pub certificate_signing_request: String,
    pub ca: String,

    #[serde(default)]
    pub chain: Vec<String>,

    #[serde(default)]
    pub revoked: bool,
}

/// Every certificate the provider has published for this application
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IssuedCertificates {
    pub certificates: Vec<ProviderCertificate>,
}

impl IssuedCertificates {
    /// Finds the non-revoked certificate issued for `csr`
    pub fn for_csr(&self, csr: &str) -> Option<&ProviderCertificate> {
        self.certificates
            .iter()
            .filter(|c| !c.revoked)
            .find(|c| same_pem(&c.certificate_signing_request, csr))
    }
}

impl Payload for IssuedCertificates {
    const INTERFACE: &'static str = INTERFACE;

    /// A provider that hasn't issued anything yet has simply issued nothing
    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let fields = Fields::new(INTERFACE, bag);

        let certificates: Vec<ProviderCertificate> = match fields.optional(CERTIFICATES_KEY) {
            Some(raw) => fields.json(CERTIFICATES_KEY, raw)?,
            None => vec![],
        };

        if let Some(cert) = certificates
            .iter()
            .find(|c| !c.certificate.contains("BEGIN CERTIFICATE"))
        {
            return Err(fields.malformed(format!(
                "certificate for request `{}` is not PEM encoded",
                summarize(&cert.certificate_signing_request)
            )));
        }

        Ok(Decoded::Complete(Self { certificates }))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        let encoded = serde_json::to_string(&self.certificates).unwrap_or_else(|_| "[]".into());
        bag.insert(CERTIFICATES_KEY.into(), encoded);
        bag
    }
}

/// Compares two PEM blobs, ignoring surrounding whitespace
fn same_pem(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

fn summarize(pem: &str) -> String {
    pem.lines()
        .find(|l| !l.starts_with("-----") && !l.trim().is_empty())
        .map(|l| l.chars().take(16).collect())
        .unwrap_or_default()
}

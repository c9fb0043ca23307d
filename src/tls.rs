//! Private key, CSR and certificate handling
//!
//! The private key is generated once and stays in workload storage. Renewal reuses it and
//! only produces a new CSR.
use std::cmp::Ordering;

use openssl::asn1::Asn1Time;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder, X509};
use tracing::{info, warn};

use crate::error::CharmError;
use crate::render::{CA_PATH, CERTIFICATE_PATH, CSR_PATH, PRIVATE_KEY_PATH};
use crate::workload::Workload;

pub const COMMON_NAME: &str = "nms.sdcore";

/// Certificates this close to expiry are renewed
pub const RENEWAL_WINDOW_DAYS: u32 = 7;

fn private_key(pem: &str) -> Result<PKey<Private>, CharmError> {
    Ok(PKey::private_key_from_pem(pem.as_bytes())?)
}

fn to_string(pem: Vec<u8>) -> Result<String, CharmError> {
    String::from_utf8(pem).map_err(|err| CharmError::DeserError(err.to_string()))
}

/// Generates a PEM encoded EC P-256 private key
pub fn generate_private_key() -> Result<String, CharmError> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;
    to_string(key.private_key_to_pem_pkcs8()?)
}

/// Generates a PEM encoded CSR signed by `key_pem`
pub fn generate_csr(key_pem: &str, common_name: &str, sans: &[&str]) -> Result<String, CharmError> {
    let key = private_key(key_pem)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(&key)?;

    let sans: Vec<&str> = sans.iter().cloned().filter(|s| !s.is_empty()).collect();
    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in &sans {
            san.dns(dns);
        }
        let mut extensions = Stack::new()?;
        extensions.push(san.build(&builder.x509v3_context(None))?)?;
        builder.add_extensions(&extensions)?;
    }

    builder.sign(&key, MessageDigest::sha256())?;
    to_string(builder.build().to_pem()?)
}

/// Returns true if the CSR was signed by `key_pem`
pub fn csr_matches_key(csr_pem: &str, key_pem: &str) -> Result<bool, CharmError> {
    let csr = X509Req::from_pem(csr_pem.as_bytes())?;
    let key = private_key(key_pem)?;
    Ok(csr.public_key()?.public_eq(&key))
}

/// Returns true if the certificate carries the public half of `key_pem`
pub fn certificate_matches_key(cert_pem: &str, key_pem: &str) -> Result<bool, CharmError> {
    let cert = X509::from_pem(cert_pem.as_bytes())?;
    let key = private_key(key_pem)?;
    Ok(cert.public_key()?.public_eq(&key))
}

/// Returns true if the certificate is no longer valid `days` from now
pub fn expires_within(cert_pem: &str, days: u32) -> Result<bool, CharmError> {
    let cert = X509::from_pem(cert_pem.as_bytes())?;
    let threshold = Asn1Time::days_from_now(days)?;
    Ok(cert.not_after().compare(&threshold)? != Ordering::Greater)
}

/// Certificate material found in workload storage
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredMaterial {
    pub private_key: Option<String>,
    pub csr: Option<String>,
    pub certificate: Option<String>,
    pub ca: Option<String>,
}

fn pull_string<W: Workload>(workload: &W, path: &str) -> Result<Option<String>, CharmError> {
    match workload.pull(path)? {
        Some(bytes) => Ok(Some(to_string(bytes)?)),
        None => Ok(None),
    }
}

impl StoredMaterial {
    pub fn load<W: Workload>(workload: &W) -> Result<Self, CharmError> {
        Ok(Self {
            private_key: pull_string(workload, PRIVATE_KEY_PATH)?,
            csr: pull_string(workload, CSR_PATH)?,
            certificate: pull_string(workload, CERTIFICATE_PATH)?,
            ca: pull_string(workload, CA_PATH)?,
        })
    }

    /// Removes every certificate file from workload storage
    pub fn clean_up<W: Workload>(workload: &mut W) -> Result<(), CharmError> {
        for path in &[PRIVATE_KEY_PATH, CSR_PATH, CERTIFICATE_PATH, CA_PATH] {
            workload.remove(path)?;
        }
        info!("Removed certificate material from workload");
        Ok(())
    }
}

/// Makes sure a private key and a CSR made from it exist in workload storage
///
/// With `renew`, a fresh CSR is made from the existing key. A stored key that doesn't parse is
/// replaced. Returns the key and the CSR.
pub fn ensure_key_and_csr<W: Workload>(
    workload: &mut W,
    stored: &StoredMaterial,
    sans: &[&str],
    renew: bool,
) -> Result<(String, String), CharmError> {
    let existing = stored.private_key.as_ref().filter(|pem| match private_key(pem) {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "Stored private key is unreadable, replacing it");
            false
        }
    });

    let key = match existing {
        Some(key) => key.clone(),
        None => {
            let key = generate_private_key()?;
            workload.push(PRIVATE_KEY_PATH, key.as_bytes())?;
            info!("Generated private key");
            key
        }
    };

    let usable = match &stored.csr {
        Some(csr) if !renew => csr_matches_key(csr, &key).unwrap_or(false),
        _ => false,
    };

    let csr = match (&stored.csr, usable) {
        (Some(csr), true) => csr.clone(),
        _ => {
            let csr = generate_csr(&key, COMMON_NAME, sans)?;
            workload.push(CSR_PATH, csr.as_bytes())?;
            info!(renew, "Generated certificate signing request");
            csr
        }
    };

    Ok((key, csr))
}

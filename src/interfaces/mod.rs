//! Typed payloads exchanged over each relation interface
//!
//! Decoding distinguishes a peer that simply hasn't published yet (`Decoded::Incomplete`) from
//! one that published garbage (`CharmError::MalformedPayload`). Encoding is total.
pub mod fiveg_core_gnb;
pub mod fiveg_n4;
pub mod ingress;
pub mod loki_push_api;
pub mod mongodb_client;
pub mod sdcore_config;
pub mod tls_certificates;

use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::error::CharmError;
use crate::model::DataBag;

/// Result of decoding a data bag that may not be fully populated yet
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// Every mandatory field is present and well-formed
    Complete(T),

    /// The relation exists but the peer hasn't published these fields yet
    Incomplete { missing: Vec<&'static str> },
}

impl<T> Decoded<T> {
    pub fn complete(self) -> Option<T> {
        match self {
            Decoded::Complete(t) => Some(t),
            Decoded::Incomplete { .. } => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Decoded::Complete(_) => true,
            Decoded::Incomplete { .. } => false,
        }
    }
}

/// A record carried in one data bag of a named interface
pub trait Payload: Sized {
    /// Interface name as declared in metadata.yaml
    const INTERFACE: &'static str;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError>;

    fn encode(&self) -> DataBag;
}

/// Reads fields out of a bag while remembering which mandatory ones were missing
pub(crate) struct Fields<'a> {
    interface: &'static str,
    bag: &'a DataBag,
    missing: Vec<&'static str>,
}

impl<'a> Fields<'a> {
    pub fn new(interface: &'static str, bag: &'a DataBag) -> Self {
        Self {
            interface,
            bag,
            missing: vec![],
        }
    }

    /// Returns the value of a mandatory field; empty values count as absent
    pub fn required(&mut self, key: &'static str) -> Option<&'a str> {
        let value = self.optional(key);
        if value.is_none() {
            self.missing.push(key);
        }
        value
    }

    /// Returns the value of an optional field; empty values count as absent
    pub fn optional(&self, key: &str) -> Option<&'a str> {
        self.bag
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn parse<T: FromStr>(&self, key: &str, value: &str) -> Result<T, CharmError>
    where
        T::Err: ToString,
    {
        value.parse().map_err(|err: T::Err| {
            CharmError::malformed(
                self.interface,
                format!("`{}` = `{}`: {}", key, value, err.to_string()),
            )
        })
    }

    pub fn json<T: DeserializeOwned>(&self, key: &str, value: &str) -> Result<T, CharmError> {
        serde_json::from_str(value).map_err(|err| {
            CharmError::malformed(self.interface, format!("`{}` is not valid: {}", key, err))
        })
    }

    pub fn malformed<R: Into<String>>(&self, reason: R) -> CharmError {
        CharmError::malformed(self.interface, reason)
    }

    pub fn incomplete<T>(self) -> Decoded<T> {
        Decoded::Incomplete {
            missing: self.missing,
        }
    }
}

/// Builds a data bag from string pairs
pub fn bag<K: Into<String>, V: Into<String>, I: IntoIterator<Item = (K, V)>>(pairs: I) -> DataBag {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

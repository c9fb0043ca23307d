//! `ingress`: asks a Traefik-style proxy to expose the NMS UI outside the cluster
//!
//! Values in both directions are JSON encoded.
use nom::bytes::complete::{tag, take_till1, take_while1};
use nom::combinator::{map, opt};
use nom::sequence::{terminated, tuple};
use nom::IResult;
use serde_derive::Deserialize;

use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "ingress";

/// Port the NMS UI and REST API listen on
pub const NMS_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRequest {
    pub model: String,
    pub name: String,
    pub port: u16,
    pub strip_prefix: bool,
    pub scheme: String,
}

impl IngressRequest {
    /// Request for the NMS UI of application `name` in `model`
    pub fn nms<M: Into<String>, N: Into<String>>(model: M, name: N) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
            port: NMS_PORT,
            strip_prefix: true,
            scheme: "https".into(),
        }
    }
}

impl Payload for IngressRequest {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);
        let model = fields.required("model");
        let name = fields.required("name");
        let port = fields.required("port");

        let (model, name, port) = match (model, name, port) {
            (Some(m), Some(n), Some(p)) => (m, n, p),
            _ => return Ok(fields.incomplete()),
        };

        let strip_prefix = match fields.optional("strip-prefix") {
            Some(raw) => fields.json("strip-prefix", raw)?,
            None => false,
        };
        let scheme = match fields.optional("scheme") {
            Some(raw) => fields.json("scheme", raw)?,
            None => "http".into(),
        };

        Ok(Decoded::Complete(Self {
            model: fields.json("model", model)?,
            name: fields.json("name", name)?,
            port: fields.json("port", port)?,
            strip_prefix,
            scheme,
        }))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("model".into(), json_string(&self.model));
        bag.insert("name".into(), json_string(&self.name));
        bag.insert("port".into(), self.port.to_string());
        bag.insert("strip-prefix".into(), self.strip_prefix.to_string());
        bag.insert("scheme".into(), json_string(&self.scheme));
        bag
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.into()).to_string()
}

#[derive(Debug, Deserialize)]
struct UrlEnvelope {
    url: String,
}

/// The externally visible URL handed back by the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressUrl {
    pub url: String,
}

/// Parses `scheme://host[:port][/path]`, returning `host[:port]`
fn parse_netloc(input: &str) -> IResult<&str, &str> {
    let scheme = terminated(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        tag("://"),
    );
    let netloc = take_till1(|c: char| c == '/' || c == '?');

    map(tuple((opt(scheme), netloc)), |(_, netloc)| netloc)(input)
}

impl IngressUrl {
    /// `host[:port]` of the URL
    pub fn netloc(&self) -> Option<&str> {
        parse_netloc(&self.url).ok().map(|(_, netloc)| netloc)
    }
}

impl Payload for IngressUrl {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);

        let raw = match fields.required("ingress") {
            Some(raw) => raw,
            None => return Ok(fields.incomplete()),
        };

        let envelope: UrlEnvelope = fields.json("ingress", raw)?;
        let url = IngressUrl { url: envelope.url };

        if url.netloc().is_none() {
            return Err(fields.malformed(format!("`{}` has no host", url.url)));
        }

        Ok(Decoded::Complete(url))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert(
            "ingress".into(),
            serde_json::json!({ "url": self.url }).to_string(),
        );
        bag
    }
}

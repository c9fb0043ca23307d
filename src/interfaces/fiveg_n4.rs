//! `fiveg_n4`: the address of a UPF's N4 (PFCP) interface
use serde_derive::{Deserialize, Serialize};

use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "fiveg_n4";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UpfEndpoint {
    pub hostname: String,
    pub port: u16,
}

impl Payload for UpfEndpoint {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);
        let hostname = fields.required("upf_hostname");
        let port = fields.required("upf_port");

        match (hostname, port) {
            (Some(hostname), Some(port)) => Ok(Decoded::Complete(Self {
                hostname: hostname.into(),
                port: fields.parse("upf_port", port)?,
            })),
            _ => Ok(fields.incomplete()),
        }
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("upf_hostname".into(), self.hostname.clone());
        bag.insert("upf_port".into(), self.port.to_string());
        bag
    }
}

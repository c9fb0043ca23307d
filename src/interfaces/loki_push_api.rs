//! `loki_push_api`: each Loki unit publishes the URL logs should be pushed to
use serde_derive::{Deserialize, Serialize};

use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "loki_push_api";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LokiEndpoint {
    pub url: String,
}

impl Payload for LokiEndpoint {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);

        let raw = match fields.required("endpoint") {
            Some(raw) => raw,
            None => return Ok(fields.incomplete()),
        };

        let endpoint: LokiEndpoint = fields.json("endpoint", raw)?;
        if endpoint.url.trim().is_empty() {
            return Err(fields.malformed("`endpoint` has an empty URL"));
        }

        Ok(Decoded::Complete(endpoint))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        let encoded = serde_json::to_string(self).unwrap_or_default();
        bag.insert("endpoint".into(), encoded);
        bag
    }
}

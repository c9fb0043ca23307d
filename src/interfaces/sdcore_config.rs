//! `sdcore_config`: where network functions find the NMS configuration service
use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "sdcore_config";

/// Port of the gRPC configuration service inside the workload
pub const GRPC_PORT: u16 = 9876;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebuiEndpoint {
    /// `host:port` of the configuration service
    pub webui_url: String,
}

impl WebuiEndpoint {
    /// The endpoint served by the Kubernetes service named after the application
    pub fn for_app(app_name: &str) -> Self {
        Self {
            webui_url: format!("{}:{}", app_name, GRPC_PORT),
        }
    }
}

impl Payload for WebuiEndpoint {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);

        match fields.required("webui_url") {
            Some(url) => Ok(Decoded::Complete(Self {
                webui_url: url.into(),
            })),
            None => Ok(fields.incomplete()),
        }
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("webui_url".into(), self.webui_url.clone());
        bag
    }
}

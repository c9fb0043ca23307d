//! Client for the NMS REST API, and the admin account the charm manages it with
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Certificate;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CharmError;
use crate::interfaces::fiveg_core_gnb::{GnbConfig, PlmnConfig};
use crate::interfaces::fiveg_n4::UpfEndpoint;
use crate::model::DataBag;

/// Label of the application secret holding the admin credentials
pub const LOGIN_SECRET_LABEL: &str = "NMS_LOGIN";

const ACCOUNTS_URL: &str = "config/v1/account";
const NETWORK_SLICE_URL: &str = "config/v1/network-slice";
const GNB_INVENTORY_URL: &str = "config/v1/inventory/gnb";
const UPF_INVENTORY_URL: &str = "config/v1/inventory/upf";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NmsStatus {
    pub initialized: bool,
}

/// A gNB as listed in a network slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceGnb {
    pub name: String,
    pub tac: u32,
}

/// TAC given to gNBs added to the inventory; operators adjust it through the NMS
pub const DEFAULT_TAC: u32 = 1;

/// A gNB as registered in the NMS inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryGnb {
    pub name: String,
    pub tac: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSlice {
    pub mcc: String,
    pub mnc: String,
    pub sst: u8,
    pub sd: Option<u32>,
    pub gnbs: Vec<SliceGnb>,
}

#[derive(Deserialize)]
struct RawSliceId {
    sst: Value,
    #[serde(default)]
    sd: Option<String>,
}

#[derive(Deserialize)]
struct RawPlmn {
    mcc: String,
    mnc: String,
}

#[derive(Deserialize)]
struct RawGnb {
    name: String,
    tac: Value,
}

#[derive(Deserialize)]
struct RawUpf {
    hostname: String,
    port: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSiteInfo {
    plmn: RawPlmn,
    #[serde(rename = "gNodeBs", default)]
    gnodebs: Vec<RawGnb>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawNetworkSlice {
    slice_id: RawSliceId,
    site_info: RawSiteInfo,
}

/// Numbers show up both as JSON numbers and as decimal strings
fn as_number(value: &Value, field: &str) -> Result<u64, CharmError> {
    let number = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.ok_or_else(|| CharmError::DeserError(format!("`{}` is not a number: {}", field, value)))
}

impl NetworkSlice {
    /// Parses a network slice as returned by the API
    ///
    /// The SD is transmitted as a hexadecimal string.
    pub fn from_json(value: Value) -> Result<Self, CharmError> {
        let raw: RawNetworkSlice = serde_json::from_value(value)?;

        let sst = as_number(&raw.slice_id.sst, "sst")?;
        let sst = u8::try_from(sst)
            .map_err(|_| CharmError::DeserError(format!("`sst` {} is out of range", sst)))?;

        let sd = match raw.slice_id.sd.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(hex) => Some(u32::from_str_radix(hex, 16).map_err(|err| {
                CharmError::DeserError(format!("`sd` is not hexadecimal: {}", err))
            })?),
        };

        let gnbs = raw
            .site_info
            .gnodebs
            .iter()
            .map(|gnb| {
                Ok(SliceGnb {
                    name: gnb.name.clone(),
                    tac: u32::try_from(as_number(&gnb.tac, "tac")?).map_err(|_| {
                        CharmError::DeserError(format!("`tac` of `{}` is out of range", gnb.name))
                    })?,
                })
            })
            .collect::<Result<_, CharmError>>()?;

        Ok(Self {
            mcc: raw.site_info.plmn.mcc,
            mnc: raw.site_info.plmn.mnc,
            sst,
            sd,
            gnbs,
        })
    }
}

impl InventoryGnb {
    fn from_json(value: Value) -> Result<Self, CharmError> {
        let raw: RawGnb = serde_json::from_value(value)?;
        let tac = u32::try_from(as_number(&raw.tac, "tac")?)
            .map_err(|_| CharmError::DeserError(format!("`tac` of `{}` is out of range", raw.name)))?;
        Ok(Self { name: raw.name, tac })
    }
}

fn upf_from_json(value: Value) -> Result<UpfEndpoint, CharmError> {
    let raw: RawUpf = serde_json::from_value(value)?;
    let port = u16::try_from(as_number(&raw.port, "port")?)
        .map_err(|_| CharmError::DeserError(format!("`port` of `{}` is out of range", raw.hostname)))?;
    Ok(UpfEndpoint {
        hostname: raw.hostname,
        port,
    })
}

/// Parses every entry of an inventory listing, dropping the ones that don't parse
fn parse_entries<T, F>(entries: Vec<Value>, parse: F) -> Vec<T>
where
    F: Fn(Value) -> Result<T, CharmError>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            let shown = entry.to_string();
            parse(entry)
                .map_err(|err| warn!(entry = %shown, error = %err, "Invalid inventory entry"))
                .ok()
        })
        .collect()
}

/// Network configuration each gNB should receive, keyed by gNB name
///
/// A gNB listed in several slices gets one PLMN per slice and the TAC of the first slice.
pub fn gnb_configs(slices: &[NetworkSlice]) -> BTreeMap<String, GnbConfig> {
    let mut configs: BTreeMap<String, GnbConfig> = BTreeMap::new();

    for slice in slices {
        let plmn = PlmnConfig {
            mcc: slice.mcc.clone(),
            mnc: slice.mnc.clone(),
            sst: slice.sst,
            sd: slice.sd,
        };

        for gnb in &slice.gnbs {
            configs
                .entry(gnb.name.clone())
                .or_insert_with(|| GnbConfig {
                    tac: gnb.tac,
                    plmns: vec![],
                })
                .plmns
                .push(plmn.clone());
        }
    }

    configs
}

/// Operations the charm performs against the NMS
pub trait NmsApi {
    /// Fails if the API can't be reached
    fn status(&self) -> Result<NmsStatus, CharmError>;

    fn create_first_user(&self, username: &str, password: &str) -> Result<(), CharmError>;

    /// Returns a session token, or `None` if the credentials were rejected
    fn login(&self, username: &str, password: &str) -> Result<Option<String>, CharmError>;

    fn token_is_valid(&self, token: &str) -> bool;

    /// Names of every network slice
    fn list_network_slices(&self, token: &str) -> Result<Vec<String>, CharmError>;

    fn get_network_slice(&self, name: &str, token: &str) -> Result<NetworkSlice, CharmError>;

    fn list_gnbs(&self, token: &str) -> Result<Vec<InventoryGnb>, CharmError>;

    fn create_gnb(&self, name: &str, tac: u32, token: &str) -> Result<(), CharmError>;

    fn delete_gnb(&self, name: &str, token: &str) -> Result<(), CharmError>;

    fn list_upfs(&self, token: &str) -> Result<Vec<UpfEndpoint>, CharmError>;

    fn create_upf(&self, upf: &UpfEndpoint, token: &str) -> Result<(), CharmError>;

    fn update_upf(&self, upf: &UpfEndpoint, token: &str) -> Result<(), CharmError>;

    fn delete_upf(&self, hostname: &str, token: &str) -> Result<(), CharmError>;
}

/// Makes the gNB inventory list exactly `wanted`
///
/// gNBs already registered keep their TAC; new ones get `DEFAULT_TAC`.
pub fn align_gnb_inventory<N: NmsApi>(
    nms: &N,
    wanted: &[String],
    token: &str,
) -> Result<(), CharmError> {
    let registered = nms.list_gnbs(token)?;

    for gnb in registered.iter().filter(|gnb| !wanted.contains(&gnb.name)) {
        nms.delete_gnb(&gnb.name, token)?;
        info!(gnb = %gnb.name, "Removed gNB from the NMS inventory");
    }

    for name in wanted {
        if registered.iter().any(|gnb| &gnb.name == name) {
            continue;
        }
        nms.create_gnb(name, DEFAULT_TAC, token)?;
        info!(gnb = %name, "Added gNB to the NMS inventory");
    }

    Ok(())
}

/// Makes the UPF inventory list exactly `wanted`, keyed by hostname
pub fn align_upf_inventory<N: NmsApi>(
    nms: &N,
    wanted: &[UpfEndpoint],
    token: &str,
) -> Result<(), CharmError> {
    let registered = nms.list_upfs(token)?;

    for upf in &registered {
        if !wanted.iter().any(|w| w.hostname == upf.hostname) {
            nms.delete_upf(&upf.hostname, token)?;
            info!(upf = %upf.hostname, "Removed UPF from the NMS inventory");
        }
    }

    for upf in wanted {
        match registered.iter().find(|r| r.hostname == upf.hostname) {
            Some(existing) if existing.port == upf.port => {}
            Some(_) => {
                nms.update_upf(upf, token)?;
                info!(upf = %upf.hostname, port = upf.port, "Updated UPF in the NMS inventory");
            }
            None => {
                nms.create_upf(upf, token)?;
                info!(upf = %upf.hostname, port = upf.port, "Added UPF to the NMS inventory");
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct GnbParams {
    tac: String,
}

#[derive(Serialize)]
struct UpfParams {
    port: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// `NmsApi` over HTTPS
#[derive(Debug, Clone)]
pub struct NmsClient {
    url: String,
    client: Client,
}

impl NmsClient {
    /// Builds a client for the API at `url`, trusting `ca_pem` if given
    ///
    /// Without a CA, certificate verification is disabled; the NMS serves a certificate from
    /// the `certificates` relation, whose CA may not be stored yet.
    pub fn new(url: &str, ca_pem: Option<&[u8]>) -> Result<Self, CharmError> {
        let mut builder = Client::builder().timeout(TIMEOUT).use_rustls_tls();
        builder = match ca_pem {
            Some(pem) => builder.add_root_certificate(Certificate::from_pem(pem)?),
            None => builder.danger_accept_invalid_certs(true),
        };

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CharmError> {
        let response = request.send()?.error_for_status()?;
        Ok(response.json()?)
    }

    /// Sends a request whose response body doesn't matter
    fn execute(&self, request: RequestBuilder) -> Result<(), CharmError> {
        request.send()?.error_for_status()?;
        Ok(())
    }

    fn list(&self, path: &str, token: &str) -> Result<Vec<Value>, CharmError> {
        let entries: Option<Vec<Value>> =
            self.send(self.client.get(&self.endpoint(path)).bearer_auth(token))?;
        Ok(entries.unwrap_or_default())
    }
}

impl NmsApi for NmsClient {
    fn status(&self) -> Result<NmsStatus, CharmError> {
        self.send(self.client.get(&self.endpoint("status")))
    }

    fn create_first_user(&self, username: &str, password: &str) -> Result<(), CharmError> {
        debug!(username, "Creating first NMS user");
        self.client
            .post(&self.endpoint(ACCOUNTS_URL))
            .json(&Credentials { username, password })
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn login(&self, username: &str, password: &str) -> Result<Option<String>, CharmError> {
        let response = self
            .client
            .post(&self.endpoint("login"))
            .json(&Credentials { username, password })
            .send()?;

        if response.status().is_client_error() {
            return Ok(None);
        }
        let login: LoginResponse = response.error_for_status()?.json()?;
        Ok(Some(login.token).filter(|t| !t.is_empty()))
    }

    fn token_is_valid(&self, token: &str) -> bool {
        self.client
            .get(&self.endpoint(ACCOUNTS_URL))
            .bearer_auth(token)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn list_network_slices(&self, token: &str) -> Result<Vec<String>, CharmError> {
        let names: Option<Vec<String>> =
            self.send(self.client.get(&self.endpoint(NETWORK_SLICE_URL)).bearer_auth(token))?;
        Ok(names.unwrap_or_default())
    }

    fn get_network_slice(&self, name: &str, token: &str) -> Result<NetworkSlice, CharmError> {
        let url = self.endpoint(&format!("{}/{}", NETWORK_SLICE_URL, name));
        let raw: Value = self.send(self.client.get(&url).bearer_auth(token))?;
        NetworkSlice::from_json(raw)
    }

    fn list_gnbs(&self, token: &str) -> Result<Vec<InventoryGnb>, CharmError> {
        Ok(parse_entries(self.list(GNB_INVENTORY_URL, token)?, InventoryGnb::from_json))
    }

    fn create_gnb(&self, name: &str, tac: u32, token: &str) -> Result<(), CharmError> {
        let url = self.endpoint(&format!("{}/{}", GNB_INVENTORY_URL, name));
        let params = GnbParams {
            tac: tac.to_string(),
        };
        self.execute(self.client.post(&url).bearer_auth(token).json(&params))
    }

    fn delete_gnb(&self, name: &str, token: &str) -> Result<(), CharmError> {
        let url = self.endpoint(&format!("{}/{}", GNB_INVENTORY_URL, name));
        self.execute(self.client.delete(&url).bearer_auth(token))
    }

    fn list_upfs(&self, token: &str) -> Result<Vec<UpfEndpoint>, CharmError> {
        Ok(parse_entries(self.list(UPF_INVENTORY_URL, token)?, upf_from_json))
    }

    fn create_upf(&self, upf: &UpfEndpoint, token: &str) -> Result<(), CharmError> {
        let url = self.endpoint(&format!("{}/{}", UPF_INVENTORY_URL, upf.hostname));
        let params = UpfParams {
            port: upf.port.to_string(),
        };
        self.execute(self.client.post(&url).bearer_auth(token).json(&params))
    }

    fn update_upf(&self, upf: &UpfEndpoint, token: &str) -> Result<(), CharmError> {
        let url = self.endpoint(&format!("{}/{}", UPF_INVENTORY_URL, upf.hostname));
        let params = UpfParams {
            port: upf.port.to_string(),
        };
        self.execute(self.client.put(&url).bearer_auth(token).json(&params))
    }

    fn delete_upf(&self, hostname: &str, token: &str) -> Result<(), CharmError> {
        let url = self.endpoint(&format!("{}/{}", UPF_INVENTORY_URL, hostname));
        self.execute(self.client.delete(&url).bearer_auth(token))
    }
}

/// Credentials of the admin user the charm creates in the NMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
    pub token: Option<String>,
}

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

fn pick<R: Rng>(rng: &mut R, charset: &[u8]) -> char {
    charset[rng.gen_range(0..charset.len())] as char
}

impl AdminAccount {
    /// A `charm-admin-XXXX` user with an 11 character password mixing lowercase, uppercase
    /// and digits
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let suffix: String = (0..4).map(|_| pick(&mut rng, UPPER)).collect();

        let alphanumeric = [LOWER, UPPER, DIGITS].concat();
        let mut password = vec![
            pick(&mut rng, LOWER),
            pick(&mut rng, UPPER),
            pick(&mut rng, DIGITS),
        ];
        password.extend((0..8).map(|_| pick(&mut rng, &alphanumeric)));
        password.shuffle(&mut rng);

        Self {
            username: format!("charm-admin-{}", suffix),
            password: password.into_iter().collect(),
            token: None,
        }
    }

    /// Reads the account back from its secret; a secret without credentials is ignored
    pub fn from_secret(content: &DataBag) -> Option<Self> {
        let username = content.get("username").filter(|u| !u.is_empty())?;
        let password = content.get("password").filter(|p| !p.is_empty())?;

        Some(Self {
            username: username.clone(),
            password: password.clone(),
            token: content.get("token").filter(|t| !t.is_empty()).cloned(),
        })
    }

    pub fn to_secret(&self) -> DataBag {
        let mut content = DataBag::new();
        content.insert("username".into(), self.username.clone());
        content.insert("password".into(), self.password.clone());
        if let Some(token) = &self.token {
            content.insert("token".into(), token.clone());
        }
        content
    }
}

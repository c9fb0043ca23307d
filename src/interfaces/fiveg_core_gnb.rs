//! `fiveg_core_gnb`: gNBs announce their name, the core answers with the network
//! configuration they should serve
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::anychar;
use nom::combinator::{all_consuming, recognize, verify};
use nom::sequence::pair;
use nom::IResult;
use serde_derive::{Deserialize, Serialize};

use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "fiveg_core_gnb";

/// Largest 24-bit value, used by both the TAC and the slice differentiator
const MAX_24_BIT: u32 = 0x00ff_ffff;

/// Matches a name starting with a letter followed by 1-255 letters, digits, dashes or underscores
fn gnb_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        verify(anychar, |c: &char| c.is_ascii_alphabetic()),
        take_while_m_n(1, 255, |c: char| {
            c.is_ascii_alphanumeric() || c == '-' || c == '_'
        }),
    ))(input)
}

/// Matches between `min` and `max` ASCII digits
fn digits(input: &str, min: usize, max: usize) -> IResult<&str, &str> {
    take_while_m_n(min, max, |c: char| c.is_ascii_digit())(input)
}

fn all_digits(input: &str, min: usize, max: usize) -> bool {
    all_consuming(|i| digits(i, min, max))(input).is_ok()
}

/// The name a gNB publishes about itself
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GnbIdentity {
    pub name: String,
}

impl Payload for GnbIdentity {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);

        let name = match fields.required("gnb-name") {
            Some(name) => name,
            None => return Ok(fields.incomplete()),
        };

        if all_consuming(gnb_name)(name).is_err() {
            return Err(fields.malformed(format!("`{}` is not a valid gNB name", name)));
        }

        Ok(Decoded::Complete(Self { name: name.into() }))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("gnb-name".into(), self.name.clone());
        bag
    }
}

/// One PLMN the gNB should broadcast, with the slice it serves
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlmnConfig {
    pub mcc: String,
    pub mnc: String,
    pub sst: u8,
    pub sd: Option<u32>,
}

impl PlmnConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !all_digits(&self.mcc, 3, 3) {
            return Err(format!("MCC `{}` must be 3 digits", self.mcc));
        }
        if !all_digits(&self.mnc, 2, 3) {
            return Err(format!("MNC `{}` must be 2 or 3 digits", self.mnc));
        }
        match self.sd {
            Some(sd) if sd > MAX_24_BIT => Err(format!("SD `{}` does not fit in 24 bits", sd)),
            _ => Ok(()),
        }
    }
}

/// Network configuration published to a gNB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnbConfig {
    /// Tracking area code
    pub tac: u32,
    pub plmns: Vec<PlmnConfig>,
}

impl GnbConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tac == 0 || self.tac > MAX_24_BIT {
            return Err(format!("TAC `{}` must be between 1 and {}", self.tac, MAX_24_BIT));
        }
        if self.plmns.is_empty() {
            return Err("at least one PLMN is required".into());
        }
        self.plmns.iter().try_for_each(PlmnConfig::validate)
    }
}

impl Payload for GnbConfig {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);
        let tac = fields.required("tac");
        let plmns = fields.required("plmns");

        let (tac, plmns) = match (tac, plmns) {
            (Some(tac), Some(plmns)) => (tac, plmns),
            _ => return Ok(fields.incomplete()),
        };

        let config = Self {
            tac: fields.parse("tac", tac)?,
            plmns: fields.json("plmns", plmns)?,
        };
        config.validate().map_err(|reason| fields.malformed(reason))?;

        Ok(Decoded::Complete(config))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("tac".into(), self.tac.to_string());
        let plmns = serde_json::to_string(&self.plmns).unwrap_or_else(|_| "[]".into());
        bag.insert("plmns".into(), plmns);
        bag
    }
}

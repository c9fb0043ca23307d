//! Parsing for the Juju dispatch path into the event that triggered the hook
//!
//! Every event funnels into the same reconciliation pass; the kind is only used
//! for event-scoped teardown and for logging.

use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_until};
use nom::character::complete::digit1;
use nom::combinator::{all_consuming, map, map_res, opt, rest};
use nom::sequence::{preceded, separated_pair, terminated, tuple};
use nom::IResult;

use crate::model::RelationId;

/// Which point of a relation's lifecycle a hook reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationHook {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

/// The event that caused the charm to be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Start,
    UpgradeCharm,
    LeaderElected,
    ConfigChanged,
    UpdateStatus,
    /// Renewal of the issued certificate is due
    CertificateExpiring,
    Relation {
        endpoint: String,
        hook: RelationHook,
    },
    /// The workload container's Pebble became reachable
    WorkloadReady {
        container: String,
    },
    /// The workload emitted a custom notice, e.g. after a network slice change
    WorkloadNotice {
        container: String,
    },
    Other(String),
}

impl EventKind {
    /// Returns true when this event reports `endpoint` losing its relation
    pub fn is_broken(&self, endpoint: &str) -> bool {
        match self {
            EventKind::Relation {
                endpoint: e,
                hook: RelationHook::Broken,
            } => e == endpoint,
            _ => false,
        }
    }
}

fn parse_relation_hook(input: &str) -> IResult<&str, RelationHook> {
    alt((
        map(tag("created"), |_| RelationHook::Created),
        map(tag("joined"), |_| RelationHook::Joined),
        map(tag("changed"), |_| RelationHook::Changed),
        map(tag("departed"), |_| RelationHook::Departed),
        map(tag("broken"), |_| RelationHook::Broken),
    ))(input)
}

/// Parses `<endpoint>-relation-<hook>`
fn parse_relation_event(input: &str) -> IResult<&str, EventKind> {
    map(
        all_consuming(separated_pair(
            take_until("-relation-"),
            tag("-relation-"),
            parse_relation_hook,
        )),
        |(endpoint, hook): (&str, RelationHook)| EventKind::Relation {
            endpoint: endpoint.to_string(),
            hook,
        },
    )(input)
}

/// Parses `<container>-pebble-ready` and `<container>-pebble-custom-notice`
fn parse_pebble_event(input: &str) -> IResult<&str, EventKind> {
    let (remainder, (container, _, which)) = all_consuming(tuple((
        take_until("-pebble-"),
        tag("-pebble-"),
        alt((tag("ready"), tag("custom-notice"))),
    )))(input)?;

    let container = container.to_string();
    let kind = match which {
        "ready" => EventKind::WorkloadReady { container },
        _ => EventKind::WorkloadNotice { container },
    };

    Ok((remainder, kind))
}

fn parse_simple_event(input: &str) -> IResult<&str, EventKind> {
    all_consuming(alt((
        map(tag("install"), |_| EventKind::Install),
        map(tag("start"), |_| EventKind::Start),
        map(tag("upgrade-charm"), |_| EventKind::UpgradeCharm),
        map(tag("leader-elected"), |_| EventKind::LeaderElected),
        map(tag("config-changed"), |_| EventKind::ConfigChanged),
        map(tag("update-status"), |_| EventKind::UpdateStatus),
        map(tag("certificate-expiring"), |_| EventKind::CertificateExpiring),
    )))(input)
}

/// Parses a full dispatch path such as `hooks/fiveg_n4-relation-changed`
fn parse_dispatch_path(input: &str) -> IResult<&str, EventKind> {
    preceded(
        opt(tag("hooks/")),
        alt((
            parse_simple_event,
            parse_relation_event,
            parse_pebble_event,
            map(rest, |other: &str| EventKind::Other(other.to_string())),
        )),
    )(input)
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, kind) = parse_dispatch_path(s.trim())
            .map_err(|err| format!("Couldn't parse dispatch path: {:?}", err))?;
        Ok(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventKind::Install => write!(f, "install"),
            EventKind::Start => write!(f, "start"),
            EventKind::UpgradeCharm => write!(f, "upgrade-charm"),
            EventKind::LeaderElected => write!(f, "leader-elected"),
            EventKind::ConfigChanged => write!(f, "config-changed"),
            EventKind::UpdateStatus => write!(f, "update-status"),
            EventKind::CertificateExpiring => write!(f, "certificate-expiring"),
            EventKind::Relation { endpoint, hook } => {
                let hook = match hook {
                    RelationHook::Created => "created",
                    RelationHook::Joined => "joined",
                    RelationHook::Changed => "changed",
                    RelationHook::Departed => "departed",
                    RelationHook::Broken => "broken",
                };
                write!(f, "{}-relation-{}", endpoint, hook)
            }
            EventKind::WorkloadReady { container } => write!(f, "{}-pebble-ready", container),
            EventKind::WorkloadNotice { container } => {
                write!(f, "{}-pebble-custom-notice", container)
            }
            EventKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Parses `JUJU_RELATION_ID`, which looks like `common_database:3`
pub fn parse_relation_id(input: &str) -> Result<RelationId, String> {
    let parsed: IResult<&str, u32> = all_consuming(preceded(
        opt(terminated(take_until(":"), tag(":"))),
        map_res(digit1, |id: &str| id.parse::<u32>()),
    ))(input.trim());

    parsed
        .map(|(_, id)| RelationId(id))
        .map_err(|err| format!("Couldn't parse relation id `{}`: {:?}", input, err))
}

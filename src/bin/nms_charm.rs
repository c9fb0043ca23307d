//! Dispatch entry point: Juju runs this for every hook the charm receives

use std::env;
use std::path::PathBuf;

use ex::fs::read;
use failure::{format_err, Error};
use structopt::{self, StructOpt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sdcore_nms::applied::FileAppliedStore;
use sdcore_nms::definition::CharmDefinition;
use sdcore_nms::hook::{parse_relation_id, EventKind, RelationHook};
use sdcore_nms::interfaces::ingress::NMS_PORT;
use sdcore_nms::nms::NmsClient;
use sdcore_nms::paths;
use sdcore_nms::reconciler::{Phase, Reconciler};
use sdcore_nms::render;
use sdcore_nms::runtime::{HookTools, Runtime};
use sdcore_nms::workload::MountedWorkload;

/// Storage holding the certificates, as named in metadata.yaml
const CERTS_STORAGE: &str = "certs";

#[derive(StructOpt, Debug)]
#[structopt(about = "Reconciles the SD-Core NMS with its relations")]
struct Options {
    #[structopt(long = "charm-dir", parse(from_os_str))]
    #[structopt(help = "Directory holding metadata.yaml and config.yaml. Defaults to $JUJU_CHARM_DIR")]
    charm_dir: Option<PathBuf>,

    #[structopt(long = "event")]
    #[structopt(help = "Event to handle, instead of the one in $JUJU_DISPATCH_PATH")]
    event: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("NMS_CHARM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Error> {
    init_logging();

    let options = Options::from_args();

    let raw_event = match options.event {
        Some(event) => event,
        None => env::var("JUJU_DISPATCH_PATH")
            .map_err(|_| format_err!("Neither --event nor $JUJU_DISPATCH_PATH is set"))?,
    };
    let event: EventKind = raw_event.parse().map_err(|err: String| format_err!("{}", err))?;

    let charm_dir = options.charm_dir.unwrap_or_else(paths::charm_dir);
    let definition = CharmDefinition::load(charm_dir)?;

    let mut runtime = HookTools::new();
    if let EventKind::Relation {
        hook: RelationHook::Broken,
        ..
    } = &event
    {
        if let Ok(id) = env::var("JUJU_RELATION_ID") {
            let id = parse_relation_id(&id).map_err(|err| format_err!("{}", err))?;
            runtime = runtime.without_relation(id);
        }
    }

    let snapshot = runtime.snapshot(&definition)?;
    let workload = MountedWorkload::new(&definition, render::CONTAINER)?;

    let ca_path = paths::storage_dir(CERTS_STORAGE).join("ca.pem");
    let ca = match read(&ca_path) {
        Ok(ca) => Some(ca),
        Err(err) => {
            info!(error = %err, "No CA certificate stored yet");
            None
        }
    };
    let url = format!("https://{}:{}", snapshot.unit.fqdn, NMS_PORT);
    let nms = NmsClient::new(&url, ca.as_deref())?;

    let mut reconciler =
        Reconciler::new(definition, workload, runtime, FileAppliedStore::in_state_dir())
            .with_nms(nms);
    let outcome = reconciler.handle_event(&event, &snapshot);

    if outcome.phase == Phase::Error {
        warn!(status = %outcome.status, "Pass failed, waiting for the next event to retry");
    }

    Ok(())
}

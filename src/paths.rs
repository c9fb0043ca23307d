//! Presents functions related to locating charm and unit directories

use std::env;
use std::path::PathBuf;

use dirs::home_dir;

/// Default root under which Juju mounts storage into the charm container
pub const JUJU_STORAGE_ROOT: &str = "/var/lib/juju/storage";

/// Get a dir from an env var and subpath
fn dir_from_env(env_var: &str, suffix: PathBuf) -> PathBuf {
    env::var(env_var).map(PathBuf::from).unwrap_or_else(|_| {
        home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(suffix)
    })
}

/// Directory holding `metadata.yaml` and `config.yaml`
pub fn charm_dir() -> PathBuf {
    if let Ok(p) = env::var("JUJU_CHARM_DIR") {
        p.into()
    } else {
        env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Directory where the unit keeps state between hook invocations
pub fn unit_state_dir() -> PathBuf {
    dir_from_env("NMS_CHARM_STATE_DIR", ".local/share/sdcore-nms".into())
}

/// Charm-side location of the first instance of the named storage
pub fn storage_dir(storage: &str) -> PathBuf {
    env::var("JUJU_STORAGE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(JUJU_STORAGE_ROOT))
        .join(storage)
        .join("0")
}

/// Pebble socket of a workload container, as exposed to the charm container
pub fn pebble_socket(container: &str) -> PathBuf {
    PathBuf::from("/charm/containers")
        .join(container)
        .join("pebble.socket")
}

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", tag = "type")]
pub enum Storage {
    #[serde(rename_all = "kebab-case")]
    Filesystem {
        /// Description of the storage requested
        #[serde(default)]
        description: Option<String>,

        /// The mount location for filesystem stores
        #[serde(default)]
        location: Option<String>,

        /// Minimum size of requested storage in forms G, GiB, GB
        #[serde(default)]
        minimum_size: Option<String>,

        /// Indicates if the storage should be made read-only (where possible)
        #[serde(default)]
        read_only: bool,
    },
    #[serde(rename_all = "kebab-case")]
    Block {
        #[serde(default)]
        description: Option<String>,

        #[serde(default)]
        minimum_size: Option<String>,
    },
}

pub mod aggregate;
pub mod applied;
pub mod cmd;
pub mod config;
pub mod definition;
pub mod error;
pub mod hook;
pub mod interfaces;
pub mod model;
pub mod nms;
pub mod paths;
pub mod pebble;
pub mod reconciler;
pub mod render;
pub mod runtime;
pub mod tls;
pub mod workload;

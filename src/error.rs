use std::io::Error as IOError;

use ex::io::Error as ExIOError;
use failure::Fail;
use openssl::error::ErrorStack;
use reqwest::Error as HttpError;
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;

#[derive(Debug, Fail)]
pub enum CharmError {
    #[fail(display = "I/O error: {}", _0)]
    IOError(IOError),

    #[fail(display = "I/O error: {}", _0)]
    ExIOError(#[fail(cause)] ExIOError),

    #[fail(display = "YAML Error: {}", _0)]
    YamlError(YamlError),

    #[fail(display = "JSON Error: {}", _0)]
    JsonError(JsonError),

    #[fail(display = "HTTP Error: {}", _0)]
    HttpError(HttpError),

    #[fail(display = "TLS Error: {}", _0)]
    TlsError(ErrorStack),

    #[fail(display = "Failed to deserialize: {}", _0)]
    DeserError(String),

    #[fail(display = "Error while running {}: {}", _0, _1)]
    SubcommandError(String, String),

    #[fail(display = "Capability `{}` is not available", _0)]
    MissingCapability(String),

    #[fail(display = "Malformed `{}` payload: {}", interface, reason)]
    MalformedPayload { interface: String, reason: String },

    #[fail(display = "Workload unavailable: {}", _0)]
    WorkloadUnavailable(String),

    #[fail(
        display = "Endpoint `{}` has {} relations but allows at most {}",
        endpoint, count, limit
    )]
    ConfigurationConflict {
        endpoint: String,
        count: usize,
        limit: u32,
    },

    #[fail(display = "The following configurations are not valid: {:?}", _0)]
    InvalidConfig(Vec<String>),

    #[fail(display = "Endpoint `{}` is not declared in metadata.yaml", _0)]
    UnknownEndpoint(String),
}

impl CharmError {
    pub fn malformed<I: Into<String>, R: Into<String>>(interface: I, reason: R) -> Self {
        CharmError::MalformedPayload {
            interface: interface.into(),
            reason: reason.into(),
        }
    }
}

impl From<IOError> for CharmError {
    fn from(err: IOError) -> Self {
        CharmError::IOError(err)
    }
}

impl From<ExIOError> for CharmError {
    fn from(err: ExIOError) -> Self {
        CharmError::ExIOError(err)
    }
}

impl From<YamlError> for CharmError {
    fn from(err: YamlError) -> Self {
        CharmError::YamlError(err)
    }
}

impl From<JsonError> for CharmError {
    fn from(err: JsonError) -> Self {
        CharmError::JsonError(err)
    }
}

impl From<HttpError> for CharmError {
    fn from(err: HttpError) -> Self {
        CharmError::HttpError(err)
    }
}

impl From<ErrorStack> for CharmError {
    fn from(err: ErrorStack) -> Self {
        CharmError::TlsError(err)
    }
}

impl From<CharmError> for String {
    fn from(err: CharmError) -> Self {
        format!("{}", err)
    }
}

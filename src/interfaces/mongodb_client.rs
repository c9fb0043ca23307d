//! `mongodb_client`: database credentials handed out by a MongoDB provider
use super::{Decoded, Fields, Payload};
use crate::error::CharmError;
use crate::model::DataBag;

const INTERFACE: &str = "mongodb_client";

/// What the requirer asks for, written to its application bag
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRequest {
    pub database: String,
    pub extra_user_roles: String,
}

impl DatabaseRequest {
    /// Request an admin user on `database`
    pub fn admin<S: Into<String>>(database: S) -> Self {
        Self {
            database: database.into(),
            extra_user_roles: "admin".into(),
        }
    }
}

impl Payload for DatabaseRequest {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);
        let database = fields.required("database");
        let roles = fields.optional("extra-user-roles").unwrap_or_default();

        match database {
            Some(database) => Ok(Decoded::Complete(Self {
                database: database.into(),
                extra_user_roles: roles.into(),
            })),
            None => Ok(fields.incomplete()),
        }
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("database".into(), self.database.clone());
        bag.insert("extra-user-roles".into(), self.extra_user_roles.clone());
        bag
    }
}

/// What the provider publishes once the database and user exist
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,

    /// Connection URIs, in the order the provider listed them
    pub uris: Vec<String>,

    pub database_name: Option<String>,
    pub replica_set_name: Option<String>,
}

impl DatabaseCredentials {
    /// The URI the workload connects to
    pub fn primary_uri(&self) -> &str {
        self.uris.first().map(String::as_str).unwrap_or_default()
    }
}

impl Payload for DatabaseCredentials {
    const INTERFACE: &'static str = INTERFACE;

    fn decode(bag: &DataBag) -> Result<Decoded<Self>, CharmError> {
        let mut fields = Fields::new(INTERFACE, bag);
        let username = fields.required("username");
        let password = fields.required("password");
        let uris = fields.required("uris");

        let (username, password, uris) = match (username, password, uris) {
            (Some(u), Some(p), Some(uris)) => (u, p, uris),
            _ => return Ok(fields.incomplete()),
        };

        let uris: Vec<String> = uris
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .collect();

        if uris.is_empty() {
            return Err(fields.malformed("`uris` contains no connection URI"));
        }

        Ok(Decoded::Complete(Self {
            username: username.into(),
            password: password.into(),
            uris,
            database_name: fields.optional("database-name").map(String::from),
            replica_set_name: fields.optional("replica-set-name").map(String::from),
        }))
    }

    fn encode(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("username".into(), self.username.clone());
        bag.insert("password".into(), self.password.clone());
        bag.insert("uris".into(), self.uris.join(","));
        if let Some(name) = &self.database_name {
            bag.insert("database-name".into(), name.clone());
        }
        if let Some(name) = &self.replica_set_name {
            bag.insert("replica-set-name".into(), name.clone());
        }
        bag
    }
}

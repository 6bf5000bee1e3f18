//! Logged messaging accounts

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Object path prefix shared by every account path
pub const ACCOUNT_OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/Account/";

/// A messaging account whose conversations have been logged
///
/// The identifier is the account path relative to
/// [`ACCOUNT_OBJECT_PATH_BASE`], e.g. `gabble/jabber/user_40collabora_2eco_2euk`.
/// Stores that lay out their directories by protocol and login name (the
/// Pidgin store) read those from `protocol` and the `account` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    id: String,
    protocol: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl Account {
    /// Create an account from its object path or relative identifier
    pub fn new(path: impl AsRef<str>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let id = path.strip_prefix(ACCOUNT_OBJECT_PATH_BASE).unwrap_or(path);
        if id.is_empty() {
            return Err(CoreError::EmptyIdentifier("account"));
        }
        Ok(Self {
            id: id.to_string(),
            protocol: None,
            parameters: BTreeMap::new(),
        })
    }

    /// Set the protocol name (`jabber`, `irc`, ...)
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Add a connection parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Identifier relative to the account object path base
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full account object path
    pub fn object_path(&self) -> String {
        format!("{}{}", ACCOUNT_OBJECT_PATH_BASE, self.id)
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

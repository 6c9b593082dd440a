use std::fmt;

use serde::{Deserialize, Serialize};

/// Username recorded for internal operations with no authenticated caller.
pub const SYSTEM_USERNAME: &str = "(system)";
pub const SYSTEM_ADDRESS: &str = "127.0.0.1";

/// The actor on whose behalf a change is made.
///
/// Authentication happens outside this crate; a `Client` only carries what
/// the audit trail records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub username: String,
    pub ip_address: String,
}

impl Client {
    pub fn new(username: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ip_address: ip_address.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_USERNAME, SYSTEM_ADDRESS)
    }

    pub fn is_system(&self) -> bool {
        self.username == SYSTEM_USERNAME
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.ip_address)
    }
}

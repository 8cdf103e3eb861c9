use std::fmt;

use crate::utils::{HubError, Result};

/// Who a connection belongs to.
///
/// `primary_id` is the identity the client connects as (e.g. a user);
/// `group_id` is the scope it receives broadcasts for (e.g. a workspace).
/// Both are fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    primary_id: String,
    group_id: String,
}

impl ClientIdentity {
    /// Builds an identity, rejecting blank components.
    pub fn new(primary_id: impl Into<String>, group_id: impl Into<String>) -> Result<Self> {
        let identity = Self {
            primary_id: primary_id.into(),
            group_id: group_id.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn validate(&self) -> Result<()> {
        if self.primary_id.trim().is_empty() {
            return Err(HubError::InvalidIdentity("primary id is empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(HubError::InvalidIdentity("group id is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.primary_id, self.group_id)
    }
}

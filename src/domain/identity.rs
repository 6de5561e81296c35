use crate::error::{BookingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is asking for a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequesterIdentity {
    User {
        user_id: String,
    },
    Guest {
        name: String,
        email: String,
        phone: Option<String>,
    },
}

impl RequesterIdentity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    pub fn guest(name: impl Into<String>, email: impl Into<String>, phone: Option<String>) -> Self {
        Self::Guest {
            name: name.into(),
            email: email.into(),
            phone,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::User { user_id } if user_id.trim().is_empty() => Err(
                BookingError::InvalidRequest("user id must not be empty".to_string()),
            ),
            Self::Guest { email, .. } if !email.contains('@') => Err(
                BookingError::InvalidRequest(format!("guest email '{}' is not valid", email)),
            ),
            _ => Ok(()),
        }
    }

    /// Users match by id, guests by email (case-insensitive).
    pub fn same_requester(&self, other: &RequesterIdentity) -> bool {
        match (self, other) {
            (Self::User { user_id: a }, Self::User { user_id: b }) => a == b,
            (Self::Guest { email: a, .. }, Self::Guest { email: b, .. }) => {
                a.trim().eq_ignore_ascii_case(b.trim())
            }
            _ => false,
        }
    }
}

impl fmt::Display for RequesterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { user_id } => write!(f, "user:{}", user_id),
            Self::Guest { email, .. } => write!(f, "guest:{}", email),
        }
    }
}

/// The identity behind a call plus whether it may act on anyone's reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub identity: RequesterIdentity,
    pub admin: bool,
}

impl Actor {
    pub fn requester(identity: RequesterIdentity) -> Self {
        Self {
            identity,
            admin: false,
        }
    }

    pub fn admin(identity: RequesterIdentity) -> Self {
        Self {
            identity,
            admin: true,
        }
    }

    pub fn can_manage(&self, owner: &RequesterIdentity) -> bool {
        self.admin || self.identity.same_requester(owner)
    }
}

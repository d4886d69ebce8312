//! Registered WebAuthn authenticators.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::ModelError;

/// A registered security key. `public_key` is encrypted at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct WebauthnDevice {
    /// Database id, `None` until persisted.
    pub id: Option<i64>,
    /// Owner of the device.
    pub username: String,
    /// Operator facing name, unique per user.
    pub description: String,
    /// Credential id, base64 encoded.
    pub kid: String,
    /// COSE encoded public key.
    pub public_key: Vec<u8>,
    /// When the device was registered.
    pub created_at: DateTime<Utc>,
}

impl WebauthnDevice {
    /// Creates a new unsaved device.
    pub fn new(
        username: impl Into<String>,
        description: impl Into<String>,
        kid: impl Into<String>,
        public_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: None,
            username: username.into(),
            description: description.into(),
            kid: kid.into(),
            public_key: public_key.into(),
            created_at: Utc::now(),
        }
    }

    /// Checks the invariants that the store relies on.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.username.is_empty() || self.username.chars().count() > 100 {
            return Err(ModelError::InvalidUsername(self.username.clone()));
        }
        if self.description.is_empty() || self.description.chars().count() > 64 {
            return Err(ModelError::InvalidDescription(self.description.clone()));
        }
        if self.public_key.is_empty() {
            return Err(ModelError::EmptySecret);
        }
        Ok(())
    }
}

impl fmt::Debug for WebauthnDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebauthnDevice")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("description", &self.description)
            .field("kid", &self.kid)
            .field("public_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

//! Time based one time password configurations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::ModelError;

/// Issuer used when a configuration does not name one.
pub const DEFAULT_ISSUER: &str = "Authelia";

/// Default number of digits.
pub const DEFAULT_DIGITS: u32 = 6;

/// Default period in seconds.
pub const DEFAULT_PERIOD: u32 = 30;

/// Longest username accepted, matching the column width.
pub const MAX_USERNAME_LENGTH: usize = 100;

/// HMAC algorithm used to compute codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TotpAlgorithm {
    /// HMAC-SHA1.
    #[default]
    Sha1,
    /// HMAC-SHA256.
    Sha256,
    /// HMAC-SHA512.
    Sha512,
}

impl TotpAlgorithm {
    /// The canonical upper case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TotpAlgorithm::Sha1 => "SHA1",
            TotpAlgorithm::Sha256 => "SHA256",
            TotpAlgorithm::Sha512 => "SHA512",
        }
    }
}

impl fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TotpAlgorithm {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA1" => Ok(TotpAlgorithm::Sha1),
            "SHA256" => Ok(TotpAlgorithm::Sha256),
            "SHA512" => Ok(TotpAlgorithm::Sha512),
            _ => Err(ModelError::InvalidAlgorithm(s.to_string())),
        }
    }
}

/// A user's TOTP configuration.
///
/// `secret` holds the plaintext shared secret as provisioned (base32 text).
/// It is only ever persisted encrypted.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpConfiguration {
    /// Database id, `None` until persisted.
    pub id: Option<i64>,
    /// Owner of the configuration. Unique.
    pub username: String,
    /// Issuer shown by authenticator apps.
    pub issuer: String,
    /// HMAC algorithm.
    pub algorithm: TotpAlgorithm,
    /// Code length, 6 to 8.
    pub digits: u32,
    /// Step in seconds.
    pub period: u32,
    /// Plaintext shared secret.
    pub secret: Vec<u8>,
    /// When the configuration was created.
    pub created_at: DateTime<Utc>,
}

impl TotpConfiguration {
    /// Builds a configuration with default issuer, algorithm, digits and period.
    pub fn new(username: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            username: username.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            algorithm: TotpAlgorithm::default(),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }

    /// Sets the issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Sets the algorithm.
    pub fn with_algorithm(mut self, algorithm: TotpAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the digits.
    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits;
        self
    }

    /// Sets the period.
    pub fn with_period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    /// Checks the invariants that the store relies on.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.username.is_empty() || self.username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(ModelError::InvalidUsername(self.username.clone()));
        }
        if self.issuer.is_empty() {
            return Err(ModelError::EmptyIssuer);
        }
        if !(6..=8).contains(&self.digits) {
            return Err(ModelError::InvalidDigits(self.digits.into()));
        }
        if self.period == 0 {
            return Err(ModelError::InvalidPeriod(0));
        }
        if self.secret.is_empty() {
            return Err(ModelError::EmptySecret);
        }
        Ok(())
    }

    /// The secret as text.
    pub fn secret_str(&self) -> Result<&str, ModelError> {
        std::str::from_utf8(&self.secret).map_err(|_| ModelError::SecretNotText)
    }

    /// The `otpauth://totp/` key provisioning URI for this configuration.
    ///
    /// Query parameters are emitted in sorted key order.
    pub fn uri(&self) -> Result<String, ModelError> {
        let secret = self.secret_str()?;
        // The base is a constant and always parses.
        let mut url = Url::parse("otpauth://totp/")
            .map_err(|_| ModelError::InvalidUsername(self.username.clone()))?;
        url.set_path(&format!("{}:{}", self.issuer, self.username));
        url.query_pairs_mut()
            .append_pair("algorithm", self.algorithm.as_str())
            .append_pair("digits", &self.digits.to_string())
            .append_pair("issuer", &self.issuer)
            .append_pair("period", &self.period.to_string())
            .append_pair("secret", secret);
        Ok(url.to_string())
    }
}

impl fmt::Debug for TotpConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpConfiguration")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("secret", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Provider of new TOTP configurations.
///
/// The storage layer persists what the generator returns; secret generation and
/// code validation live behind this trait.
pub trait TotpGenerator: Send + Sync {
    /// Generates a fresh configuration for `username`.
    fn generate(&self, username: &str) -> Result<TotpConfiguration, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_common_authenticator_settings() {
        let config = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP");
        assert_eq!(config.issuer, "Authelia");
        assert_eq!(config.algorithm, TotpAlgorithm::Sha1);
        assert_eq!(config.digits, 6);
        assert_eq!(config.period, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let base = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP");

        assert_eq!(
            base.clone().with_digits(9).validate(),
            Err(ModelError::InvalidDigits(9))
        );
        assert_eq!(
            base.clone().with_period(0).validate(),
            Err(ModelError::InvalidPeriod(0))
        );
        assert_eq!(
            TotpConfiguration::new("", "X").validate(),
            Err(ModelError::InvalidUsername(String::new()))
        );
        assert_eq!(
            TotpConfiguration::new("alice", Vec::new()).validate(),
            Err(ModelError::EmptySecret)
        );
    }

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("sha256".parse::<TotpAlgorithm>(), Ok(TotpAlgorithm::Sha256));
        assert_eq!("SHA512".parse::<TotpAlgorithm>(), Ok(TotpAlgorithm::Sha512));
        assert!("MD5".parse::<TotpAlgorithm>().is_err());
    }

    #[test]
    fn uri_has_sorted_query_parameters() {
        let config = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP")
            .with_algorithm(TotpAlgorithm::Sha256)
            .with_digits(8)
            .with_period(60);

        assert_eq!(
            config.uri().unwrap(),
            "otpauth://totp/Authelia:alice?algorithm=SHA256&digits=8&issuer=Authelia&period=60&secret=JBSWY3DPEHPK3PXP"
        );
    }

    #[test]
    fn uri_escapes_issuer_with_spaces() {
        let config =
            TotpConfiguration::new("bob", "GEZDGNBV").with_issuer("Example Corp");
        let uri = config.uri().unwrap();
        assert!(uri.starts_with("otpauth://totp/Example%20Corp:bob?"));
        assert!(uri.contains("issuer=Example+Corp"));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP");
        let debug = format!("{config:?}");
        assert!(!debug.contains("JBSWY3DPEHPK3PXP"));
        assert!(debug.contains("[REDACTED]"));
    }
}

//! Shared value types for the secret bearing entities.

/// Validation failures for entity values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The username is empty or too long.
    #[error("invalid username '{0}'")]
    InvalidUsername(String),

    /// The algorithm name is not one of SHA1, SHA256 or SHA512.
    #[error("invalid TOTP algorithm '{0}'")]
    InvalidAlgorithm(String),

    /// Digits outside of 6..=8.
    #[error("invalid TOTP digits {0}: must be 6, 7 or 8")]
    InvalidDigits(i64),

    /// A period that is not a positive number of seconds.
    #[error("invalid TOTP period {0}: must be greater than zero")]
    InvalidPeriod(i64),

    /// The secret is empty.
    #[error("the secret must not be empty")]
    EmptySecret,

    /// The secret cannot be rendered as text.
    #[error("the secret is not valid UTF-8 text")]
    SecretNotText,

    /// The issuer is empty.
    #[error("the issuer must not be empty")]
    EmptyIssuer,

    /// A device description is empty or longer than 64 characters.
    #[error("invalid device description '{0}'")]
    InvalidDescription(String),

    /// A stored timestamp is outside the representable range.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// A row that could not be decoded or decrypted while reading a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// The table the row lives in.
    pub table: &'static str,
    /// The row's primary key.
    pub row_id: i64,
    /// Human readable cause.
    pub reason: String,
}

/// One page of a paginated listing.
///
/// `len()` counts failed rows as well as decoded items so that callers can use
/// [`Page::is_last`] to detect the end of the data.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Successfully decoded items, in key order.
    pub items: Vec<T>,
    /// Rows that were skipped.
    pub failures: Vec<RowFailure>,
    /// The requested page size.
    pub page_size: usize,
    /// Zero based page number.
    pub page: usize,
}

impl<T> Page<T> {
    /// Number of rows read for this page.
    pub fn len(&self) -> usize {
        self.items.len() + self.failures.len()
    }

    /// True when the page holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A short page means there is nothing after it.
    pub fn is_last(&self) -> bool {
        self.len() < self.page_size
    }
}

//! Strongly-typed identifiers for Drover entities.
//!
//! The canonical workflow identifier is [`RequestId`]: the pair of intake
//! keys rendered as `"{partition_key}|{row_key}"` with exactly one `|`
//! separator and neither side empty. It doubles as the aggregate stream id
//! and as the correlation id for every event of one workflow instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Separator between the partition key and the row key.
const SEPARATOR: char = '|';

/// The canonical workflow identifier.
///
/// Constructed from intake keys; parseable from any payload that carries
/// the canonical string form.
///
/// # Example
///
/// ```rust
/// use drover_core::id::RequestId;
///
/// let id = RequestId::new("pA", "rK").unwrap();
/// assert_eq!(id.to_string(), "pA|rK");
///
/// let parsed: RequestId = "pA|rK".parse().unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId {
    partition_key: String,
    row_key: String,
}

impl RequestId {
    /// Creates a request id from intake keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidId` when either key is empty or contains the
    /// `|` separator.
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Result<Self> {
        let partition_key = partition_key.into();
        let row_key = row_key.into();

        if partition_key.is_empty() || row_key.is_empty() {
            return Err(Error::InvalidId {
                message: "request id requires non-empty partition and row keys".to_string(),
            });
        }
        if partition_key.contains(SEPARATOR) || row_key.contains(SEPARATOR) {
            return Err(Error::InvalidId {
                message: format!("intake keys must not contain '{SEPARATOR}'"),
            });
        }

        Ok(Self {
            partition_key,
            row_key,
        })
    }

    /// Returns the intake partition key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Returns the intake row key.
    #[must_use]
    pub fn row_key(&self) -> &str {
        &self.row_key
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.partition_key, self.row_key)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(SEPARATOR);
        let (Some(partition_key), Some(row_key), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidId {
                message: format!("request id '{s}' must contain exactly one '{SEPARATOR}'"),
            });
        };
        Self::new(partition_key, row_key)
    }
}

impl TryFrom<String> for RequestId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.to_string()
    }
}

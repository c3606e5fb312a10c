//! Type-safe record identifiers
//!
//! Newly created records get TypeID strings backed by UUIDv7, so IDs sort by
//! creation time and carry a readable prefix:
//!
//! ```rust
//! use alertsync::ids::AlertId;
//!
//! let id = AlertId::generate();
//! assert!(id.as_str().starts_with("alert_"));
//! ```
//!
//! Stored identifiers are accepted verbatim when loaded back from a
//! repository; only emptiness is rejected, since rows written by other
//! tools may not follow the TypeID format.

use mti::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty or whitespace.
    #[error("{kind} identifier must not be empty")]
    Empty {
        /// Which identifier kind was being parsed.
        kind: &'static str,
    },
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The TypeID prefix for freshly generated identifiers
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new time-sortable identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Self::PREFIX.create_type_id::<V7>().to_string())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(IdError::Empty {
                        kind: Self::PREFIX,
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(
    /// Internally generated, stable identifier of one alert record.
    AlertId,
    "alert"
);

typed_id!(
    /// Identifier of one acknowledgment audit record.
    AckEventId,
    "ack"
);

typed_id!(
    /// Identifier of one silence rule.
    SilenceId,
    "sil"
);

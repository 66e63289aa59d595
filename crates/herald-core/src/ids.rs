//! Identifier newtypes for sessions and notifications.
//!
//! Both identifier spaces are small, pool-allocated integers. On the wire
//! they travel as decimal strings (`"0"`, `"17"`), so each newtype serializes
//! as a string and parses back from one. Keeping them distinct types stops a
//! session ID from being passed where a notification ID is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a wire identifier is not a plain decimal integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier '{0}'")]
pub struct ParseIdError(pub String);

/// An identifier that can be handed out by an [`IdentifierPool`](crate::IdentifierPool).
pub trait PooledId: Copy + Eq + fmt::Display {
    /// Build the identifier for a pool slot.
    fn from_index(index: usize) -> Self;

    /// The pool slot this identifier occupies.
    fn index(self) -> usize;

    /// Label used in logs and errors (`"session"`, `"notification"`).
    const KIND: &'static str;
}

macro_rules! pooled_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Parse the decimal wire form. Returns `None` for anything that
            /// is not a plain non-negative integer.
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                s.parse().ok()
            }

            /// Numeric value of the identifier.
            #[must_use]
            pub const fn value(self) -> u32 {
                self.0
            }
        }

        impl PooledId for $name {
            const KIND: &'static str = $kind;

            #[allow(clippy::cast_possible_truncation)]
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // `u32::from_str` also accepts a leading '+' and leading zeros;
                // the wire form is canonical decimal.
                let canonical = s.len() == 1 || !s.starts_with('0');
                if s.is_empty() || !canonical || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseIdError(s.to_owned()));
                }
                s.parse::<u32>().map(Self).map_err(|_| ParseIdError(s.to_owned()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(|_| {
                    serde::de::Error::custom(format!("invalid {} id '{raw}'", $kind))
                })
            }
        }
    };
}

pooled_id!(
    /// Identifier of one connected client session.
    SessionId,
    "session"
);

pooled_id!(
    /// Identifier of one live notification.
    NotificationId,
    "notification"
);

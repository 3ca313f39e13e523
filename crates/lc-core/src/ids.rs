//! Typed identifiers.
//!
//! [`StreamKey`] is the opaque identifier shared by the ingest path, the
//! playback URLs and the metadata record of a live stream. Because it is used
//! verbatim as a directory and file name, it is validated on construction and
//! can never contain path separators or traversal sequences.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Longest accepted stream key.
pub const MAX_STREAM_KEY_LEN: usize = 128;

/// Generate a validated newtype over `String`.
///
/// The macro produces a struct with:
/// - `as_str()` and `into_inner()` accessors
/// - `Display`, `FromStr`, `TryFrom<String>` (validating through `$check`)
/// - `Serialize`/`Deserialize` that go through the same validation
macro_rules! string_id {
    ($($(#[doc = $doc:expr])* $name:ident => $check:path),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema)]
            #[serde(try_from = "String", into = "String")]
            #[schema(value_type = String)]
            pub struct $name(String);

            impl $name {
                /// Borrow the identifier as a string slice.
                pub fn as_str(&self) -> &str {
                    &self.0
                }

                /// Consume the identifier, returning the inner string.
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
                type Err = Error;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    $check(stringify!($name), s)?;
                    Ok(Self(s.to_string()))
                }
            }

            impl TryFrom<String> for $name {
                type Error = Error;

                fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                    $check(stringify!($name), &s)?;
                    Ok(Self(s))
                }
            }

            impl From<$name> for String {
                fn from(id: $name) -> Self {
                    id.0
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

string_id! {
    /// Opaque key identifying one live stream (and its video record).
    StreamKey => check_path_safe,
    /// Identifier of the channel (principal) that owns a stream.
    ChannelId => check_non_empty,
}

impl StreamKey {
    /// Generate a fresh random key (32 lowercase hex characters).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl ChannelId {
    /// Principal used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self("anonymous".into())
    }
}

/// Keys double as directory names: `[A-Za-z0-9_-]{1,128}`.
fn check_path_safe(kind: &str, s: &str) -> crate::Result<()> {
    check_non_empty(kind, s)?;
    if s.len() > MAX_STREAM_KEY_LEN {
        return Err(Error::Validation(format!(
            "{kind} longer than {MAX_STREAM_KEY_LEN} characters"
        )));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::Validation(format!(
            "{kind} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

fn check_non_empty(kind: &str, s: &str) -> crate::Result<()> {
    if s.trim().is_empty() {
        return Err(Error::Validation(format!("{kind} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_accepts_safe_keys() {
        for key in ["abc123", "live_room-7", "A"] {
            let parsed: StreamKey = key.parse().unwrap();
            assert_eq!(parsed.as_str(), key);
        }
    }

    #[test]
    fn stream_key_rejects_traversal_and_separators() {
        for bad in ["", "../etc", "a/b", "a\\b", "..", ".hidden", "key with space"] {
            let err = bad.parse::<StreamKey>().unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn stream_key_length_limit() {
        let long = "k".repeat(MAX_STREAM_KEY_LEN + 1);
        assert!(long.parse::<StreamKey>().is_err());
        assert!("k".repeat(MAX_STREAM_KEY_LEN).parse::<StreamKey>().is_ok());
    }

    #[test]
    fn generated_keys_are_valid_and_unique() {
        let a = StreamKey::generate();
        let b = StreamKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().parse::<StreamKey>().is_ok());
    }

    #[test]
    fn serde_validates() {
        let key: StreamKey = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abc123\"");
        assert!(serde_json::from_str::<StreamKey>("\"../x\"").is_err());
    }

    #[test]
    fn channel_id_allows_any_non_empty() {
        let id: ChannelId = "user@example.com".parse().unwrap();
        assert_eq!(id.to_string(), "user@example.com");
        assert!("  ".parse::<ChannelId>().is_err());
        assert_eq!(ChannelId::anonymous().as_str(), "anonymous");
    }
}

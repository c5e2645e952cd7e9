//! Branded ID newtypes.
//!
//! Each ID is a newtype around `String` holding a UUID v7 (time-ordered),
//! so an execution id can never be passed where a session id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// One concurrently running test execution. Keys its transport client.
    ExecutionId
}

branded_id! {
    /// One conversation session spanning a test run.
    SessionId
}

/// Generate an id for a tool call the runtime issues on its own behalf
/// (automatic screenshots, injected snapshots).
#[must_use]
pub fn synthetic_call_id() -> String {
    format!("vigil_{}", Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
    }

    #[test]
    fn id_is_uuid_v7() {
        let id = SessionId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ExecutionId::from("exec-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"exec-1\"");
        let back: ExecutionId = serde_json::from_str("\"exec-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn synthetic_ids_are_prefixed() {
        let id = synthetic_call_id();
        assert!(id.starts_with("vigil_"));
        assert_ne!(id, synthetic_call_id());
    }
}

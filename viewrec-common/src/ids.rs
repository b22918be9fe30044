//! Identifier newtypes
//!
//! Viewers, content items and tracked elements are all identified by UUIDv4.
//! The newtypes keep them from being mixed up at call sites; on the wire and
//! in SQLite they are plain UUID strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Underlying UUID
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_newtype! {
    /// Identity of a viewer (also used for content creators)
    ViewerId
}

uuid_newtype! {
    /// Identity of a piece of content
    ContentId
}

uuid_newtype! {
    /// Identity of one tracked element (one mounted observer target)
    ElementId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_agree() {
        let id = ContentId::new();
        let parsed: ContentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<ViewerId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let uuid = Uuid::new_v4();
        let id = ViewerId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }

    #[test]
    fn test_new_ids_are_distinct() {
        assert_ne!(ElementId::new(), ElementId::new());
    }
}

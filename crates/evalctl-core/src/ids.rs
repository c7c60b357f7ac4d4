// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Opaque identifiers for the engine's aggregates.
//!
//! Each id wraps a UUIDv4 string. They are distinct types so a
//! [`UseCaseId`] can never be passed where a [`ModelId`] is expected, even
//! though both are strings on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wraps an existing string without validating its shape.
            ///
            /// Used when reconstructing an id read back from storage.
            #[must_use]
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrows the underlying string form.
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

opaque_id!(UseCaseId, "Identifies a use case submission.");
opaque_id!(ModelId, "Identifies one model evaluation attached to a use case.");
opaque_id!(TaskId, "Identifies one row in the durable task queue.");

#[cfg(test)]
mod tests {
    use super::{ModelId, UseCaseId};

    #[test]
    fn distinct_ids_do_not_collide() {
        let a = UseCaseId::new();
        let b = UseCaseId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_raw_string() {
        let id = ModelId::new();
        let raw = id.as_str().to_owned();
        let restored = ModelId::from_raw(raw.clone());
        assert_eq!(restored.as_str(), raw);
    }
}

//! Typed identifiers shared across the herald crates.
//!
//! Entity identifiers are ULIDs: globally unique, lexicographically sortable
//! by creation time, and collision-resistant. Each entity gets its own
//! newtype so a `RecipientId` can never be passed where a `CampaignId` is
//! expected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! ulid_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Wrap an existing ULID.
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self(id)
            }

            /// Parse from the canonical 26-character string form.
            ///
            /// # Errors
            /// Returns an error if the string is not a valid ULID.
            pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
                ulid::Ulid::from_string(s).map(Self)
            }

            /// The underlying ULID.
            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.0
            }

            /// Milliseconds since the Unix epoch encoded in the identifier.
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                ulid::Ulid::from_string(&s)
                    .map(Self)
                    .map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id! {
    /// Identifies one bulk-send campaign.
    CampaignId
}

ulid_id! {
    /// Identifies one addressee within a campaign.
    RecipientId
}

ulid_id! {
    /// Identifies one transient unit of dispatch work on the queue.
    JobId
}

ulid_id! {
    /// Identifies an A/B test attached to a campaign.
    TestId
}

ulid_id! {
    /// Identifies one content alternative within an A/B test.
    VariantId
}

/// Scope key for per-SMTP-configuration rate limiting and transport routing.
///
/// Backed by a shared string so clones are cheap; the rate limiter keys its
/// bucket map with these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmtpConfigId(Arc<str>);

impl SmtpConfigId {
    /// Create a scope key from any string-ish value.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The scope key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SmtpConfigId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for SmtpConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

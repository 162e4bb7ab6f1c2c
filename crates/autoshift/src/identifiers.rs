//! Newtype domain identifiers.
//!
//! Every name that crosses a component boundary is a distinct newtype wrapping
//! a `String`. This prevents accidentally passing, for example, a [`ZoneName`]
//! where a [`ResourceName`] is expected, and guarantees that none of them is
//! ever empty.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or_else(|| format!("{} must not be empty", stringify!($name)))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Cluster-side names
// ---------------------------------------------------------------------------

string_id! {
    /// An availability zone name (e.g. `"us-east-1a"` or the zone id `"use1-az1"`).
    ///
    /// Always taken verbatim from the event's `detail.metadata.awayFrom`.
    ZoneName
}

string_id! {
    /// The name of the cluster resource whose placement policy is mutated
    /// (a Karpenter `NodePool`).
    ResourceName
}

string_id! {
    /// A Kubernetes namespace.
    Namespace
}

impl ZoneName {
    /// `true` for AWS zone ids such as `use1-az1` or the Local Zone form
    /// `usw2-lax1-az1`, `false` for zone names such as `us-east-1a`.
    pub fn is_zone_id(&self) -> bool {
        let Some((prefix, number)) = self.0.rsplit_once("-az") else {
            return false;
        };
        !prefix.is_empty()
            && !number.is_empty()
            && !prefix.starts_with('-')
            && prefix
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && number.bytes().all(|b| b.is_ascii_digit())
    }
}

// ---------------------------------------------------------------------------
// Lease-side names
// ---------------------------------------------------------------------------

string_id! {
    /// The name of the lock resource all replicas compete for.
    LeaseName
}

string_id! {
    /// Stable identity of one replica in the leader election.
    ///
    /// Usually the pod name; must differ between replicas or two processes
    /// would both believe they hold the lease.
    LeaseIdentity
}

impl LeaseIdentity {
    /// Generates a random identity for processes that have no pod name.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

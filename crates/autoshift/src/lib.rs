//! Core domain for the zonal autoshift responder.
//!
//! This crate holds every domain concept the responder works with: the webhook
//! envelope, the capacity event and its validator, the leadership gate, and
//! the zone exclusion logic. Infrastructure crates implement the port traits
//! defined here ([`LeaseBackend`], [`ClusterApi`]); they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no network
//! dependencies. It defines *what* is needed; the `kubernetes` and `listener`
//! crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Non-empty string newtypes (`ZoneName`, `LeaseIdentity`, etc.) |
//! | [`envelope`] | Outer webhook envelope decoding |
//! | [`validation`] | Capacity event decoding and required-field validation |
//! | [`types`] | `CapacityEvent`, `ExclusionDirective`, `ExclusionPolicy` |
//! | [`leadership`] | Lease port, leadership flag, renewal loop |
//! | [`mutation`] | Cluster API port and the zone exclusion mutator (exclude and restore) |
//! | [`errors`] | Per-component error enums and retry policy |

pub mod envelope;
pub mod errors;
pub mod identifiers;
pub mod leadership;
pub mod mutation;
pub mod types;
pub mod validation;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use envelope::{Envelope, EnvelopeMeta};
pub use errors::{AutoshiftError, EnvelopeError, EventError, LeaseError, MutationError, RetryPolicy};
pub use identifiers::{LeaseIdentity, LeaseName, Namespace, ResourceName, ZoneName};
pub use leadership::{
    InMemoryLeaseBackend, LeaderCheck, LeaseBackend, LeaseTiming, LeadershipGate,
    LeadershipHooks, LeadershipResult, LeadershipState, NoopHooks, RenewalResult,
};
pub use mutation::{ClusterApi, ClusterMutator, ZoneExclusionMutator};
pub use types::{
    CapacityEvent, EventDetail, EventMetadata, ExclusionDirective, ExclusionPolicy,
    MutationOutcome, NodeRequirement, ZoneAction, zone_label, ZONE_ID_LABEL, ZONE_LABEL,
};
pub use validation::validate;

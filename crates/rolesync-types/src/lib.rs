//! # rolesync-types
//!
//! Shared domain types used across the rolesync workspace: tenants,
//! principals, subscription records, the shapes returned by the remote
//! collaborators, and the queue wire payload.
//!
//! All timestamps are whole Unix seconds (`u64`).

pub mod actuation;
pub mod address;
pub mod chain;
pub mod job;
pub mod principal;
pub mod report;
pub mod subscription;
pub mod tenant;

pub use actuation::{ActuationOutcome, Feasibility};
pub use address::{Address, AddressError};
pub use chain::{ContractRef, PageResult};
pub use job::SyncJob;
pub use principal::Principal;
pub use report::{PassStatus, SyncReport};
pub use subscription::{RemoteSubscription, SubscriptionRecord, SubscriptionStatus};
pub use tenant::Tenant;

/// Unix timestamp in whole seconds.
pub type UnixSeconds = u64;

/// Job kind literal carried by every reconciliation job.
pub const JOB_KIND_SYNC: &str = "sync";

//! Database query functions organized by domain.

pub mod jobs;
pub mod principals;
pub mod subscriptions;
pub mod tenants;

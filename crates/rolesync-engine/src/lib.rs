//! # rolesync-engine
//!
//! Keeps chat-platform privileges in step with on-chain subscriptions.
//!
//! A tenant (a chat community) binds one subscription contract to one
//! privilege. Members link a wallet by signing a challenge; the engine then
//! grants the privilege while the wallet's subscription is live and revokes
//! it once it lapses.
//!
//! ## Layout
//!
//! - [`ports`]: traits for the store, the chat platform, the chain and the
//!   subscriber index
//! - [`sqlite`]: store and durable queue over `rolesync-db`
//! - [`chain_reader`]: contract resolution and paginated subscriber reads
//! - [`reconciler`]: one tenant's pass, serialized per tenant
//! - [`coordinator`]: fleet passes and manual syncs
//! - [`worker`], [`runtime`]: queue consumers and the periodic ticker
//! - [`onboarding`]: tenant setup, ownership proof, wallet linking

pub mod chain_reader;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod onboarding;
pub mod ports;
pub mod reconciler;
pub mod runtime;
pub mod sqlite;
pub mod telemetry;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod fakes;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use coordinator::{FleetPass, SyncCoordinator};
pub use engine::{Engine, Remotes};
pub use error::{EngineError, Result};
pub use reconciler::Reconciler;
pub use runtime::SyncRuntime;

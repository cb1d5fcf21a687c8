//! Integration test crate for rolesync.
//!
//! This crate has no library code: it only contains integration tests
//! that drive the engine end to end over SQLite and fake remote
//! collaborators (chain, subscriber index, chat platform).
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p rolesync-integration-tests
//! ```

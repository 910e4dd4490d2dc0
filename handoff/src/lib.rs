#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]
#![warn(missing_docs)]

//! `handoff` moves a writer's saved texts and drafts from a legacy username account to a
//! federated (email) identity without losing anything, and protects that data on shared
//! computers.
//!
//! The host (a browser app, usually) supplies persistence through
//! [`primitives::PartitionStore`], answers questions through [`decision::DecisionSurface`]
//! and receives progress, activity and log events through foreign traits.

pub use handoff_macros::{handoff_error, handoff_export};

/// Host-facing primitives: persistence, logging, activity reporting and configuration.
pub mod primitives;

/// User identities and their validation.
pub mod identity;

/// Storage key layout.
pub mod keys;

/// The session pointer: who is signed in, and with which provider.
pub mod session;

/// Fuzzy matching of legacy accounts against a federated identity, and the persisted
/// links and ignore lists.
pub mod matching;

/// Questions the library asks the user through the host.
pub mod decision;

/// Backed-up, verified and reversible migration of content between identities.
pub mod migration;

/// Public / personal device classification and the inactivity wipe.
pub mod security;

/// The flow run after a federated sign-in.
pub mod orchestrator;

#[cfg(test)]
mod test_utils;

uniffi::setup_scaffolding!("handoff");

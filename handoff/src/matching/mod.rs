//! Fuzzy matching of legacy accounts against a signing-in identity.
//!
//! Legacy accounts are never stored as such; they are derived from the content
//! partitions found in the [`PartitionStore`](crate::primitives::PartitionStore). The
//! [`AccountMatcher`] scores each one with [`similarity::score`], filters by the
//! confidence threshold and remembers the user's link / ignore decisions.

mod matcher;

/// Pure edit-distance scoring.
pub mod similarity;

pub use matcher::{
    AccountMatcher, LegacyAccountRecord, LinkageRecord, MatchCandidate, MatchReason,
};

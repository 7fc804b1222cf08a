//! An implementation of the LMD-GHOST fork choice algorithm, backed by a "proto-array".
//!
//! The block tree is stored as a flat arena of nodes ordered by insertion; all cross-references
//! (parent, best-child, best-descendant) are indices into that arena. Each node carries the
//! accumulated vote weight of its subtree and two cursors that point along the winning chain, so
//! finding the head is a single hop from the justified block to its pre-computed best
//! descendant. Vote churn is folded in lazily: attestations only touch a per-validator vote
//! table, and the weight deltas they imply are computed and committed in one backwards sweep per
//! head query. Finalization prunes the arena by shifting indices rather than rebuilding the
//! tree.

mod error;
mod fork_choice;
pub mod fork_choice_test_definition;
mod proto_array;
mod ssz_container;
pub mod types;

pub use crate::fork_choice::{Block, ForkChoice, DEFAULT_PRUNE_THRESHOLD};
pub use crate::types::{Epoch, Hash256, Slot};
pub use error::Error;

pub mod core {
    pub use super::fork_choice::VoteTracker;
    pub use super::proto_array::{ProtoArray, ProtoNode};
    pub use super::ssz_container::SszContainer;
}

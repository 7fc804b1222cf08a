//! Self-contained fork choice scenarios expressed as operation sequences.
//!
//! Each definition boots a [`ForkChoice`] from an anchor block and replays a list of operations,
//! checking the head (or an expected failure) along the way. The definitions are `pub` so that
//! fuzzers and alternative implementations can replay the same scenarios.

mod ffg_updates;
mod no_votes;
mod votes;

use crate::fork_choice::{Block, ForkChoice, DEFAULT_PRUNE_THRESHOLD};
use crate::types::{Epoch, Hash256, Slot};
use serde_derive::{Deserialize, Serialize};

pub use ffg_updates::*;
pub use no_votes::*;
pub use votes::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    FindHead {
        justified_epoch: Epoch,
        justified_root: Hash256,
        finalized_epoch: Epoch,
        justified_state_balances: Vec<u64>,
        expected_head: Hash256,
    },
    InvalidFindHead {
        justified_epoch: Epoch,
        justified_root: Hash256,
        finalized_epoch: Epoch,
        justified_state_balances: Vec<u64>,
    },
    ProcessBlock {
        slot: Slot,
        root: Hash256,
        parent_root: Hash256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    },
    ProcessAttestation {
        validator_index: usize,
        block_root: Hash256,
        target_epoch: Epoch,
    },
    Prune {
        finalized_root: Hash256,
        finalized_epoch: Epoch,
        prune_threshold: usize,
        expected_len: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkChoiceTestDefinition {
    pub finalized_block_slot: Slot,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub finalized_root: Hash256,
    pub operations: Vec<Operation>,
}

impl ForkChoiceTestDefinition {
    pub fn run(self) {
        let fork_choice = ForkChoice::new(
            self.justified_epoch,
            self.finalized_epoch,
            self.finalized_root,
            self.finalized_block_slot,
            Hash256::zero(),
            DEFAULT_PRUNE_THRESHOLD,
        )
        .expect("should create fork choice struct");

        for (op_index, op) in self.operations.into_iter().enumerate() {
            match op {
                Operation::FindHead {
                    justified_epoch,
                    justified_root,
                    finalized_epoch,
                    justified_state_balances,
                    expected_head,
                } => {
                    let head = fork_choice
                        .find_head(
                            justified_epoch,
                            justified_root,
                            finalized_epoch,
                            &justified_state_balances,
                        )
                        .unwrap_or_else(|e| {
                            panic!("find_head op at index {} returned error: {}", op_index, e)
                        });

                    assert_eq!(
                        head, expected_head,
                        "find_head op at index {} returned {} instead of {}",
                        op_index, head, expected_head
                    );
                }
                Operation::InvalidFindHead {
                    justified_epoch,
                    justified_root,
                    finalized_epoch,
                    justified_state_balances,
                } => {
                    let result = fork_choice.find_head(
                        justified_epoch,
                        justified_root,
                        finalized_epoch,
                        &justified_state_balances,
                    );

                    assert!(
                        result.is_err(),
                        "find_head op at index {} was successful, expected an error",
                        op_index
                    );
                }
                Operation::ProcessBlock {
                    slot,
                    root,
                    parent_root,
                    justified_epoch,
                    finalized_epoch,
                } => {
                    fork_choice
                        .process_block(Block {
                            slot,
                            root,
                            parent_root: Some(parent_root),
                            state_root: Hash256::zero(),
                            justified_epoch,
                            finalized_epoch,
                        })
                        .unwrap_or_else(|e| {
                            panic!(
                                "process_block op at index {} returned error: {}",
                                op_index, e
                            )
                        });
                }
                Operation::ProcessAttestation {
                    validator_index,
                    block_root,
                    target_epoch,
                } => {
                    fork_choice
                        .process_attestation(validator_index, block_root, target_epoch)
                        .unwrap_or_else(|e| {
                            panic!(
                                "process_attestation op at index {} returned error: {}",
                                op_index, e
                            )
                        });
                }
                Operation::Prune {
                    finalized_root,
                    finalized_epoch,
                    prune_threshold,
                    expected_len,
                } => {
                    fork_choice.set_prune_threshold(prune_threshold);
                    fork_choice
                        .maybe_prune(finalized_root, finalized_epoch)
                        .unwrap_or_else(|e| {
                            panic!("prune op at index {} returned error: {}", op_index, e)
                        });

                    let len = fork_choice.block_count();
                    assert_eq!(
                        len, expected_len,
                        "prune op at index {} left {} blocks, expected {}",
                        op_index, len, expected_len
                    );
                }
            }
        }

        // A populated fork choice should round-trip through its SSZ image.
        let bytes = fork_choice.as_bytes();
        let decoded = ForkChoice::from_bytes(&bytes).expect("fork choice bytes should decode");
        assert!(
            decoded == fork_choice,
            "decoded fork choice should match the original"
        );
    }
}

/// Gives a root that is all-zero apart from the last byte, matching the diagrams in the scenario
/// files. `get_hash(0)` is the zero hash and is only ever used as the anchor root.
fn get_hash(i: u64) -> Hash256 {
    Hash256::from_low_u64_be(i)
}

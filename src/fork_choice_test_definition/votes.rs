use super::*;

/// Exercises vote accounting: weights moving between forks, balances growing and shrinking, the
/// validator set changing size and a prune landing mid-stream.
pub fn get_votes_test_definition() -> ForkChoiceTestDefinition {
    let mut ops = vec![];

    // Ensure that the head starts at the finalized block.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1, 1],
        expected_head: get_hash(0),
    });

    // Add block 2 and have validator 0 vote for it.
    //
    //         0
    //        /
    //        2 <- +1
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(2),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });
    ops.push(Operation::ProcessAttestation {
        validator_index: 0,
        block_root: get_hash(2),
        target_epoch: Epoch::new(2),
    });

    // Ensure the head is 2.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1, 1],
        expected_head: get_hash(2),
    });

    // Add block 1 as a fork and have validator 1 vote for it.
    //
    //          0
    //         / \
    // +1 -> 2   1 <- +1
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(1),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });
    ops.push(Operation::ProcessAttestation {
        validator_index: 1,
        block_root: get_hash(1),
        target_epoch: Epoch::new(2),
    });

    // The weights are tied at one unit each; the higher root (2) wins.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1, 1],
        expected_head: get_hash(2),
    });

    // Add block 3 on top of 1, then move validator 0 there.
    //
    //         0
    //        / \
    //        2  1
    //           |
    //           3 <- +1 (moved from 2)
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(3),
        parent_root: get_hash(1),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });
    ops.push(Operation::ProcessAttestation {
        validator_index: 0,
        block_root: get_hash(3),
        target_epoch: Epoch::new(3),
    });

    // The whole stake now sits in the subtree of 1; the head moves to 3.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1, 1],
        expected_head: get_hash(3),
    });

    // Validator 0's balance doubles while its vote stays put; the unchanged vote must be
    // re-counted at the new balance.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![2, 1],
        expected_head: get_hash(3),
    });

    // Validator 0's balance shrinks back and validator 1 drops out of the balances entirely;
    // the stale weight must come off without underflow.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1],
        expected_head: get_hash(3),
    });

    // Finalize block 1. The anchor and the stale fork at 2 are removed.
    //
    //        1
    //        |
    //        3
    ops.push(Operation::Prune {
        finalized_root: get_hash(1),
        finalized_epoch: Epoch::new(1),
        prune_threshold: 0,
        expected_len: 2,
    });

    // An attestation older than validator 0's recorded target is discarded, so the head does
    // not move back under 1.
    ops.push(Operation::ProcessAttestation {
        validator_index: 0,
        block_root: get_hash(1),
        target_epoch: Epoch::new(2),
    });

    // Validator 1 re-appears in the balances; its standing vote for 1 is counted again.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(1),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: vec![1, 1],
        expected_head: get_hash(3),
    });

    ForkChoiceTestDefinition {
        finalized_block_slot: Slot::new(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
        finalized_root: get_hash(0),
        operations: ops,
    }
}

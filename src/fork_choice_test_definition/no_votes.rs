use super::*;

/// Exercises the tree structure and tie-breaking without any attestations: every block keeps a
/// zero weight, so heads are decided purely by the largest-root tie-break.
pub fn get_no_votes_test_definition() -> ForkChoiceTestDefinition {
    let balances = vec![];
    let mut ops = vec![];

    // Ensure that the head starts at the finalized block.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(0),
    });

    // Add block 2.
    //
    //         0
    //        /
    //        2
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(2),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });

    // Ensure the head is 2.
    //
    //         0
    //        /
    //        2 <- head
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // Add block 1 as a fork.
    //
    //         0
    //        / \
    //        2  1
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(1),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });

    // Ensure the head is still 2: both siblings have zero weight and 2 is the higher root.
    //
    //         0
    //        / \
    // head -> 2  1
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // Add block 3 on top of 1.
    //
    //         0
    //        / \
    //        2  1
    //           |
    //           3
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(3),
        parent_root: get_hash(1),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });

    // Ensure 2 is still the head: chain length does not matter, only weight does, and the
    // weights are still tied at zero.
    //
    //         0
    //        / \
    // head -> 2  1
    //           |
    //           3
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // Add block 4 as a sibling of 3.
    //
    //         0
    //        / \
    //        2  1
    //          / \
    //          3  4
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(4),
        parent_root: get_hash(1),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
    });

    // Ensure the head is still 2.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // Starting the head search from an unknown root is an error.
    ops.push(Operation::InvalidFindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(9),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances.clone(),
    });

    // A prune below the threshold does not touch the tree.
    ops.push(Operation::Prune {
        finalized_root: get_hash(0),
        finalized_epoch: Epoch::new(1),
        prune_threshold: 256,
        expected_len: 5,
    });

    // Pruning to block 2 removes the anchor; block 1 survives as a parent-less fork until a
    // later prune reaches past it.
    //
    //        2  1
    //          / \
    //          3  4
    ops.push(Operation::Prune {
        finalized_root: get_hash(2),
        finalized_epoch: Epoch::new(1),
        prune_threshold: 0,
        expected_len: 4,
    });

    // The pruned tree still finds a head from the new anchor.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(2),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances,
        expected_head: get_hash(2),
    });

    ForkChoiceTestDefinition {
        finalized_block_slot: Slot::new(0),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(1),
        finalized_root: get_hash(0),
        operations: ops,
    }
}

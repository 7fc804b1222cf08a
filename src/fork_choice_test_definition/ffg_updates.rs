use super::*;

/// A single chain whose blocks carry progressively newer epoch views. Heads must be filtered to
/// blocks that agree with the epochs under which the search runs.
pub fn get_ffg_case_01_test_definition() -> ForkChoiceTestDefinition {
    let balances = vec![1, 1];
    let mut ops = vec![];

    // Ensure that the head starts at the finalized block.
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(0),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(0),
    });

    // Build the following chain.
    //
    //            0 <- just: 0, fin: 0
    //            |
    //            1 <- just: 0, fin: 0
    //            |
    //            2 <- just: 1, fin: 0
    //            |
    //            3 <- just: 2, fin: 1
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(1),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(0),
        finalized_epoch: Epoch::new(0),
    });
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(2),
        parent_root: get_hash(1),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(0),
    });
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(3),
        root: get_hash(3),
        parent_root: get_hash(2),
        justified_epoch: Epoch::new(2),
        finalized_epoch: Epoch::new(1),
    });

    // With justified epoch 0 only blocks 0 and 1 agree with the view; the head stops at 1.
    //
    //            0 <- start
    //            |
    //            1 <- head
    //            |
    //            2
    //            |
    //            3
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(0),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(1),
    });

    // With justified epoch 1, searching from block 2 finds block 2 itself; its child holds a
    // newer view and is filtered out.
    //
    //            0
    //            |
    //            1
    //            |
    //            2 <- start + head
    //            |
    //            3
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(2),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // Under that same view the anchor itself is stale, so searching from it must fail.
    ops.push(Operation::InvalidFindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
    });

    // With justified epoch 2 and finalized epoch 1, block 3 is the only viable block.
    //
    //            0
    //            |
    //            1
    //            |
    //            2
    //            |
    //            3 <- start + head
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(2),
        justified_root: get_hash(3),
        finalized_epoch: Epoch::new(1),
        justified_state_balances: balances,
        expected_head: get_hash(3),
    });

    ForkChoiceTestDefinition {
        finalized_block_slot: Slot::new(0),
        justified_epoch: Epoch::new(0),
        finalized_epoch: Epoch::new(0),
        finalized_root: get_hash(0),
        operations: ops,
    }
}

/// Two competing forks whose tips carry a newer justified epoch than their ancestors. The head
/// must land on a tip even though every block between it and the justified root is stale.
pub fn get_ffg_case_02_test_definition() -> ForkChoiceTestDefinition {
    let balances = vec![1, 1];
    let mut ops = vec![];

    // Build the following tree.
    //
    //                        0
    //                       / \
    //   just: 0, fin: 0 -> 1   2 <- just: 0, fin: 0
    //                      |   |
    //   just: 1, fin: 0 -> 3   4 <- just: 1, fin: 0
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(1),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(0),
        finalized_epoch: Epoch::new(0),
    });
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(1),
        root: get_hash(2),
        parent_root: get_hash(0),
        justified_epoch: Epoch::new(0),
        finalized_epoch: Epoch::new(0),
    });
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(3),
        parent_root: get_hash(1),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(0),
    });
    ops.push(Operation::ProcessBlock {
        slot: Slot::new(2),
        root: get_hash(4),
        parent_root: get_hash(2),
        justified_epoch: Epoch::new(1),
        finalized_epoch: Epoch::new(0),
    });

    // With no votes and justified epoch 0, the tips are filtered out and the fork between 1 and
    // 2 ties to the higher root.
    //
    //           0 <- start
    //          / \
    //          1  2 <- head
    //          |  |
    //          3  4
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(0),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(2),
    });

    // One vote lands on each tip.
    ops.push(Operation::ProcessAttestation {
        validator_index: 0,
        block_root: get_hash(3),
        target_epoch: Epoch::new(1),
    });
    ops.push(Operation::ProcessAttestation {
        validator_index: 1,
        block_root: get_hash(4),
        target_epoch: Epoch::new(1),
    });

    // With justified epoch 1 the tips are the only viable blocks. Their weights tie, their
    // parents' weights tie, and the fork with the higher root (2, carrying 4) wins.
    //
    //           0 <- start
    //          / \
    //          1  2
    //          |  |
    //   +1 -> 3  4 <- +1, head
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances.clone(),
        expected_head: get_hash(4),
    });

    // Validator 1 switches to 3; the weight tips over and the head crosses to the other fork.
    //
    //           0 <- start
    //          / \
    //          1  2
    //          |  |
    //   +2 -> 3  4 <- head moves away
    ops.push(Operation::ProcessAttestation {
        validator_index: 1,
        block_root: get_hash(3),
        target_epoch: Epoch::new(2),
    });
    ops.push(Operation::FindHead {
        justified_epoch: Epoch::new(1),
        justified_root: get_hash(0),
        finalized_epoch: Epoch::new(0),
        justified_state_balances: balances,
        expected_head: get_hash(3),
    });

    ForkChoiceTestDefinition {
        finalized_block_slot: Slot::new(0),
        justified_epoch: Epoch::new(0),
        finalized_epoch: Epoch::new(0),
        finalized_root: get_hash(0),
        operations: ops,
    }
}

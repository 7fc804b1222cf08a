use crate::error::Error;
use crate::proto_array::ProtoArray;
use crate::ssz_container::SszContainer;
use crate::types::{Epoch, Hash256, Slot};
use parking_lot::{RwLock, RwLockReadGuard};
use serde_derive::{Deserialize, Serialize};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use std::collections::HashMap;
use std::ptr;

pub const DEFAULT_PRUNE_THRESHOLD: usize = 256;

/// The information the fork choice needs about a block, used both when registering a block and
/// when reading one back out of the array.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Block {
    pub slot: Slot,
    pub root: Hash256,
    /// `None` only for the anchor block.
    pub parent_root: Option<Hash256>,
    pub state_root: Hash256,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
}

/// The two latest-attested targets tracked per validator.
///
/// `current_root` is the vote last accounted for in node weights; `next_root`/`next_epoch` is the
/// latest attestation seen. The default (all-zero) value means the validator has never voted.
#[derive(Default, PartialEq, Clone, Debug, Encode, Decode)]
pub struct VoteTracker {
    current_root: Hash256,
    next_root: Hash256,
    next_epoch: Epoch,
}

/// A Vec-wrapper which will grow to match any request.
///
/// E.g., a `get_mut` to an out-of-bounds element will cause the Vec to grow (using Default) to
/// the smallest size required to fulfill the request. Validator indices are introduced
/// monotonically, so the list never shrinks.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct ElasticList<T>(pub Vec<T>);

impl<T> ElasticList<T>
where
    T: Default,
{
    fn ensure(&mut self, i: usize) {
        if self.0.len() <= i {
            self.0.resize_with(i + 1, Default::default);
        }
    }

    pub fn get_mut(&mut self, i: usize) -> &mut T {
        self.ensure(i);
        &mut self.0[i]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }
}

/// The fork choice: a proto-array plus the vote accounting that feeds it.
///
/// All mutating operations serialize on write locks; read-only queries take read locks and may
/// run concurrently with each other.
pub struct ForkChoice {
    pub(crate) proto_array: RwLock<ProtoArray>,
    pub(crate) votes: RwLock<ElasticList<VoteTracker>>,
    pub(crate) balances: RwLock<Vec<u64>>,
    pub(crate) current_slot: RwLock<Slot>,
}

impl PartialEq for ForkChoice {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        *self.proto_array.read() == *other.proto_array.read()
            && *self.votes.read() == *other.votes.read()
            && *self.balances.read() == *other.balances.read()
            && *self.current_slot.read() == *other.current_slot.read()
    }
}

impl ForkChoice {
    pub fn new(
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
        finalized_root: Hash256,
        finalized_block_slot: Slot,
        finalized_block_state_root: Hash256,
        prune_threshold: usize,
    ) -> Result<Self, String> {
        let mut proto_array = ProtoArray {
            prune_threshold,
            justified_epoch,
            finalized_epoch,
            nodes: Vec::with_capacity(1),
            indices: HashMap::with_capacity(1),
        };

        proto_array
            .on_block(Block {
                slot: finalized_block_slot,
                root: finalized_root,
                parent_root: None,
                state_root: finalized_block_state_root,
                justified_epoch,
                finalized_epoch,
            })
            .map_err(|e| format!("Failed to add finalized block to proto-array: {:?}", e))?;

        Ok(Self {
            proto_array: RwLock::new(proto_array),
            votes: RwLock::new(ElasticList::default()),
            balances: RwLock::new(vec![]),
            current_slot: RwLock::new(finalized_block_slot),
        })
    }

    /// Record the latest attestation of a validator.
    ///
    /// Attestations with a target epoch at or below the validator's recorded one are late or
    /// duplicate messages and are silently discarded. The target root does not need to be a
    /// known block; the vote simply carries no weight until the block arrives.
    pub fn process_attestation(
        &self,
        validator_index: usize,
        block_root: Hash256,
        target_epoch: Epoch,
    ) -> Result<(), String> {
        let mut votes = self.votes.write();
        let vote = votes.get_mut(validator_index);

        if target_epoch > vote.next_epoch || *vote == VoteTracker::default() {
            vote.next_root = block_root;
            vote.next_epoch = target_epoch;
        }

        Ok(())
    }

    pub fn process_block(&self, block: Block) -> Result<(), String> {
        self.proto_array
            .write()
            .on_block(block)
            .map_err(|e| format!("process_block error: {:?}", e))
    }

    /// Convert all pending vote changes into weight deltas, commit them to the proto-array and
    /// return the head block root found from `justified_root`.
    pub fn find_head(
        &self,
        justified_epoch: Epoch,
        justified_root: Hash256,
        finalized_epoch: Epoch,
        justified_state_balances: &[u64],
    ) -> Result<Hash256, String> {
        let mut proto_array = self.proto_array.write();
        let mut votes = self.votes.write();
        let mut old_balances = self.balances.write();

        let new_balances = justified_state_balances;

        let deltas = compute_deltas(&proto_array.indices, &mut votes, &old_balances, new_balances)
            .map_err(|e| format!("find_head compute_deltas failed: {:?}", e))?;

        proto_array
            .apply_score_changes(deltas, justified_epoch, finalized_epoch)
            .map_err(|e| format!("find_head apply_score_changes failed: {:?}", e))?;

        *old_balances = new_balances.to_vec();

        proto_array
            .find_head(&justified_root)
            .map_err(|e| format!("find_head failed: {:?}", e))
    }

    /// Record the current slot.
    ///
    /// The proto-array itself is time-independent; the slot is only served back to callers via
    /// `Self::current_slot`.
    pub fn on_tick(&self, slot: Slot) {
        *self.current_slot.write() = slot;
    }

    pub fn current_slot(&self) -> Slot {
        *self.current_slot.read()
    }

    /// Prune the proto-array to the given finalized block.
    ///
    /// Call this after `find_head` has committed pending deltas; pruning first would discard
    /// deltas addressed to the removed nodes.
    pub fn maybe_prune(&self, finalized_root: Hash256, finalized_epoch: Epoch) -> Result<(), String> {
        self.proto_array
            .write()
            .maybe_prune(finalized_root, finalized_epoch)
            .map_err(|e| format!("maybe_prune failed: {:?}", e))
    }

    pub fn set_prune_threshold(&self, prune_threshold: usize) {
        self.proto_array.write().prune_threshold = prune_threshold;
    }

    pub fn block_count(&self) -> usize {
        self.proto_array.read().nodes.len()
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.proto_array.read().indices.contains_key(block_root)
    }

    pub fn get_block(&self, block_root: &Hash256) -> Option<Block> {
        let proto_array = self.proto_array.read();

        let i = *proto_array.indices.get(block_root)?;
        let node = proto_array.nodes.get(i)?;

        Some(Block {
            slot: node.slot,
            root: node.root,
            parent_root: node.parent_root,
            state_root: node.state_root,
            justified_epoch: node.justified_epoch,
            finalized_epoch: node.finalized_epoch,
        })
    }

    pub fn get_weight(&self, block_root: &Hash256) -> Option<u64> {
        let proto_array = self.proto_array.read();

        let i = *proto_array.indices.get(block_root)?;
        proto_array.nodes.get(i).map(|node| node.weight())
    }

    /// The latest attestation recorded for a validator, if it has ever voted.
    pub fn latest_message(&self, validator_index: usize) -> Option<(Hash256, Epoch)> {
        let votes = self.votes.read();

        if validator_index < votes.0.len() {
            let vote = &votes.0[validator_index];

            if *vote == VoteTracker::default() {
                None
            } else {
                Some((vote.next_root, vote.next_epoch))
            }
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        SszContainer::from(self).as_ssz_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        SszContainer::from_ssz_bytes(bytes)
            .map(Into::into)
            .map_err(|e| format!("Failed to decode ForkChoice: {:?}", e))
    }

    /// Returns a read-lock to the core `ProtoArray` struct.
    ///
    /// Should only be used when encoding/decoding during troubleshooting.
    pub fn core_proto_array(&self) -> RwLockReadGuard<ProtoArray> {
        self.proto_array.read()
    }
}

/// Returns a list of `deltas`, where there is one delta for each of the indices in
/// `0..indices.len()`.
///
/// The deltas are formed by a change between `old_balances` and `new_balances`, and/or a change
/// of vote in `votes`. A validator whose balance changed while its vote stayed put still emits
/// `-old_balance` and `+new_balance` on the unchanged root; without that correction the weights
/// drift as soon as any balance moves.
///
/// A current root that is not in `indices` is assumed to be outside of the tree (i.e.,
/// pre-finalization) and only has its old weight dropped. A next root that is not in `indices`
/// has not been delivered as a block yet; the vote stays pending and lands on a later pass.
fn compute_deltas(
    indices: &HashMap<Hash256, usize>,
    votes: &mut ElasticList<VoteTracker>,
    old_balances: &[u64],
    new_balances: &[u64],
) -> Result<Vec<i64>, Error> {
    let mut deltas = vec![0_i64; indices.len()];

    for (val_index, vote) in votes.iter_mut().enumerate() {
        // There is no need to create a score change if the validator has never voted.
        if vote.current_root == Hash256::zero() && vote.next_root == Hash256::zero() {
            continue;
        }

        // Validators not yet known in the old balances were not counted before; treat their old
        // balance as zero. Validators missing from the new balances can happen when the
        // justified state moves to a fork that on-boarded fewer validators; treat their new
        // balance as zero.
        let old_balance = old_balances.get(val_index).copied().unwrap_or(0);
        let new_balance = new_balances.get(val_index).copied().unwrap_or(0);

        if vote.current_root != vote.next_root || old_balance != new_balance {
            // Remove the previously counted balance. The zero root is the "counted nowhere"
            // sentinel and never receives a delta.
            if vote.current_root != Hash256::zero() {
                if let Some(current_delta_index) = indices.get(&vote.current_root).copied() {
                    let delta = deltas
                        .get(current_delta_index)
                        .ok_or(Error::InvalidNodeDelta(current_delta_index))?
                        .checked_sub(old_balance as i64)
                        .ok_or(Error::DeltaOverflow {
                            node_index: current_delta_index,
                            weight: 0,
                            delta: -(old_balance as i64),
                        })?;

                    // Array access safe due to check on previous line.
                    deltas[current_delta_index] = delta;
                }
            }

            if let Some(next_delta_index) = indices.get(&vote.next_root).copied() {
                let delta = deltas
                    .get(next_delta_index)
                    .ok_or(Error::InvalidNodeDelta(next_delta_index))?
                    .checked_add(new_balance as i64)
                    .ok_or(Error::DeltaOverflow {
                        node_index: next_delta_index,
                        weight: 0,
                        delta: new_balance as i64,
                    })?;

                // Array access safe due to check on previous line.
                deltas[next_delta_index] = delta;

                vote.current_root = vote.next_root;
            } else {
                // The target block has not been delivered yet. The vote is now counted nowhere
                // and stays pending, so it lands on the next pass once the block arrives.
                vote.current_root = Hash256::zero();
            }
        }
    }

    Ok(deltas)
}

#[cfg(test)]
mod test_compute_deltas {
    use super::*;

    /// Gives a hash that is not the zero hash (unless i is `u64::max_value`).
    fn hash_from_index(i: usize) -> Hash256 {
        Hash256::from_low_u64_be(i as u64 + 1)
    }

    fn indices_for(count: usize) -> HashMap<Hash256, usize> {
        (0..count).map(|i| (hash_from_index(i), i)).collect()
    }

    fn assert_votes_committed(votes: &ElasticList<VoteTracker>) {
        for vote in &votes.0 {
            assert_eq!(
                vote.current_root, vote.next_root,
                "the vote should have been committed"
            );
        }
    }

    #[test]
    fn never_voted_validators_emit_nothing() {
        let validator_count = 16;
        let indices = indices_for(validator_count);
        let mut votes = ElasticList(vec![VoteTracker::default(); validator_count]);
        let balances = vec![0; validator_count];

        let deltas = compute_deltas(&indices, &mut votes, &balances, &balances)
            .expect("should compute deltas");

        assert_eq!(deltas, vec![0; validator_count]);
        assert_votes_committed(&votes);
    }

    #[test]
    fn all_voted_the_same() {
        const BALANCE: u64 = 42;
        let validator_count = 16;
        let indices = indices_for(validator_count);
        let mut votes = ElasticList(
            (0..validator_count)
                .map(|_| VoteTracker {
                    current_root: Hash256::zero(),
                    next_root: hash_from_index(0),
                    next_epoch: Epoch::new(0),
                })
                .collect(),
        );
        let balances = vec![BALANCE; validator_count];

        let deltas = compute_deltas(&indices, &mut votes, &balances, &balances)
            .expect("should compute deltas");

        for (i, delta) in deltas.into_iter().enumerate() {
            if i == 0 {
                assert_eq!(delta, BALANCE as i64 * validator_count as i64);
            } else {
                assert_eq!(delta, 0);
            }
        }
        assert_votes_committed(&votes);
    }

    #[test]
    fn all_voted_differently() {
        const BALANCE: u64 = 42;
        let validator_count = 16;
        let indices = indices_for(validator_count);
        let mut votes = ElasticList(
            (0..validator_count)
                .map(|i| VoteTracker {
                    current_root: Hash256::zero(),
                    next_root: hash_from_index(i),
                    next_epoch: Epoch::new(0),
                })
                .collect(),
        );
        let balances = vec![BALANCE; validator_count];

        let deltas = compute_deltas(&indices, &mut votes, &balances, &balances)
            .expect("should compute deltas");

        for delta in deltas {
            assert_eq!(delta, BALANCE as i64);
        }
        assert_votes_committed(&votes);
    }

    #[test]
    fn moving_votes_transfer_weight() {
        const BALANCE: u64 = 42;
        let validator_count = 16;
        let indices = indices_for(validator_count);
        let mut votes = ElasticList(
            (0..validator_count)
                .map(|_| VoteTracker {
                    current_root: hash_from_index(0),
                    next_root: hash_from_index(1),
                    next_epoch: Epoch::new(0),
                })
                .collect(),
        );
        let balances = vec![BALANCE; validator_count];

        let deltas = compute_deltas(&indices, &mut votes, &balances, &balances)
            .expect("should compute deltas");

        let total_delta = BALANCE as i64 * validator_count as i64;
        assert_eq!(deltas[0], -total_delta);
        assert_eq!(deltas[1], total_delta);
        for delta in &deltas[2..] {
            assert_eq!(*delta, 0);
        }
        assert_votes_committed(&votes);
    }

    #[test]
    fn votes_leaving_the_tree_only_subtract() {
        const BALANCE: u64 = 42;

        // There is only one block in the tree.
        let mut indices = HashMap::new();
        indices.insert(hash_from_index(0), 0);

        let balances = vec![BALANCE; 2];

        let mut votes = ElasticList(vec![
            // One validator moves their vote from the block to the zero hash.
            VoteTracker {
                current_root: hash_from_index(0),
                next_root: Hash256::zero(),
                next_epoch: Epoch::new(0),
            },
            // One validator moves their vote from the block to something outside the tree.
            VoteTracker {
                current_root: hash_from_index(0),
                next_root: Hash256::from_low_u64_be(1337),
                next_epoch: Epoch::new(0),
            },
        ]);

        let deltas = compute_deltas(&indices, &mut votes, &balances, &balances)
            .expect("should compute deltas");

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0], -(BALANCE as i64) * 2);

        // The vote towards the undelivered block stays pending rather than being committed.
        assert_eq!(votes.0[0].current_root, Hash256::zero());
        assert_eq!(votes.0[1].current_root, Hash256::zero());
        assert_eq!(votes.0[1].next_root, Hash256::from_low_u64_be(1337));
    }

    #[test]
    fn balance_change_corrects_an_unchanged_vote() {
        const OLD_BALANCE: u64 = 42;
        const NEW_BALANCE: u64 = OLD_BALANCE * 2;

        let indices = indices_for(2);
        let mut votes = ElasticList(vec![VoteTracker {
            current_root: hash_from_index(0),
            next_root: hash_from_index(0),
            next_epoch: Epoch::new(0),
        }]);

        let deltas = compute_deltas(&indices, &mut votes, &[OLD_BALANCE], &[NEW_BALANCE])
            .expect("should compute deltas");

        assert_eq!(deltas[0], NEW_BALANCE as i64 - OLD_BALANCE as i64);
        assert_eq!(deltas[1], 0);
        assert_votes_committed(&votes);
    }

    #[test]
    fn appearing_validator_only_adds() {
        const BALANCE: u64 = 42;

        let indices = indices_for(2);

        // Two validators move votes from block 0 to block 1, but only one of them existed in the
        // old balances.
        let mut votes = ElasticList(vec![
            VoteTracker {
                current_root: hash_from_index(0),
                next_root: hash_from_index(1),
                next_epoch: Epoch::new(0),
            };
            2
        ]);
        let old_balances = vec![BALANCE; 1];
        let new_balances = vec![BALANCE; 2];

        let deltas = compute_deltas(&indices, &mut votes, &old_balances, &new_balances)
            .expect("should compute deltas");

        assert_eq!(deltas[0], -(BALANCE as i64));
        assert_eq!(deltas[1], 2 * BALANCE as i64);
        assert_votes_committed(&votes);
    }

    #[test]
    fn disappearing_validator_only_subtracts() {
        const BALANCE: u64 = 42;

        let indices = indices_for(2);

        // Two validators move votes from block 0 to block 1, but only one of them remains in the
        // new balances.
        let mut votes = ElasticList(vec![
            VoteTracker {
                current_root: hash_from_index(0),
                next_root: hash_from_index(1),
                next_epoch: Epoch::new(0),
            };
            2
        ]);
        let old_balances = vec![BALANCE; 2];
        let new_balances = vec![BALANCE; 1];

        let deltas = compute_deltas(&indices, &mut votes, &old_balances, &new_balances)
            .expect("should compute deltas");

        assert_eq!(deltas[0], -(BALANCE as i64) * 2);
        assert_eq!(deltas[1], BALANCE as i64);
        assert_votes_committed(&votes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(i: u64) -> Hash256 {
        Hash256::from_low_u64_be(i)
    }

    fn fork_choice() -> ForkChoice {
        ForkChoice::new(
            Epoch::new(1),
            Epoch::new(1),
            root(0),
            Slot::new(0),
            Hash256::zero(),
            DEFAULT_PRUNE_THRESHOLD,
        )
        .expect("should create fork choice")
    }

    #[test]
    fn vote_epochs_are_monotone() {
        let fc = fork_choice();

        fc.process_attestation(0, root(1), Epoch::new(3)).unwrap();
        assert_eq!(fc.latest_message(0), Some((root(1), Epoch::new(3))));

        // An older message must not regress the recorded vote.
        fc.process_attestation(0, root(2), Epoch::new(2)).unwrap();
        assert_eq!(fc.latest_message(0), Some((root(1), Epoch::new(3))));

        fc.process_attestation(0, root(2), Epoch::new(4)).unwrap();
        assert_eq!(fc.latest_message(0), Some((root(2), Epoch::new(4))));
    }

    #[test]
    fn first_vote_at_genesis_epoch_registers() {
        let fc = fork_choice();

        fc.process_attestation(0, root(1), Epoch::new(0)).unwrap();
        assert_eq!(fc.latest_message(0), Some((root(1), Epoch::new(0))));
    }

    #[test]
    fn never_voted_validator_has_no_latest_message() {
        let fc = fork_choice();

        assert_eq!(fc.latest_message(0), None);

        fc.process_attestation(3, root(1), Epoch::new(1)).unwrap();
        assert_eq!(fc.latest_message(0), None);
        assert_eq!(fc.latest_message(2), None);
        assert_eq!(fc.latest_message(7), None);
    }

    #[test]
    fn block_readers() {
        let fc = fork_choice();
        let block = Block {
            slot: Slot::new(1),
            root: root(1),
            parent_root: Some(root(0)),
            state_root: root(42),
            justified_epoch: Epoch::new(1),
            finalized_epoch: Epoch::new(1),
        };

        assert!(!fc.contains_block(&root(1)));
        fc.process_block(block.clone()).unwrap();

        assert!(fc.contains_block(&root(1)));
        assert_eq!(fc.block_count(), 2);
        assert_eq!(fc.get_block(&root(1)), Some(block));
        assert_eq!(fc.get_weight(&root(1)), Some(0));
        assert_eq!(fc.get_block(&root(9)), None);
        assert_eq!(fc.get_weight(&root(9)), None);
    }

    #[test]
    fn attestation_for_unknown_block_counts_once_the_block_arrives() {
        let fc = fork_choice();
        let balances = vec![1];

        fc.process_attestation(0, root(1), Epoch::new(2)).unwrap();

        // The vote targets an undelivered block; the head is unaffected.
        let head = fc
            .find_head(Epoch::new(1), root(0), Epoch::new(1), &balances)
            .unwrap();
        assert_eq!(head, root(0));

        fc.process_block(Block {
            slot: Slot::new(1),
            root: root(1),
            parent_root: Some(root(0)),
            state_root: Hash256::zero(),
            justified_epoch: Epoch::new(1),
            finalized_epoch: Epoch::new(1),
        })
        .unwrap();

        let head = fc
            .find_head(Epoch::new(1), root(0), Epoch::new(1), &balances)
            .unwrap();
        assert_eq!(head, root(1));
        assert_eq!(fc.get_weight(&root(1)), Some(1));
    }

    #[test]
    fn on_tick_records_the_slot() {
        let fc = fork_choice();

        assert_eq!(fc.current_slot(), Slot::new(0));
        fc.on_tick(Slot::new(4));
        assert_eq!(fc.current_slot(), Slot::new(4));
    }
}

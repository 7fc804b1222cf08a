use crate::error::Error;
use crate::fork_choice::Block;
use crate::types::{Epoch, Hash256, Slot};
use serde_derive::{Deserialize, Serialize};
use ssz::four_byte_option_impl;
use ssz_derive::{Decode, Encode};
use std::collections::HashMap;

// Define a "legacy" implementation of `Option<usize>` which uses four bytes for encoding the union
// selector.
four_byte_option_impl!(four_byte_option_usize, usize);
four_byte_option_impl!(four_byte_option_hash256, Hash256);

/// A block in the proto-array, identified by its index in [`ProtoArray::nodes`].
///
/// Everything apart from `weight`, the two cursors and (during prune renumbering) `parent` is
/// immutable once the node has been created.
#[derive(Clone, PartialEq, Debug, Encode, Decode, Serialize, Deserialize)]
pub struct ProtoNode {
    /// The `slot` is not necessary for the proto-array itself, it just exists so external
    /// components can easily query the block slot.
    pub slot: Slot,
    /// The `state_root` is likewise carried for external components only.
    pub state_root: Hash256,
    pub root: Hash256,
    /// The root of the parent block. `None` only for the anchor node, whose parent has been
    /// pruned away or never existed.
    #[ssz(with = "four_byte_option_hash256")]
    pub parent_root: Option<Hash256>,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    #[ssz(with = "four_byte_option_usize")]
    parent: Option<usize>,
    weight: u64,
    #[ssz(with = "four_byte_option_usize")]
    best_child: Option<usize>,
    #[ssz(with = "four_byte_option_usize")]
    best_descendant: Option<usize>,
}

impl ProtoNode {
    /// The accumulated vote weight favouring the subtree rooted at this node.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// The index of the parent node, if it is still in the array.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ProtoArray {
    /// Do not attempt to prune the tree unless it has at least this many nodes. Small prunes
    /// simply waste time.
    pub prune_threshold: usize,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub nodes: Vec<ProtoNode>,
    pub indices: HashMap<Hash256, usize>,
}

impl ProtoArray {
    /// Apply a vector of score changes, one entry per node index.
    ///
    /// Iterates backwards through the array twice:
    ///
    /// - The first pass computes the new weight of each node and back-propagates the node's raw
    ///   delta into its parent's slot in `deltas`. The order of `self.nodes` ensures a child is
    ///   always visited before its parent. No weight is committed until the whole vector is known
    ///   to apply cleanly, so a failed call leaves the array untouched.
    /// - The second pass re-evaluates each parent's best-child and best-descendant. This runs
    ///   only after every weight is final; comparing a child against a sibling whose delta has
    ///   not yet landed would leave a stale winner in place.
    pub fn apply_score_changes(
        &mut self,
        mut deltas: Vec<i64>,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> Result<(), Error> {
        if deltas.len() != self.nodes.len() {
            return Err(Error::InvalidDeltaLen {
                deltas: deltas.len(),
                nodes: self.nodes.len(),
            });
        }

        if justified_epoch != self.justified_epoch || finalized_epoch != self.finalized_epoch {
            self.justified_epoch = justified_epoch;
            self.finalized_epoch = finalized_epoch;
        }

        let mut new_weights: Vec<u64> = self.nodes.iter().map(|node| node.weight).collect();

        for node_index in (0..self.nodes.len()).rev() {
            let node_delta = deltas
                .get(node_index)
                .copied()
                .ok_or(Error::InvalidNodeDelta(node_index))?;

            let weight = new_weights
                .get(node_index)
                .copied()
                .ok_or(Error::InvalidNodeIndex(node_index))?;

            let new_weight = if node_delta < 0 {
                weight
                    .checked_sub(node_delta.unsigned_abs())
                    .ok_or(Error::DeltaOverflow {
                        node_index,
                        weight,
                        delta: node_delta,
                    })?
            } else {
                weight
                    .checked_add(node_delta as u64)
                    .ok_or(Error::DeltaOverflow {
                        node_index,
                        weight,
                        delta: node_delta,
                    })?
            };
            new_weights[node_index] = new_weight;

            if let Some(parent_index) = self
                .nodes
                .get(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?
                .parent
            {
                let parent_delta = deltas
                    .get_mut(parent_index)
                    .ok_or(Error::InvalidParentDelta(parent_index))?;

                // Back-propagate the node's delta to its parent.
                *parent_delta += node_delta;
            }
        }

        for (node, new_weight) in self.nodes.iter_mut().zip(new_weights) {
            node.weight = new_weight;
        }

        for node_index in (0..self.nodes.len()).rev() {
            if let Some(parent_index) = self
                .nodes
                .get(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?
                .parent
            {
                self.maybe_update_best_child_and_descendant(parent_index, node_index)?;
            }
        }

        Ok(())
    }

    /// Register a block with the fork choice.
    ///
    /// A block whose parent root is unknown attaches with no parent and can only become
    /// reachable again through pruning. It is only sane to supply `parent_root: None` for the
    /// anchor block.
    pub fn on_block(&mut self, block: Block) -> Result<(), Error> {
        // If the block is already known, simply ignore it.
        if self.indices.contains_key(&block.root) {
            return Ok(());
        }

        let node_index = self.nodes.len();

        let node = ProtoNode {
            slot: block.slot,
            state_root: block.state_root,
            root: block.root,
            parent_root: block.parent_root,
            parent: block
                .parent_root
                .and_then(|parent_root| self.indices.get(&parent_root).copied()),
            justified_epoch: block.justified_epoch,
            finalized_epoch: block.finalized_epoch,
            weight: 0,
            best_child: None,
            best_descendant: None,
        };

        let parent_index = node.parent;
        self.indices.insert(node.root, node_index);
        self.nodes.push(node);

        if let Some(parent_index) = parent_index {
            self.maybe_update_best_child_and_descendant(parent_index, node_index)?;
        }

        Ok(())
    }

    /// Follows the best-descendant links to find the best-block (i.e., head-block).
    ///
    /// ## Notes
    ///
    /// The result of this function is not guaranteed to be accurate if `Self::on_block` has
    /// been called without a subsequent `Self::apply_score_changes` call. This is because
    /// `on_block` does not attempt to walk backwards through the tree and update the
    /// best-child/best-descendant links.
    pub fn find_head(&self, justified_root: &Hash256) -> Result<Hash256, Error> {
        let justified_index = self
            .indices
            .get(justified_root)
            .copied()
            .ok_or(Error::JustifiedNodeUnknown(*justified_root))?;

        let justified_node = self
            .nodes
            .get(justified_index)
            .ok_or(Error::InvalidJustifiedIndex(justified_index))?;

        let best_descendant_index = justified_node.best_descendant.unwrap_or(justified_index);

        let best_node = self
            .nodes
            .get(best_descendant_index)
            .ok_or(Error::InvalidBestDescendant(best_descendant_index))?;

        // Perform a sanity check that the node is indeed valid to be the head.
        if !self.node_is_viable_for_head(best_node) {
            return Err(Error::InvalidBestNode {
                start_root: *justified_root,
                justified_epoch: self.justified_epoch,
                finalized_epoch: self.finalized_epoch,
                head_root: best_node.root,
                head_justified_epoch: best_node.justified_epoch,
                head_finalized_epoch: best_node.finalized_epoch,
            });
        }

        Ok(best_node.root)
    }

    /// Update the tree with new finalization information, pruning all nodes that precede the
    /// newly finalized block in insertion order.
    ///
    /// The tree is only actually pruned if the finalized block's index is at least
    /// `self.prune_threshold`; a call below the threshold returns without mutating anything.
    ///
    /// Surviving indices are renumbered by subtracting the finalized index. A cursor that would
    /// go negative points at a pruned ancestor; it becomes `None` and the survivor is a root
    /// from then on.
    pub fn maybe_prune(
        &mut self,
        finalized_root: Hash256,
        finalized_epoch: Epoch,
    ) -> Result<(), Error> {
        let finalized_index = *self
            .indices
            .get(&finalized_root)
            .ok_or(Error::FinalizedNodeUnknown(finalized_root))?;

        if finalized_index < self.prune_threshold {
            // Pruning small numbers of nodes incurs more cost than benefit.
            return Ok(());
        }

        // Remove the `self.indices` key/values for all the to-be-deleted nodes.
        for node_index in 0..finalized_index {
            let root = &self
                .nodes
                .get(node_index)
                .ok_or(Error::InvalidNodeIndex(node_index))?
                .root;
            self.indices.remove(root);
        }

        // Drop all the nodes prior to finalization.
        self.nodes = self.nodes.split_off(finalized_index);

        // Adjust the indices map.
        for (_root, index) in self.indices.iter_mut() {
            *index = index
                .checked_sub(finalized_index)
                .ok_or(Error::IndexOverflow("indices"))?;
        }

        // Renumber the indices inside the surviving nodes to match the new layout of
        // `self.nodes`.
        for node in self.nodes.iter_mut() {
            node.parent = node
                .parent
                .and_then(|index| index.checked_sub(finalized_index));
            node.best_child = node
                .best_child
                .and_then(|index| index.checked_sub(finalized_index));
            node.best_descendant = node
                .best_descendant
                .and_then(|index| index.checked_sub(finalized_index));
        }

        self.finalized_epoch = finalized_epoch;

        Ok(())
    }

    /// Observe the parent at `parent_index` with respect to the child at `child_index` and
    /// potentially modify the `parent.best_child` and `parent.best_descendant` values.
    ///
    /// ## Detail
    ///
    /// There are four outcomes:
    ///
    /// - The child is already the best child but it's now invalid due to a FFG change and should
    ///   be removed.
    /// - The child is already the best child and the parent is updated with the new
    ///   best-descendant.
    /// - The child is not the best child but becomes the best child.
    /// - The child is not the best child and does not become the best child.
    fn maybe_update_best_child_and_descendant(
        &mut self,
        parent_index: usize,
        child_index: usize,
    ) -> Result<(), Error> {
        let child = self
            .nodes
            .get(child_index)
            .ok_or(Error::InvalidNodeIndex(child_index))?;

        let parent = self
            .nodes
            .get(parent_index)
            .ok_or(Error::InvalidNodeIndex(parent_index))?;

        let child_leads_to_viable_head = self.node_leads_to_viable_head(child)?;

        // These three variables are aliases to the three options that we may set the
        // `parent.best_child` and `parent.best_descendant` to.
        let change_to_none = (None, None);
        let change_to_child = (
            Some(child_index),
            child.best_descendant.or(Some(child_index)),
        );
        let no_change = (parent.best_child, parent.best_descendant);

        let (new_best_child, new_best_descendant) =
            if let Some(best_child_index) = parent.best_child {
                if best_child_index == child_index {
                    if child_leads_to_viable_head {
                        // The child is already the best-child; set it again so that the
                        // best-descendant of the parent is refreshed.
                        change_to_child
                    } else {
                        // The child is already the best-child of the parent but it's not viable
                        // for the head; remove it.
                        change_to_none
                    }
                } else if !child_leads_to_viable_head {
                    // A child that does not lead to a viable head never displaces the incumbent.
                    no_change
                } else {
                    let best_child = self
                        .nodes
                        .get(best_child_index)
                        .ok_or(Error::InvalidBestDescendant(best_child_index))?;

                    if !self.node_leads_to_viable_head(best_child)? {
                        // The incumbent no longer leads to a viable head; the child wins
                        // unconditionally.
                        change_to_child
                    } else if child.weight == best_child.weight {
                        // Tie-breaker of equal weights by root.
                        if child.root >= best_child.root {
                            change_to_child
                        } else {
                            no_change
                        }
                    } else if child.weight > best_child.weight {
                        change_to_child
                    } else {
                        no_change
                    }
                }
            } else if child_leads_to_viable_head {
                // There is no current best-child and the child is viable.
                change_to_child
            } else {
                // There is no current best-child but the child is not viable.
                no_change
            };

        let parent = self
            .nodes
            .get_mut(parent_index)
            .ok_or(Error::InvalidNodeIndex(parent_index))?;

        parent.best_child = new_best_child;
        parent.best_descendant = new_best_descendant;

        Ok(())
    }

    /// Indicates if the node itself is viable for the head, or if its best descendant is viable
    /// for the head.
    fn node_leads_to_viable_head(&self, node: &ProtoNode) -> Result<bool, Error> {
        let best_descendant_is_viable_for_head =
            if let Some(best_descendant_index) = node.best_descendant {
                let best_descendant = self
                    .nodes
                    .get(best_descendant_index)
                    .ok_or(Error::InvalidBestDescendant(best_descendant_index))?;

                self.node_is_viable_for_head(best_descendant)
            } else {
                false
            };

        Ok(best_descendant_is_viable_for_head || self.node_is_viable_for_head(node))
    }

    /// A node whose epoch view disagrees with the array's cannot become the head.
    ///
    /// While the array's finalized epoch is still genesis, any finalized epoch is accepted; the
    /// anchor has not finalized anything yet, so blocks cannot be filtered on a view that does
    /// not exist.
    fn node_is_viable_for_head(&self, node: &ProtoNode) -> bool {
        node.justified_epoch == self.justified_epoch
            && (node.finalized_epoch == self.finalized_epoch
                || self.finalized_epoch == Epoch::new(0))
    }

    /// Return a reverse iterator over the nodes which comprise the chain ending at `block_root`.
    pub fn iter_nodes<'a>(&'a self, block_root: &Hash256) -> Iter<'a> {
        let next_node_index = self.indices.get(block_root).copied();
        Iter {
            next_node_index,
            proto_array: self,
        }
    }

    /// Return a reverse iterator over the block roots of the chain ending at `block_root`.
    ///
    /// Note that unlike many other iterators, this one WILL NOT yield anything at skipped slots.
    pub fn iter_block_roots<'a>(
        &'a self,
        block_root: &Hash256,
    ) -> impl Iterator<Item = (Hash256, Slot)> + 'a {
        self.iter_nodes(block_root)
            .map(|node| (node.root, node.slot))
    }
}

/// Reverse iterator over one path through a `ProtoArray`.
pub struct Iter<'a> {
    next_node_index: Option<usize>,
    proto_array: &'a ProtoArray,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ProtoNode;

    fn next(&mut self) -> Option<Self::Item> {
        let next_node_index = self.next_node_index?;
        let node = self.proto_array.nodes.get(next_node_index)?;
        self.next_node_index = node.parent;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(i: u64) -> Hash256 {
        Hash256::from_low_u64_be(i)
    }

    fn block(slot: u64, root_index: u64, parent_index: Option<u64>, justified: u64, finalized: u64) -> Block {
        Block {
            slot: Slot::new(slot),
            root: root(root_index),
            parent_root: parent_index.map(root),
            state_root: Hash256::zero(),
            justified_epoch: Epoch::new(justified),
            finalized_epoch: Epoch::new(finalized),
        }
    }

    fn weights(array: &ProtoArray) -> Vec<u64> {
        array.nodes.iter().map(|node| node.weight()).collect()
    }

    /// B0 <- B1 <- B2, all at justified epoch 1 and finalized epoch 1, with ten units of weight
    /// landed on B2.
    fn linear_chain() -> ProtoArray {
        let mut array = ProtoArray {
            prune_threshold: 0,
            justified_epoch: Epoch::new(1),
            finalized_epoch: Epoch::new(1),
            nodes: vec![],
            indices: HashMap::new(),
        };

        array.on_block(block(0, 0, None, 1, 1)).unwrap();
        array.on_block(block(1, 1, Some(0), 1, 1)).unwrap();
        array.on_block(block(2, 2, Some(1), 1, 1)).unwrap();
        array
            .apply_score_changes(vec![0, 0, 10], Epoch::new(1), Epoch::new(1))
            .unwrap();

        array
    }

    #[test]
    fn linear_chain_head() {
        let array = linear_chain();

        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
        assert_eq!(weights(&array), vec![10, 10, 10]);
    }

    #[test]
    fn fork_ties_break_to_the_higher_root() {
        let mut array = linear_chain();

        array.on_block(block(2, 3, Some(1), 1, 1)).unwrap();
        array
            .apply_score_changes(vec![0, 0, 0, 10], Epoch::new(1), Epoch::new(1))
            .unwrap();

        // B2 and B3 are siblings with equal weight; the higher root wins.
        assert_eq!(array.find_head(&root(0)), Ok(root(3)));
        assert_eq!(weights(&array), vec![20, 20, 10, 10]);
    }

    #[test]
    fn vote_swings_head_between_forks() {
        let mut array = linear_chain();

        array.on_block(block(2, 3, Some(1), 1, 1)).unwrap();
        array
            .apply_score_changes(vec![0, 0, 0, 10], Epoch::new(1), Epoch::new(1))
            .unwrap();
        array
            .apply_score_changes(vec![0, 0, 5, 0], Epoch::new(1), Epoch::new(1))
            .unwrap();

        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
        assert_eq!(weights(&array), vec![25, 25, 15, 10]);
    }

    #[test]
    fn non_viable_child_is_never_head() {
        let mut array = linear_chain();

        // B4 claims a justified epoch ahead of the array's view.
        array.on_block(block(3, 4, Some(2), 2, 1)).unwrap();
        array
            .apply_score_changes(vec![0, 0, 0, 100], Epoch::new(1), Epoch::new(1))
            .unwrap();

        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
        // The weight still counts towards every ancestor.
        assert_eq!(weights(&array), vec![110, 110, 110, 100]);
    }

    #[test]
    fn prune_renumbers_surviving_nodes() {
        let mut array = linear_chain();

        array.on_block(block(2, 3, Some(1), 1, 1)).unwrap();
        array
            .apply_score_changes(vec![0, 0, 5, 10], Epoch::new(1), Epoch::new(1))
            .unwrap();

        array.maybe_prune(root(1), Epoch::new(1)).unwrap();

        assert_eq!(array.nodes.len(), 3);
        assert_eq!(array.indices.get(&root(1)), Some(&0));
        assert_eq!(array.nodes[0].parent(), None);
        assert!(!array.indices.contains_key(&root(0)));
        assert_eq!(array.find_head(&root(1)), Ok(root(2)));
        assert_eq!(weights(&array), vec![25, 15, 10]);
    }

    #[test]
    fn prune_below_threshold_is_a_no_op() {
        let mut array = linear_chain();
        array.prune_threshold = 256;

        array.maybe_prune(root(1), Epoch::new(1)).unwrap();

        assert_eq!(array.nodes.len(), 3);
        assert_eq!(array.indices.get(&root(0)), Some(&0));
    }

    #[test]
    fn prune_of_unknown_root_fails() {
        let mut array = linear_chain();

        assert_eq!(
            array.maybe_prune(root(9), Epoch::new(1)),
            Err(Error::FinalizedNodeUnknown(root(9)))
        );
    }

    #[test]
    fn underflowing_delta_leaves_the_array_unchanged() {
        let mut array = linear_chain();

        assert_eq!(
            array.apply_score_changes(vec![0, 0, -11], Epoch::new(1), Epoch::new(1)),
            Err(Error::DeltaOverflow {
                node_index: 2,
                weight: 10,
                delta: -11,
            })
        );

        assert_eq!(weights(&array), vec![10, 10, 10]);
        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
    }

    #[test]
    fn negative_delta_may_empty_a_weight() {
        let mut array = linear_chain();

        array
            .apply_score_changes(vec![0, 0, -10], Epoch::new(1), Epoch::new(1))
            .unwrap();

        assert_eq!(weights(&array), vec![0, 0, 0]);
        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
    }

    #[test]
    fn delta_length_must_match_node_count() {
        let mut array = linear_chain();

        assert_eq!(
            array.apply_score_changes(vec![0, 0], Epoch::new(1), Epoch::new(1)),
            Err(Error::InvalidDeltaLen { deltas: 2, nodes: 3 })
        );
    }

    #[test]
    fn unknown_justified_root_fails() {
        let array = linear_chain();

        assert_eq!(
            array.find_head(&root(9)),
            Err(Error::JustifiedNodeUnknown(root(9)))
        );
    }

    #[test]
    fn stale_epochs_invalidate_the_best_node() {
        let mut array = linear_chain();

        // Move the array's view ahead of every block.
        array
            .apply_score_changes(vec![0, 0, 0], Epoch::new(2), Epoch::new(1))
            .unwrap();

        assert!(matches!(
            array.find_head(&root(0)),
            Err(Error::InvalidBestNode { .. })
        ));
    }

    #[test]
    fn duplicate_on_block_is_a_no_op() {
        let mut array = linear_chain();

        array.on_block(block(2, 2, Some(1), 1, 1)).unwrap();

        assert_eq!(array.nodes.len(), 3);
        assert_eq!(weights(&array), vec![10, 10, 10]);
        assert_eq!(array.find_head(&root(0)), Ok(root(2)));
    }

    #[test]
    fn iter_walks_back_to_the_anchor() {
        let array = linear_chain();

        let roots: Vec<_> = array
            .iter_block_roots(&root(2))
            .map(|(root, _slot)| root)
            .collect();

        assert_eq!(roots, vec![root(2), root(1), root(0)]);
    }
}

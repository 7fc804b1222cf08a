use crate::types::{Epoch, Hash256};

#[derive(Clone, PartialEq, Debug)]
pub enum Error {
    FinalizedNodeUnknown(Hash256),
    JustifiedNodeUnknown(Hash256),
    InvalidNodeIndex(usize),
    InvalidParentDelta(usize),
    InvalidNodeDelta(usize),
    InvalidJustifiedIndex(usize),
    InvalidBestDescendant(usize),
    IndexOverflow(&'static str),
    InvalidDeltaLen {
        deltas: usize,
        nodes: usize,
    },
    DeltaOverflow {
        node_index: usize,
        weight: u64,
        delta: i64,
    },
    InvalidBestNode {
        start_root: Hash256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
        head_root: Hash256,
        head_justified_epoch: Epoch,
        head_finalized_epoch: Epoch,
    },
}

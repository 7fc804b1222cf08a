use crate::fork_choice::{ElasticList, ForkChoice, VoteTracker};
use crate::proto_array::{ProtoArray, ProtoNode};
use crate::types::{Epoch, Hash256, Slot};
use parking_lot::RwLock;
use ssz_derive::{Decode, Encode};
use std::collections::HashMap;

/// The SSZ image of a [`ForkChoice`], used when a host checkpoints the structure.
///
/// The `indices` map is flattened into pairs; everything else is stored verbatim.
#[derive(Encode, Decode)]
pub struct SszContainer {
    pub votes: Vec<VoteTracker>,
    pub balances: Vec<u64>,
    pub prune_threshold: usize,
    pub current_slot: Slot,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub nodes: Vec<ProtoNode>,
    pub indices: Vec<(Hash256, usize)>,
}

impl From<&ForkChoice> for SszContainer {
    fn from(from: &ForkChoice) -> Self {
        let proto_array = from.proto_array.read();

        Self {
            votes: from.votes.read().0.clone(),
            balances: from.balances.read().clone(),
            prune_threshold: proto_array.prune_threshold,
            current_slot: *from.current_slot.read(),
            justified_epoch: proto_array.justified_epoch,
            finalized_epoch: proto_array.finalized_epoch,
            nodes: proto_array.nodes.clone(),
            indices: proto_array.indices.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}

impl From<SszContainer> for ForkChoice {
    fn from(from: SszContainer) -> Self {
        let proto_array = ProtoArray {
            prune_threshold: from.prune_threshold,
            justified_epoch: from.justified_epoch,
            finalized_epoch: from.finalized_epoch,
            nodes: from.nodes,
            indices: from.indices.into_iter().collect::<HashMap<_, _>>(),
        };

        Self {
            proto_array: RwLock::new(proto_array),
            votes: RwLock::new(ElasticList(from.votes)),
            balances: RwLock::new(from.balances),
            current_slot: RwLock::new(from.current_slot),
        }
    }
}

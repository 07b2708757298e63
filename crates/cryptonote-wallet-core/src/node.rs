//! Boundary to the remote node. Mixin fetching and relay are
//! completion-callback shaped; the wallet bridges them to synchronous waits
//! inside its critical section.

use thiserror::Error;

use crate::types::PublicKey;

#[derive(Clone, Debug, Error)]
#[error("node request failed: {0}")]
pub struct NodeError(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RandomOutputEntry {
    pub global_amount_index: u64,
    pub out_key: PublicKey,
}

/// Random ring candidates the node returned for one amount.
#[derive(Clone, Debug)]
pub struct RandomOutsForAmount {
    pub amount: u64,
    pub outs: Vec<RandomOutputEntry>,
}

pub type NodeCallback<T> = Box<dyn FnOnce(std::result::Result<T, NodeError>) + Send>;

pub trait NodeClient: Send + Sync {
    /// Requests, for each amount, `outs_count` random outputs of the same
    /// amount from the chain.
    fn get_random_outs_by_amounts(
        &self,
        amounts: Vec<u64>,
        outs_count: u64,
        callback: NodeCallback<Vec<RandomOutsForAmount>>,
    );

    fn relay_transaction(&self, transaction_blob: Vec<u8>, callback: NodeCallback<()>);

    fn last_known_block_height(&self) -> u32;

    fn minimal_fee(&self) -> u64;
}

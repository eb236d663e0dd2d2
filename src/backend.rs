/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The capability set the host supplies to the core.
//!
//! Everything the core needs from the outside world, from identity and
//! signing to validator lookup, the chain head, block commitment, and message
//! delivery, comes through one [`Backend`] implementation handed to
//! [`Core::new`](crate::engine::Core::new). The core never inspects the
//! implementation beyond these methods.

use crate::errors::ConsensusError;
use crate::types::basic::{CommittedSeal, Height, SignatureBytes, ValidatorAddress};
use crate::types::block::Block;
use crate::validators::ValidatorSet;

pub trait Backend: Send + Sync + 'static {
    /// This node's validator address.
    fn address(&self) -> ValidatorAddress;

    /// Sign a 32-byte digest with this node's key.
    fn sign(&self, digest: &[u8]) -> Result<SignatureBytes, ConsensusError>;

    /// Recover the signer's address from a digest and a signature produced by
    /// [`sign`](Self::sign).
    fn recover_sender(
        &self,
        digest: &[u8],
        signature: &SignatureBytes,
    ) -> Result<ValidatorAddress, ConsensusError>;

    /// The ordered validator set for `height`, or `None` if the chain has not
    /// reached the point where that set is known. The core treats an unknown
    /// height as a future height.
    fn validators(&self, height: Height) -> Option<ValidatorSet>;

    /// The current chain head and the validator that proposed it.
    fn last_committed_block(&self) -> (Block, ValidatorAddress);

    /// Hand a finalized block to the block executor. `block`'s header already
    /// carries `seals`; they are passed alongside for hosts that store them
    /// separately. An error is non-fatal to the core.
    fn commit(&self, block: Block, seals: Vec<CommittedSeal>) -> Result<(), ConsensusError>;

    /// Fire-and-forget delivery of `payload` to every validator in
    /// `validators`, **including this node**. The core consumes its own
    /// broadcasts through [`post_message`](crate::engine::Core::post_message)
    /// like any other message.
    fn broadcast(&self, validators: &ValidatorSet, payload: Vec<u8>);

    /// Fire-and-forget forwarding of an already-seen `payload` to peers.
    /// Unlike [`broadcast`](Self::broadcast), self-delivery is not required.
    fn gossip(&self, validators: &ValidatorSet, payload: Vec<u8>);

    /// Ask peers to push their current consensus state to this node.
    fn ask_sync(&self, validators: &ValidatorSet);

    /// Push this node's current-height messages to a peer that asked for
    /// sync.
    fn sync_peer(&self, peer: &ValidatorAddress, payloads: Vec<Vec<u8>>);
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus message envelope and its typed payloads.
//!
//! A [`Message`] is the unit that crosses the wire: a tagged envelope carrying
//! a Borsh-encoded [`Proposal`] or [`Vote`] payload, the sender's address, the
//! sender's signature, and (for precommits over a concrete block) a committed
//! seal.
//!
//! ## Signing domain
//!
//! The signature covers the Keccak-256 digest of the
//! [signing preimage](Message::signing_preimage): the ordered concatenation of
//! the message tag, the big-endian height and round, the payload bytes, the
//! sender address, and the committed seal if present. Only the signature field
//! itself is excluded. Committed seals are signed separately over
//! [`committed_seal_preimage`]: `block_hash ‖ precommit_tag`.

use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};

use crate::errors::ConsensusError;
use crate::types::basic::{
    BlockHash, CommittedSeal, Height, Round, SignatureBytes, Step, ValidatorAddress, View,
    ADDRESS_LENGTH, HASH_LENGTH,
};
use crate::types::block::Block;

/// Tag distinguishing the three consensus message kinds.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Debug)]
pub enum MessageCode {
    Proposal,
    Prevote,
    Precommit,
}

impl MessageCode {
    /// The wire tag byte, also used in the signing preimage.
    pub(crate) const fn tag(&self) -> u8 {
        match self {
            MessageCode::Proposal => 0,
            MessageCode::Prevote => 1,
            MessageCode::Precommit => 2,
        }
    }

    /// The round step a message of this kind belongs to, for classification
    /// and backlog ordering.
    pub(crate) const fn step(&self) -> Step {
        match self {
            MessageCode::Proposal => Step::Propose,
            MessageCode::Prevote => Step::Prevote,
            MessageCode::Precommit => Step::Precommit,
        }
    }
}

/// Payload of a `Proposal` message: the proposer's candidate block for the
/// view, plus the round in which the block last gathered a prevote quorum
/// (`None` if it never did).
#[derive(Clone, PartialEq, BorshSerialize, BorshDeserialize, Debug)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    pub valid_round: Option<Round>,
    pub block: Block,
}

/// Payload of a `Prevote` or `Precommit` message. `block_hash` of `None` is
/// the NIL vote.
#[derive(Clone, PartialEq, BorshSerialize, BorshDeserialize, Debug)]
pub struct Vote {
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<BlockHash>,
}

/// The signed envelope around a [`Proposal`] or [`Vote`].
#[derive(Clone, PartialEq, BorshSerialize, BorshDeserialize, Debug)]
pub struct Message {
    pub code: MessageCode,
    /// Borsh encoding of the payload matching `code`.
    pub payload: Vec<u8>,
    pub sender: ValidatorAddress,
    pub signature: SignatureBytes,
    /// Present only on precommits for a concrete block.
    pub committed_seal: Option<CommittedSeal>,
}

impl Message {
    /// Build an unsigned proposal envelope.
    pub fn proposal(proposal: &Proposal, sender: ValidatorAddress) -> Message {
        Message {
            code: MessageCode::Proposal,
            payload: proposal
                .try_to_vec()
                .expect("borsh encoding of an in-memory proposal cannot fail"),
            sender,
            signature: SignatureBytes::empty(),
            committed_seal: None,
        }
    }

    /// Build an unsigned prevote envelope.
    pub fn prevote(vote: &Vote, sender: ValidatorAddress) -> Message {
        Message {
            code: MessageCode::Prevote,
            payload: vote
                .try_to_vec()
                .expect("borsh encoding of an in-memory vote cannot fail"),
            sender,
            signature: SignatureBytes::empty(),
            committed_seal: None,
        }
    }

    /// Build an unsigned precommit envelope. `committed_seal` must be present
    /// exactly when the vote is for a concrete block.
    pub fn precommit(
        vote: &Vote,
        sender: ValidatorAddress,
        committed_seal: Option<CommittedSeal>,
    ) -> Message {
        Message {
            code: MessageCode::Precommit,
            payload: vote
                .try_to_vec()
                .expect("borsh encoding of an in-memory vote cannot fail"),
            sender,
            signature: SignatureBytes::empty(),
            committed_seal,
        }
    }

    /// Decode an envelope from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Message, ConsensusError> {
        Message::try_from_slice(bytes).map_err(|_| ConsensusError::InvalidMessage)
    }

    /// Encode the envelope to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.try_to_vec()
            .expect("borsh encoding of an in-memory message cannot fail")
    }

    /// Decode the payload as a [`Proposal`]. Fails if the tag or the payload
    /// bytes do not match.
    pub fn decode_proposal(&self) -> Result<Proposal, ConsensusError> {
        if self.code != MessageCode::Proposal {
            return Err(ConsensusError::FailedDecodeProposal);
        }
        Proposal::try_from_slice(&self.payload).map_err(|_| ConsensusError::FailedDecodeProposal)
    }

    /// Decode the payload as a [`Vote`]. Fails if the tag or the payload bytes
    /// do not match.
    pub fn decode_vote(&self) -> Result<Vote, ConsensusError> {
        match self.code {
            MessageCode::Prevote => {
                Vote::try_from_slice(&self.payload).map_err(|_| ConsensusError::FailedDecodePrevote)
            }
            MessageCode::Precommit => Vote::try_from_slice(&self.payload)
                .map_err(|_| ConsensusError::FailedDecodePrecommit),
            MessageCode::Proposal => Err(ConsensusError::FailedDecodePrevote),
        }
    }

    /// The (height, round) the message speaks about, read out of the payload.
    pub fn view(&self) -> Result<View, ConsensusError> {
        match self.code {
            MessageCode::Proposal => {
                let p = self.decode_proposal()?;
                Ok(View::new(p.height, p.round))
            }
            MessageCode::Prevote | MessageCode::Precommit => {
                let v = self.decode_vote()?;
                Ok(View::new(v.height, v.round))
            }
        }
    }

    /// The bytes the envelope signature is formed over. Everything except the
    /// signature field, in a fixed order.
    pub fn signing_preimage(&self) -> Result<Vec<u8>, ConsensusError> {
        let view = self.view()?;
        let mut preimage = Vec::with_capacity(1 + 16 + self.payload.len() + ADDRESS_LENGTH);
        preimage.push(self.code.tag());
        preimage.extend_from_slice(&view.height.to_be_bytes());
        preimage.extend_from_slice(&view.round.to_be_bytes());
        preimage.extend_from_slice(&self.payload);
        preimage.extend_from_slice(&self.sender.bytes());
        if let Some(seal) = &self.committed_seal {
            preimage.extend_from_slice(seal.bytes());
        }
        Ok(preimage)
    }

    /// Keccak-256 of the [signing preimage](Self::signing_preimage). This is
    /// what the host's `sign` and `recover_sender` capabilities operate on.
    pub fn signing_digest(&self) -> Result<[u8; HASH_LENGTH], ConsensusError> {
        Ok(Keccak256::digest(&self.signing_preimage()?).into())
    }
}

/// The canonical bytes a committed seal signs over: `block_hash ‖ precommit_tag`.
pub fn committed_seal_preimage(block_hash: &BlockHash) -> Vec<u8> {
    let mut preimage = Vec::with_capacity(HASH_LENGTH + 1);
    preimage.extend_from_slice(&block_hash.bytes());
    preimage.push(MessageCode::Precommit.tag());
    preimage
}

/// Keccak-256 of the [committed seal preimage](committed_seal_preimage).
pub fn committed_seal_digest(block_hash: &BlockHash) -> [u8; HASH_LENGTH] {
    Keccak256::digest(&committed_seal_preimage(block_hash)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::block::BlockHeader;

    fn test_block(number: u64) -> Block {
        Block {
            header: BlockHeader {
                number: Height::new(number),
                parent_hash: BlockHash::new([0; HASH_LENGTH]),
                proposer: ValidatorAddress::new([1; 20]),
                committed_seals: Vec::new(),
                extra: Vec::new(),
            },
            body: Vec::new(),
        }
    }

    #[test]
    fn proposal_round_trips() {
        let proposal = Proposal {
            height: Height::new(5),
            round: Round::new(2),
            valid_round: Some(Round::new(1)),
            block: test_block(5),
        };
        let msg = Message::proposal(&proposal, ValidatorAddress::new([1; 20]));
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.decode_proposal().unwrap(), proposal);
        assert_eq!(
            decoded.view().unwrap(),
            View::new(Height::new(5), Round::new(2))
        );
    }

    #[test]
    fn vote_round_trips() {
        let vote = Vote {
            height: Height::new(3),
            round: Round::new(0),
            block_hash: None,
        };
        let msg = Message::prevote(&vote, ValidatorAddress::new([2; 20]));
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.decode_vote().unwrap(), vote);
    }

    #[test]
    fn mismatched_tag_fails_decode() {
        let vote = Vote {
            height: Height::new(3),
            round: Round::new(0),
            block_hash: None,
        };
        let msg = Message::prevote(&vote, ValidatorAddress::new([2; 20]));
        assert_eq!(
            msg.decode_proposal().unwrap_err(),
            ConsensusError::FailedDecodeProposal
        );
    }

    #[test]
    fn signing_digest_is_deterministic_and_signature_free() {
        let vote = Vote {
            height: Height::new(3),
            round: Round::new(1),
            block_hash: Some(test_block(3).hash()),
        };
        let mut msg = Message::prevote(&vote, ValidatorAddress::new([2; 20]));
        let digest = msg.signing_digest().unwrap();
        // Attaching a signature must not change the digest.
        msg.signature = SignatureBytes::new(vec![0xff; 65]);
        assert_eq!(digest, msg.signing_digest().unwrap());
        // A different round must.
        let other = Message::prevote(
            &Vote {
                round: Round::new(2),
                ..vote
            },
            ValidatorAddress::new([2; 20]),
        );
        assert_ne!(digest, other.signing_digest().unwrap());
    }

    #[test]
    fn seal_preimage_binds_hash_and_tag() {
        let hash = test_block(1).hash();
        let preimage = committed_seal_preimage(&hash);
        assert_eq!(preimage.len(), HASH_LENGTH + 1);
        assert_eq!(preimage[..HASH_LENGTH], hash.bytes());
        assert_eq!(preimage[HASH_LENGTH], MessageCode::Precommit.tag());
    }

    #[test]
    fn garbage_fails_envelope_decode() {
        assert_eq!(
            Message::decode(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err(),
            ConsensusError::InvalidMessage
        );
    }
}

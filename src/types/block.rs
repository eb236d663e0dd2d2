/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block type agreed on by consensus.
//!
//! The core treats block contents as opaque: it reads the header fields it
//! needs (number, proposer, committed seals) and identifies the block by its
//! hash everywhere else. Execution and validation of the body belong to the
//! host.

use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};

use super::basic::{BlockHash, CommittedSeal, Height, ValidatorAddress};

/// Header of a [`Block`].
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Debug)]
pub struct BlockHeader {
    /// The height this block occupies in the chain.
    pub number: Height,
    /// Hash of the block at `number - 1`.
    pub parent_hash: BlockHash,
    /// Address of the validator that produced the block.
    pub proposer: ValidatorAddress,
    /// Per-validator signatures over `hash ‖ precommit_tag`, filled in by the
    /// commit step. Empty until the block commits.
    pub committed_seals: Vec<CommittedSeal>,
    /// Host-defined extra data. Opaque to the core.
    pub extra: Vec<u8>,
}

/// A candidate or committed block.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Debug)]
pub struct Block {
    pub header: BlockHeader,
    /// Host-defined body bytes (transactions etc.). Opaque to the core.
    pub body: Vec<u8>,
}

impl Block {
    pub fn number(&self) -> Height {
        self.header.number
    }

    pub fn proposer(&self) -> ValidatorAddress {
        self.header.proposer
    }

    /// Keccak-256 over the Borsh encoding of the header with the
    /// committed-seals field cleared. Sealing a block therefore does not
    /// change its identity: the hash voted on before commit equals the hash
    /// of the sealed block.
    pub fn hash(&self) -> BlockHash {
        let mut unsealed = self.header.clone();
        unsealed.committed_seals = Vec::new();
        let encoded = unsealed
            .try_to_vec()
            .expect("borsh encoding of an in-memory header cannot fail");
        BlockHash::new(Keccak256::digest(&encoded).into())
    }

    /// A copy of this block whose header carries the given committed seals.
    pub fn with_committed_seals(&self, seals: Vec<CommittedSeal>) -> Block {
        let mut sealed = self.clone();
        sealed.header.committed_seals = seals;
        sealed
    }
}

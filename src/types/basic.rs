/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert types shared across the consensus core.
//!
//! These follow the newtype pattern: they are sent around and inspected, but
//! have no active behavior of their own.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Debug, Display, Formatter};

/// Number of bytes in a [`ValidatorAddress`].
pub const ADDRESS_LENGTH: usize = 20;

/// Number of bytes in a [`BlockHash`].
pub const HASH_LENGTH: usize = 32;

/// Number of bytes in a [`CommittedSeal`].
pub const COMMITTED_SEAL_LENGTH: usize = 65;

/// Index of a committed block in the chain. Height 0 is the genesis block;
/// consensus is always run for the height directly above the chain head.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Debug,
)]
pub struct Height(u64);

impl Height {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The height directly above this one.
    pub const fn next(&self) -> Height {
        Height(self.0 + 1)
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Attempt number within a height. Reset to 0 whenever the height changes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Debug,
)]
pub struct Round(u64);

impl Round {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Round {
        Round(self.0 + 1)
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Phase within a round.
///
/// Steps are totally ordered: `Propose < Prevote < Precommit < PrecommitDone`.
/// The order is what the message classifier and the backlog priority queue are
/// built on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Step {
    Propose,
    Prevote,
    Precommit,
    PrecommitDone,
}

impl Step {
    /// Position of the step in the propose → precommitDone progression.
    pub(crate) const fn ordinal(&self) -> u8 {
        match self {
            Step::Propose => 0,
            Step::Prevote => 1,
            Step::Precommit => 2,
            Step::PrecommitDone => 3,
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Propose => "propose",
            Step::Prevote => "prevote",
            Step::Precommit => "precommit",
            Step::PrecommitDone => "precommitDone",
        };
        f.write_str(name)
    }
}

/// A (height, round) pair. Views are ordered lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct View {
    pub height: Height,
    pub round: Round,
}

impl View {
    pub const fn new(height: Height, round: Round) -> Self {
        Self { height, round }
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.round)
    }
}

/// The 20-byte address identifying a validator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct ValidatorAddress([u8; ADDRESS_LENGTH]);

impl ValidatorAddress {
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; ADDRESS_LENGTH] {
        self.0
    }
}

impl Display for ValidatorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for ValidatorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// The 32-byte hash identifying a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlockHash([u8; HASH_LENGTH]);

impl BlockHash {
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; HASH_LENGTH] {
        self.0
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // The first four bytes are enough to tell hashes apart in logs.
        write!(f, "0x")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A digital signature produced by the host's [`sign`](crate::backend::Backend::sign)
/// capability. The core treats the contents as opaque.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Debug)]
pub struct SignatureBytes(Vec<u8>);

impl SignatureBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// An empty signature, used in envelopes that have not been finalized yet.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A validator's 65-byte signature over `block_hash ‖ precommit_tag`, carried
/// inside precommit messages and collected into the header of the committed
/// block.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Debug)]
pub struct CommittedSeal(Vec<u8>);

impl CommittedSeal {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_order_lexicographically() {
        let v = |h, r| View::new(Height::new(h), Round::new(r));
        assert!(v(1, 5) < v(2, 0));
        assert!(v(2, 0) < v(2, 1));
        assert_eq!(v(3, 4), v(3, 4));
    }

    #[test]
    fn steps_order_by_progression() {
        assert!(Step::Propose < Step::Prevote);
        assert!(Step::Prevote < Step::Precommit);
        assert!(Step::Precommit < Step::PrecommitDone);
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordered validator set and proposer selection.
//!
//! The set is fixed for the duration of a height and refreshed from the host's
//! [`validators`](crate::backend::Backend::validators) oracle on height change.
//! Validators keep the order the host gave them: round-robin proposer
//! selection depends on it.

use std::collections::HashMap;
use std::slice;

use crate::types::basic::{Round, ValidatorAddress};

#[derive(Clone, PartialEq, Debug)]
pub struct ValidatorSet {
    // Host order, not sorted.
    validators: Vec<ValidatorAddress>,
    positions: HashMap<ValidatorAddress, usize>,
    proposer: Option<ValidatorAddress>,
}

impl ValidatorSet {
    /// Create a validator set from the host-given ordered list. Duplicate
    /// addresses are ignored after their first occurrence.
    pub fn new(addresses: Vec<ValidatorAddress>) -> ValidatorSet {
        let mut validators = Vec::with_capacity(addresses.len());
        let mut positions = HashMap::with_capacity(addresses.len());
        for address in addresses {
            if !positions.contains_key(&address) {
                positions.insert(address, validators.len());
                validators.push(address);
            }
        }
        ValidatorSet {
            validators,
            positions,
            proposer: None,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, address: &ValidatorAddress) -> bool {
        self.positions.contains_key(address)
    }

    /// Index of `address` in the host order, if it is a member.
    pub fn position(&self, address: &ValidatorAddress) -> Option<usize> {
        self.positions.get(address).copied()
    }

    /// Iterate over the members in host order.
    pub fn validators(&self) -> slice::Iter<ValidatorAddress> {
        self.validators.iter()
    }

    /// The smallest vote count that establishes agreement: ⌈2n/3⌉.
    ///
    /// This is deliberately the inclusive `>= ceil(2n/3)` form rather than the
    /// more common `> 2n/3`; for n divisible by 3 the two differ by one vote
    /// and mixing them breaks vote compatibility between peers.
    pub fn quorum(&self) -> usize {
        (2 * self.validators.len() + 2) / 3
    }

    /// The number of Byzantine validators the set tolerates: ⌊(n−1)/3⌋.
    pub fn f(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// Recompute and cache the proposer for `round`, given the proposer of the
    /// previously committed height.
    pub fn calc_proposer(&mut self, last_proposer: &ValidatorAddress, round: Round) {
        self.proposer = self.proposer_for(last_proposer, round);
    }

    /// The round-robin proposer: `validators[(i + 1 + round) mod n]` where `i`
    /// is the position of `last_proposer`. A `last_proposer` outside the set
    /// (the genesis case) rotates from position 0.
    ///
    /// Pure in `(validators, last_proposer, round)`.
    pub fn proposer_for(
        &self,
        last_proposer: &ValidatorAddress,
        round: Round,
    ) -> Option<ValidatorAddress> {
        if self.validators.is_empty() {
            return None;
        }
        let seed = match self.position(last_proposer) {
            Some(i) => i as u64 + 1 + round.int(),
            None => round.int(),
        };
        let index = (seed % self.validators.len() as u64) as usize;
        Some(self.validators[index])
    }

    /// The proposer cached by the last [`calc_proposer`](Self::calc_proposer).
    pub fn proposer(&self) -> Option<ValidatorAddress> {
        self.proposer
    }

    pub fn is_proposer(&self, address: &ValidatorAddress) -> bool {
        self.proposer.as_ref() == Some(address)
    }
}

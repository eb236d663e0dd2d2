/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-(height, round, step) vote tally.
//!
//! Votes are bucketed by the block hash they endorse, with a distinguished NIL
//! bucket (`None`). Each validator lands in at most one bucket: a repeat of
//! the same vote is dropped as a re-delivery, while a vote for a *different*
//! bucket is an equivocation attempt and is dropped without being counted.
//!
//! The full message is kept per vote so the commit step can extract committed
//! seals and the sync path can snapshot everything seen this height.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::messages::Message;
use crate::types::basic::{BlockHash, ValidatorAddress};

/// What happened to a vote handed to [`VoteSet::add`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteOutcome {
    /// First vote from this sender; counted.
    Added,
    /// Same sender, same bucket as before; dropped.
    Duplicate,
    /// Same sender, different bucket than before; dropped and reported.
    Equivocation,
}

#[derive(Clone, Debug, Default)]
pub struct VoteSet {
    // Bucket -> messages, in arrival order. IndexMap keeps bucket iteration
    // deterministic, which fixes the order committed seals are extracted in.
    votes: IndexMap<Option<BlockHash>, Vec<Message>>,
    voted: HashMap<ValidatorAddress, Option<BlockHash>>,
}

impl VoteSet {
    pub fn new() -> VoteSet {
        VoteSet::default()
    }

    /// Record `message` as a vote from its sender for `bucket` (`None` = NIL).
    pub fn add(&mut self, bucket: Option<BlockHash>, message: Message) -> VoteOutcome {
        match self.voted.get(&message.sender) {
            Some(previous) if *previous == bucket => VoteOutcome::Duplicate,
            Some(_) => VoteOutcome::Equivocation,
            None => {
                self.voted.insert(message.sender, bucket);
                self.votes.entry(bucket).or_default().push(message);
                VoteOutcome::Added
            }
        }
    }

    /// Number of votes in `bucket`.
    pub fn count(&self, bucket: &Option<BlockHash>) -> usize {
        self.votes.get(bucket).map_or(0, Vec::len)
    }

    /// Total number of votes across all buckets, NIL included.
    pub fn total(&self) -> usize {
        self.voted.len()
    }

    /// The bucket holding at least `quorum` votes, if any. At most one bucket
    /// can qualify for any quorum above n/2.
    pub fn majority(&self, quorum: usize) -> Option<Option<BlockHash>> {
        self.votes
            .iter()
            .find(|(_, votes)| votes.len() >= quorum)
            .map(|(bucket, _)| *bucket)
    }

    /// The messages voting for `bucket`, in arrival order.
    pub fn votes_for(&self, bucket: &Option<BlockHash>) -> &[Message] {
        self.votes.get(bucket).map_or(&[], Vec::as_slice)
    }

    /// All vote messages in the set.
    pub fn messages(&self) -> Vec<Message> {
        self.votes.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Vote;
    use crate::types::basic::{Height, Round};

    fn address(byte: u8) -> ValidatorAddress {
        ValidatorAddress::new([byte; 20])
    }

    fn hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn prevote(sender: u8, bucket: Option<BlockHash>) -> Message {
        let vote = Vote {
            height: Height::new(1),
            round: Round::new(0),
            block_hash: bucket,
        };
        Message::prevote(&vote, address(sender))
    }

    #[test]
    fn counts_votes_per_bucket() {
        let mut set = VoteSet::new();
        assert_eq!(set.add(Some(hash(1)), prevote(0, Some(hash(1)))), VoteOutcome::Added);
        assert_eq!(set.add(Some(hash(1)), prevote(1, Some(hash(1)))), VoteOutcome::Added);
        assert_eq!(set.add(None, prevote(2, None)), VoteOutcome::Added);

        assert_eq!(set.count(&Some(hash(1))), 2);
        assert_eq!(set.count(&None), 1);
        assert_eq!(set.count(&Some(hash(9))), 0);
        assert_eq!(set.total(), 3);
    }

    #[test]
    fn duplicate_votes_are_dropped() {
        let mut set = VoteSet::new();
        set.add(Some(hash(1)), prevote(0, Some(hash(1))));
        assert_eq!(
            set.add(Some(hash(1)), prevote(0, Some(hash(1)))),
            VoteOutcome::Duplicate
        );
        assert_eq!(set.count(&Some(hash(1))), 1);
        assert_eq!(set.total(), 1);
    }

    #[test]
    fn equivocation_is_detected_and_never_double_counted() {
        let mut set = VoteSet::new();
        set.add(Some(hash(1)), prevote(0, Some(hash(1))));
        assert_eq!(
            set.add(Some(hash(2)), prevote(0, Some(hash(2)))),
            VoteOutcome::Equivocation
        );
        assert_eq!(
            set.add(None, prevote(0, None)),
            VoteOutcome::Equivocation
        );
        assert_eq!(set.count(&Some(hash(1))), 1);
        assert_eq!(set.count(&Some(hash(2))), 0);
        assert_eq!(set.count(&None), 0);
        assert_eq!(set.total(), 1);
    }

    #[test]
    fn majority_requires_quorum() {
        let mut set = VoteSet::new();
        set.add(Some(hash(1)), prevote(0, Some(hash(1))));
        set.add(Some(hash(1)), prevote(1, Some(hash(1))));
        set.add(None, prevote(2, None));

        assert_eq!(set.majority(3), None);
        set.add(Some(hash(1)), prevote(3, Some(hash(1))));
        assert_eq!(set.majority(3), Some(Some(hash(1))));
    }

    #[test]
    fn nil_bucket_can_reach_majority() {
        let mut set = VoteSet::new();
        for sender in 0..3 {
            set.add(None, prevote(sender, None));
        }
        assert_eq!(set.majority(3), Some(None));
    }

    #[test]
    fn votes_for_returns_messages_in_arrival_order() {
        let mut set = VoteSet::new();
        set.add(Some(hash(1)), prevote(4, Some(hash(1))));
        set.add(Some(hash(1)), prevote(2, Some(hash(1))));
        let senders: Vec<_> = set
            .votes_for(&Some(hash(1)))
            .iter()
            .map(|m| m.sender)
            .collect();
        assert_eq!(senders, vec![address(4), address(2)]);
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Snapshot of a single consensus round.
//!
//! A `RoundState` is mutated only while its round is current. When the round
//! advances within a height, the state is archived read-only so that
//! valid-round lookups and late commits can still see its votes.

use crate::messages::{Message, Proposal};
use crate::types::basic::{BlockHash, Height, Round, Step, View};
use crate::vote_set::VoteSet;

#[derive(Clone, Debug)]
pub(crate) struct RoundState {
    height: Height,
    round: Round,
    step: Step,
    proposal: Option<Proposal>,
    proposal_msg: Option<Message>,
    pub(crate) prevotes: VoteSet,
    pub(crate) precommits: VoteSet,
}

impl RoundState {
    pub(crate) fn new(height: Height, round: Round) -> RoundState {
        RoundState {
            height,
            round,
            step: Step::Propose,
            proposal: None,
            proposal_msg: None,
            prevotes: VoteSet::new(),
            precommits: VoteSet::new(),
        }
    }

    pub(crate) fn height(&self) -> Height {
        self.height
    }

    pub(crate) fn round(&self) -> Round {
        self.round
    }

    pub(crate) fn view(&self) -> View {
        View::new(self.height, self.round)
    }

    pub(crate) fn step(&self) -> Step {
        self.step
    }

    pub(crate) fn set_step(&mut self, step: Step) {
        self.step = step;
    }

    /// Accept `proposal` as the round's at-most-one proposal.
    pub(crate) fn set_proposal(&mut self, proposal: Proposal, message: Message) {
        self.proposal = Some(proposal);
        self.proposal_msg = Some(message);
    }

    pub(crate) fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// Hash of the accepted proposal's block, if a proposal was accepted.
    pub(crate) fn proposal_block_hash(&self) -> Option<BlockHash> {
        self.proposal.as_ref().map(|p| p.block.hash())
    }

    /// Every message this round has accepted: the proposal plus all votes.
    /// Feeds the current-height snapshot served to syncing peers.
    pub(crate) fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(proposal_msg) = &self.proposal_msg {
            messages.push(proposal_msg.clone());
        }
        messages.extend(self.prevotes.messages());
        messages.extend(self.precommits.messages());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Vote;
    use crate::types::basic::{BlockHash, ValidatorAddress, HASH_LENGTH};
    use crate::types::block::{Block, BlockHeader};

    fn test_proposal(height: u64, round: u64) -> (Proposal, Message) {
        let block = Block {
            header: BlockHeader {
                number: Height::new(height),
                parent_hash: BlockHash::new([0; HASH_LENGTH]),
                proposer: ValidatorAddress::new([1; 20]),
                committed_seals: Vec::new(),
                extra: Vec::new(),
            },
            body: Vec::new(),
        };
        let proposal = Proposal {
            height: Height::new(height),
            round: Round::new(round),
            valid_round: None,
            block,
        };
        let msg = Message::proposal(&proposal, ValidatorAddress::new([1; 20]));
        (proposal, msg)
    }

    #[test]
    fn fresh_round_starts_in_propose() {
        let state = RoundState::new(Height::new(1), Round::new(0));
        assert_eq!(state.step(), Step::Propose);
        assert!(state.proposal().is_none());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn messages_snapshot_includes_proposal_and_votes() {
        let mut state = RoundState::new(Height::new(1), Round::new(0));
        let (proposal, msg) = test_proposal(1, 0);
        let hash = proposal.block.hash();
        state.set_proposal(proposal, msg);

        let vote = Vote {
            height: Height::new(1),
            round: Round::new(0),
            block_hash: Some(hash),
        };
        state.prevotes.add(
            Some(hash),
            Message::prevote(&vote, ValidatorAddress::new([2; 20])),
        );
        state.precommits.add(
            Some(hash),
            Message::precommit(&vote, ValidatorAddress::new([3; 20]), None),
        );

        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.proposal_block_hash(), Some(hash));
    }
}

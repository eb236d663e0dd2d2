/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proposal broadcast and handling.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, Proposal};
use crate::types::basic::{Round, Step, View};
use crate::types::block::Block;

use super::driver::{Driver, MessageTarget};

impl<B: Backend> Driver<B> {
    /// Broadcast this node's proposal for the current view. `valid_round` is
    /// the round the block last gathered a prevote quorum, if re-proposing a
    /// valid value.
    pub(crate) fn send_proposal(&mut self, block: Block, valid_round: Option<Round>) {
        if self.sent_proposal {
            return;
        }
        let view = self.current_view();
        let proposal = Proposal {
            height: view.height,
            round: view.round,
            valid_round,
            block,
        };
        log::debug!(
            "proposing block {} at view {}",
            proposal.block.hash(),
            view
        );
        let message = Message::proposal(&proposal, self.address);
        self.sent_proposal = true;
        self.finalize_and_broadcast(message);
    }

    pub(crate) fn handle_proposal(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let proposal = message.decode_proposal()?;
        let view = View::new(proposal.height, proposal.round);

        // A proposal claiming a valid round at or past its own round is
        // nonsense, whatever our current view is.
        if proposal.valid_round.map_or(false, |vr| vr >= proposal.round) {
            return Err(ConsensusError::InvalidMessage);
        }
        if proposal.block.number() != proposal.height {
            return Err(ConsensusError::InvalidMessage);
        }

        let target = self.classify(view, Step::Propose)?;

        if self.proposer_of(view.round).as_ref() != Some(&message.sender) {
            return Err(ConsensusError::NotFromProposer);
        }

        match target {
            MessageTarget::Old(_) => {
                self.with_target_state(target, |state| {
                    if state.proposal().is_none() {
                        state.set_proposal(proposal, message.clone());
                    }
                });
                // The proposal may be the missing piece of a precommit quorum
                // already gathered in that round.
                self.try_commit(target);
                Ok(())
            }
            MessageTarget::Current => {
                self.with_target_state(target, |state| {
                    if state.proposal().is_none() {
                        state.set_proposal(proposal.clone(), message.clone());
                    }
                });
                if self.current_step() == Step::Propose {
                    self.prevote_for_proposal(&proposal);
                } else {
                    // Late proposal: it may complete quorums that were
                    // waiting on it.
                    self.apply_prevote_quorum_rules();
                    self.try_commit(MessageTarget::Current);
                }
                Ok(())
            }
        }
    }

    /// The propose-step voting rules: prevote for the proposed block if the
    /// lock permits it, NIL otherwise.
    pub(crate) fn prevote_for_proposal(&mut self, proposal: &Proposal) {
        let hash = proposal.block.hash();
        match proposal.valid_round {
            None => {
                let acceptable = self.locked_round.is_none()
                    || self.locked_value.as_ref().map(|b| b.hash()) == Some(hash);
                self.send_prevote(acceptable.then_some(hash));
                self.set_step(Step::Prevote);
            }
            Some(valid_round) => {
                // Only act once the prevote quorum from the claimed round is
                // actually in evidence; otherwise stay in propose and let the
                // timeout cover liveness.
                let quorum = self.quorum();
                let evidence = {
                    let rounds = self.shared.rounds.read();
                    rounds
                        .old
                        .get(&valid_round)
                        .map_or(false, |state| state.prevotes.count(&Some(hash)) >= quorum)
                };
                if evidence {
                    let acceptable = self.locked_round.map_or(true, |lr| lr <= valid_round)
                        || self.locked_value.as_ref().map(|b| b.hash()) == Some(hash);
                    self.send_prevote(acceptable.then_some(hash));
                    self.set_step(Step::Prevote);
                }
            }
        }
    }
}

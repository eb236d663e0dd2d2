/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Prevote broadcast, handling, and the prevote-quorum rules.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, Vote};
use crate::types::basic::{BlockHash, Round, Step, View};
use crate::vote_set::VoteOutcome;

use super::driver::{Driver, MessageTarget};

impl<B: Backend> Driver<B> {
    /// Broadcast a prevote for `hash` (`None` = NIL) at the current view.
    pub(crate) fn send_prevote(&mut self, hash: Option<BlockHash>) {
        if self.sent_prevote {
            return;
        }
        let view = self.current_view();
        let vote = Vote {
            height: view.height,
            round: view.round,
            block_hash: hash,
        };
        match hash {
            Some(hash) => log::debug!("prevoting for block {} at view {}", hash, view),
            None => log::debug!("prevoting nil at view {}", view),
        }
        let message = Message::prevote(&vote, self.address);
        self.sent_prevote = true;
        self.finalize_and_broadcast(message);
    }

    pub(crate) fn handle_prevote(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let vote = message.decode_vote()?;
        let view = View::new(vote.height, vote.round);
        let target = self.classify(view, Step::Prevote)?;

        let outcome = self.with_target_state(target, |state| {
            state.prevotes.add(vote.block_hash, message.clone())
        });
        match outcome {
            VoteOutcome::Duplicate => {
                log::debug!("ignoring duplicate prevote from {}", message.sender);
                return Ok(());
            }
            VoteOutcome::Equivocation => {
                log::warn!(
                    "conflicting prevote from {} at view {}; keeping the first",
                    message.sender,
                    view
                );
                return Ok(());
            }
            VoteOutcome::Added => {}
        }

        match target {
            MessageTarget::Current => self.apply_prevote_quorum_rules(),
            MessageTarget::Old(round) => self.apply_old_round_prevote_evidence(round),
        }
        Ok(())
    }

    /// A prevote landing in an archived round can complete the evidence a
    /// pending re-proposal was waiting for.
    fn apply_old_round_prevote_evidence(&mut self, round: Round) {
        if self.current_step() != Step::Propose {
            return;
        }
        let proposal = self.shared.rounds.read().current.proposal().cloned();
        if let Some(proposal) = proposal {
            if proposal.valid_round == Some(round) {
                self.prevote_for_proposal(&proposal);
            }
        }
    }

    /// The prevote-quorum transitions for the current round. Called after any
    /// event that can change the tally or make the proposal known.
    pub(crate) fn apply_prevote_quorum_rules(&mut self) {
        let quorum = self.quorum();
        let (step, majority, total, proposal_hash, proposal_block, round) = {
            let rounds = self.shared.rounds.read();
            let state = &rounds.current;
            (
                state.step(),
                state.prevotes.majority(quorum),
                state.prevotes.total(),
                state.proposal_block_hash(),
                state.proposal().map(|p| p.block.clone()),
                state.round(),
            )
        };
        if step < Step::Prevote {
            return;
        }

        match majority {
            Some(Some(hash)) => {
                // A quorum for a concrete block counts only once its proposal
                // is known, and the valid-value update applies once per
                // round.
                if proposal_hash == Some(hash) && !self.set_valid_round_and_value {
                    let block = proposal_block.expect("proposal is present when its hash is");
                    log::debug!("prevote quorum for block {} at round {}", hash, round);
                    self.valid_round = Some(round);
                    self.valid_value = Some(block.clone());
                    self.set_valid_round_and_value = true;
                    if step == Step::Prevote {
                        self.locked_round = Some(round);
                        self.locked_value = Some(block);
                        self.send_precommit(Some(hash));
                        self.set_step(Step::Precommit);
                    }
                }
            }
            Some(None) if step == Step::Prevote => {
                log::debug!("prevote quorum for nil at round {}", round);
                self.send_precommit(None);
                self.set_step(Step::Precommit);
            }
            _ => {}
        }

        // A quorum of prevotes of any mix arms the prevote timer, once per
        // round.
        if self.current_step() == Step::Prevote
            && total >= quorum
            && !self.prevote_timeout.is_scheduled()
        {
            let view = self.current_view();
            let duration = self.config.timeout(Step::Prevote, view.round);
            self.prevote_timeout
                .schedule(duration, view, self.events_tx.clone());
        }
    }
}

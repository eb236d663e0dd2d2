/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Precommit broadcast, handling, and the commit rule.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{committed_seal_digest, Message, Vote};
use crate::types::basic::{
    BlockHash, CommittedSeal, SignatureBytes, Step, View, COMMITTED_SEAL_LENGTH,
};
use crate::vote_set::VoteOutcome;

use super::driver::{Driver, MessageTarget};

impl<B: Backend> Driver<B> {
    /// Broadcast a precommit for `hash` (`None` = NIL) at the current view.
    /// Precommits for a concrete block carry a committed seal over
    /// `hash ‖ precommit_tag`.
    pub(crate) fn send_precommit(&mut self, hash: Option<BlockHash>) {
        if self.sent_precommit {
            return;
        }
        let view = self.current_view();
        let committed_seal = match hash {
            Some(hash) => {
                let digest = committed_seal_digest(&hash);
                match self.backend.sign(&digest) {
                    Ok(signature) => Some(CommittedSeal::new(signature.bytes().to_vec())),
                    Err(err) => {
                        log::error!("failed to sign committed seal: {}", err);
                        return;
                    }
                }
            }
            None => None,
        };
        match hash {
            Some(hash) => log::debug!("precommitting block {} at view {}", hash, view),
            None => log::debug!("precommitting nil at view {}", view),
        }
        let vote = Vote {
            height: view.height,
            round: view.round,
            block_hash: hash,
        };
        let message = Message::precommit(&vote, self.address, committed_seal);
        self.sent_precommit = true;
        self.finalize_and_broadcast(message);
    }

    pub(crate) fn handle_precommit(&mut self, message: &Message) -> Result<(), ConsensusError> {
        let vote = message.decode_vote()?;
        let view = View::new(vote.height, vote.round);

        // A precommit for a concrete block must carry that block's committed
        // seal, signed by the message sender.
        if let Some(hash) = vote.block_hash {
            let seal = message
                .committed_seal
                .as_ref()
                .ok_or(ConsensusError::InvalidSenderOfCommittedSeal)?;
            if seal.len() != COMMITTED_SEAL_LENGTH {
                return Err(ConsensusError::InvalidSenderOfCommittedSeal);
            }
            let digest = committed_seal_digest(&hash);
            let signature = SignatureBytes::new(seal.bytes().to_vec());
            let signer = self
                .backend
                .recover_sender(&digest, &signature)
                .map_err(|_| ConsensusError::InvalidSenderOfCommittedSeal)?;
            if signer != message.sender {
                return Err(ConsensusError::InvalidSenderOfCommittedSeal);
            }
        }

        let target = self.classify(view, Step::Precommit)?;

        let outcome = self.with_target_state(target, |state| {
            state.precommits.add(vote.block_hash, message.clone())
        });
        match outcome {
            VoteOutcome::Duplicate => {
                log::debug!("ignoring duplicate precommit from {}", message.sender);
                return Ok(());
            }
            VoteOutcome::Equivocation => {
                log::warn!(
                    "conflicting precommit from {} at view {}; keeping the first",
                    message.sender,
                    view
                );
                return Ok(());
            }
            VoteOutcome::Added => {}
        }

        self.try_commit(target);

        // A quorum of precommits of any mix arms the precommit timer, once
        // per round.
        if target == MessageTarget::Current {
            let (total, quorum) = {
                let rounds = self.shared.rounds.read();
                (rounds.current.precommits.total(), self.quorum())
            };
            if total >= quorum && !self.precommit_timeout.is_scheduled() {
                let view = self.current_view();
                let duration = self.config.timeout(Step::Precommit, view.round);
                self.precommit_timeout
                    .schedule(duration, view, self.events_tx.clone());
            }
        }
        Ok(())
    }

    /// The commit rule: a precommit quorum for a concrete block whose
    /// proposal is known finalizes the height. Applies to the current round
    /// and to archived rounds alike.
    pub(crate) fn try_commit(&mut self, target: MessageTarget) {
        let quorum = self.quorum();
        let commit = {
            let rounds = self.shared.rounds.read();
            let state = match target {
                MessageTarget::Current => &rounds.current,
                MessageTarget::Old(round) => match rounds.old.get(&round) {
                    Some(state) => state,
                    None => return,
                },
            };
            match state.precommits.majority(quorum) {
                // Committing a block we have never seen would be unsafe, so
                // the proposal must be known even though the votes alone form
                // a quorum.
                Some(Some(hash)) if state.proposal_block_hash() == Some(hash) => {
                    let block = state
                        .proposal()
                        .map(|p| p.block.clone())
                        .expect("proposal is present when its hash is");
                    let seals: Vec<CommittedSeal> = state
                        .precommits
                        .votes_for(&Some(hash))
                        .iter()
                        .filter_map(|m| m.committed_seal.clone())
                        .collect();
                    Some((block, seals))
                }
                _ => None,
            }
        };
        let Some((block, seals)) = commit else { return };

        // One delivery per height: once precommitDone, the decision stands
        // until the host reports the new chain head or a round skip recovers
        // a failed commit.
        if self.current_step() == Step::PrecommitDone {
            return;
        }
        self.set_step(Step::PrecommitDone);

        let hash = block.hash();
        log::info!("committing block {} at height {}", hash, block.number());
        let sealed = block.with_committed_seals(seals.clone());
        if let Err(err) = self.backend.commit(sealed, seals) {
            log::error!("block executor rejected block {}: {}", hash, err);
        }
    }
}

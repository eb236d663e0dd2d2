/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single-threaded driver that executes the Tendermint algorithm.
//!
//! The driver owns every mutation of consensus state. It services one event
//! channel (messages, timeouts, committed notifications) plus the candidate
//! block channel, classifies each message against the current (height, round,
//! step), and applies the transition rules. Future messages park in the
//! backlog and are replayed synchronously on every step transition, so a step
//! change and the messages it makes eligible are observed atomically.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::backlog::Backlog;
use crate::config::Config;
use crate::errors::ConsensusError;
use crate::events::{CoreEvent, TimeoutEvent};
use crate::messages::{Message, MessageCode};
use crate::round_state::RoundState;
use crate::timeout::Timeout;
use crate::types::basic::{Height, Round, Step, ValidatorAddress, View};
use crate::types::block::Block;
use crate::validators::ValidatorSet;

use super::Shared;

// How often suspension points wake to observe shutdown.
const POLL: Duration = Duration::from_millis(50);

/// Where an applicable message lands: the current round's state, or the
/// read-only state of an earlier round of the same height.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum MessageTarget {
    Current,
    Old(Round),
}

pub(crate) struct Driver<B: Backend> {
    pub(crate) config: Config,
    pub(crate) address: ValidatorAddress,
    pub(crate) backend: Arc<B>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) backlog: Arc<Backlog>,
    pub(crate) events_tx: Sender<CoreEvent>,
    events_rx: Receiver<CoreEvent>,
    candidates_rx: Receiver<Block>,

    // Proposer of the last committed block; seeds round-robin selection.
    last_proposer: ValidatorAddress,

    pub(crate) locked_round: Option<Round>,
    pub(crate) locked_value: Option<Block>,
    pub(crate) valid_round: Option<Round>,
    pub(crate) valid_value: Option<Block>,

    // Distinct senders seen per future round, for the round-skip rule.
    future_round_senders: BTreeMap<Round, HashSet<ValidatorAddress>>,

    // Candidate blocks supplied by the host, keyed by height.
    pending_blocks: BTreeMap<Height, Block>,

    pub(crate) sent_proposal: bool,
    pub(crate) sent_prevote: bool,
    pub(crate) sent_precommit: bool,
    pub(crate) set_valid_round_and_value: bool,

    pub(crate) propose_timeout: Timeout,
    pub(crate) prevote_timeout: Timeout,
    pub(crate) precommit_timeout: Timeout,
}

impl<B: Backend> Driver<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        address: ValidatorAddress,
        backend: Arc<B>,
        shared: Arc<Shared>,
        backlog: Arc<Backlog>,
        events_tx: Sender<CoreEvent>,
        events_rx: Receiver<CoreEvent>,
        candidates_rx: Receiver<Block>,
    ) -> Driver<B> {
        Driver {
            config,
            address,
            backend,
            shared,
            backlog,
            events_tx,
            events_rx,
            candidates_rx,
            last_proposer: ValidatorAddress::new([0; 20]),
            locked_round: None,
            locked_value: None,
            valid_round: None,
            valid_value: None,
            future_round_senders: BTreeMap::new(),
            pending_blocks: BTreeMap::new(),
            sent_proposal: false,
            sent_prevote: false,
            sent_precommit: false,
            set_valid_round_and_value: false,
            propose_timeout: Timeout::new(Step::Propose),
            prevote_timeout: Timeout::new(Step::Prevote),
            precommit_timeout: Timeout::new(Step::Precommit),
        }
    }

    /// The driver thread body: start the first round, then service events
    /// until shutdown.
    pub(crate) fn run(mut self) {
        self.start_round(Round::new(0));
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            while let Ok(block) = self.candidates_rx.try_recv() {
                self.store_candidate(block);
            }
            match self.events_rx.recv_timeout(POLL) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.propose_timeout.reset();
        self.prevote_timeout.reset();
        self.precommit_timeout.reset();
        log::info!("consensus driver stopped ({})", self.address);
    }

    pub(crate) fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Message(message) => self.handle_message(message),
            CoreEvent::Timeout(timeout) => self.on_timeout(timeout),
            CoreEvent::Committed => self.handle_committed(),
        }
    }

    // ## Message intake

    /// Handle a signature-checked message; accepted messages are forwarded to
    /// peers, future ones are parked.
    pub(crate) fn handle_message(&mut self, message: Message) {
        match self.handle_checked_message(&message) {
            Ok(()) => {
                let snapshot = self.valset_snapshot();
                self.backend.gossip(&snapshot, message.encode());
            }
            Err(err) => self.on_rejected(message, err),
        }
    }

    fn handle_checked_message(&mut self, message: &Message) -> Result<(), ConsensusError> {
        if !self.shared.valset.read().contains(&message.sender) {
            return Err(ConsensusError::NotAValidator);
        }
        match message.code {
            MessageCode::Proposal => self.handle_proposal(message),
            MessageCode::Prevote => self.handle_prevote(message),
            MessageCode::Precommit => self.handle_precommit(message),
        }
    }

    fn on_rejected(&mut self, message: Message, err: ConsensusError) {
        match err {
            ConsensusError::FutureHeightMessage | ConsensusError::FutureStepMessage => {
                log::debug!("storing {} in backlog from {}", err, message.sender);
                self.backlog.store(message);
            }
            ConsensusError::FutureRoundMessage => {
                log::debug!("storing {} in backlog from {}", err, message.sender);
                let round = message
                    .view()
                    .map(|view| view.round)
                    .expect("classification decoded the view already");
                let sender = message.sender;
                self.backlog.store(message);
                self.note_future_round_message(round, sender);
            }
            ConsensusError::NotAValidator | ConsensusError::InvalidSenderOfCommittedSeal => {
                log::warn!("dropping message from {}: {}", message.sender, err);
            }
            other => {
                log::debug!("dropping message from {}: {}", message.sender, other);
            }
        }
    }

    /// The round-skip rule: strictly more than f distinct senders speaking at
    /// a higher round of this height pull us straight into that round.
    fn note_future_round_message(&mut self, round: Round, sender: ValidatorAddress) {
        let senders = self.future_round_senders.entry(round).or_default();
        senders.insert(sender);
        let count = senders.len();
        let f = self.shared.valset.read().f();
        if count > f {
            log::debug!(
                "{} distinct senders at future round {}; skipping ahead",
                count,
                round
            );
            self.start_round(round);
        }
    }

    /// Position `view`/`step` against the current round state. `Ok` means the
    /// message is applicable now, either to the current round or to an
    /// archived one.
    pub(crate) fn classify(&self, view: View, step: Step) -> Result<MessageTarget, ConsensusError> {
        let rounds = self.shared.rounds.read();
        let current = rounds.current.view();
        if view.height < current.height {
            return Err(ConsensusError::OldHeightMessage);
        }
        if view.height > current.height {
            return Err(ConsensusError::FutureHeightMessage);
        }
        if view.round < current.round {
            return Ok(MessageTarget::Old(view.round));
        }
        if view.round > current.round {
            return Err(ConsensusError::FutureRoundMessage);
        }
        if step > rounds.current.step() {
            return Err(ConsensusError::FutureStepMessage);
        }
        Ok(MessageTarget::Current)
    }

    // ## Round lifecycle

    /// Enter `round` of the height above the chain head. Round 0 starts a new
    /// height and resets all height-scoped state.
    pub(crate) fn start_round(&mut self, round: Round) {
        let (last_block, last_proposer) = self.backend.last_committed_block();
        let height = last_block.number().next();
        self.last_proposer = last_proposer;

        if round == Round::new(0) {
            self.locked_round = None;
            self.locked_value = None;
            self.valid_round = None;
            self.valid_value = None;
            match self.backend.validators(height) {
                Some(valset) => *self.shared.valset.write() = valset,
                None => log::error!(
                    "validator set for height {} unavailable; keeping previous set",
                    height
                ),
            }
            self.future_round_senders.clear();
            self.pending_blocks = self.pending_blocks.split_off(&height);
        }

        self.propose_timeout.reset();
        self.prevote_timeout.reset();
        self.precommit_timeout.reset();

        // Rounds at or below the one we are entering can no longer be skipped
        // to.
        self.future_round_senders = self.future_round_senders.split_off(&round.next());

        {
            let mut rounds = self.shared.rounds.write();
            if round == Round::new(0) {
                rounds.old.clear();
                rounds.current = RoundState::new(height, round);
            } else {
                let previous = mem::replace(&mut rounds.current, RoundState::new(height, round));
                rounds.old.insert(previous.round(), previous);
            }
        }
        self.shared.valset.write().calc_proposer(&last_proposer, round);

        self.sent_proposal = false;
        self.sent_prevote = false;
        self.sent_precommit = false;
        self.set_valid_round_and_value = false;

        log::debug!("starting new round: height {} round {}", height, round);
        self.set_step(Step::Propose);

        // Replaying the backlog above can itself move the view (a round skip
        // or even a commit); if it did, this round start is already history.
        if self.current_view() != View::new(height, round) {
            return;
        }

        if self.shared.valset.read().is_proposer(&self.address) {
            let (block, valid_round) = match self.valid_value.clone() {
                Some(block) => (block, self.valid_round),
                None => match self.wait_for_candidate(height) {
                    Some(block) => (block, None),
                    None => return,
                },
            };
            self.send_proposal(block, valid_round);
        } else {
            let duration = self.config.timeout(Step::Propose, round);
            self.propose_timeout
                .schedule(duration, View::new(height, round), self.events_tx.clone());
        }
    }

    /// Advance the current round's step and immediately replay every backlog
    /// message the new step makes eligible.
    pub(crate) fn set_step(&mut self, step: Step) {
        self.shared.rounds.write().current.set_step(step);
        self.process_backlog();
    }

    fn process_backlog(&mut self) {
        let (view, step) = {
            let rounds = self.shared.rounds.read();
            (rounds.current.view(), rounds.current.step())
        };
        let ready = self.backlog.drain_ready(view.height, view.round, step);
        for message in ready {
            log::debug!("replaying backlogged message from {}", message.sender);
            self.handle_message(message);
        }
    }

    /// Block until the host has supplied a candidate block for `height`.
    /// Returns `None` on shutdown.
    fn wait_for_candidate(&mut self, height: Height) -> Option<Block> {
        if !self.pending_blocks.contains_key(&height) {
            log::debug!("waiting for a candidate block for height {}", height);
        }
        loop {
            if let Some(block) = self.pending_blocks.remove(&height) {
                return Some(block);
            }
            if self.shared.shutdown.load(Ordering::Acquire) {
                return None;
            }
            match self.candidates_rx.recv_timeout(POLL) {
                Ok(block) => self.store_candidate(block),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn store_candidate(&mut self, block: Block) {
        let height = block.number();
        if height < self.shared.rounds.read().current.height() {
            return;
        }
        self.pending_blocks.insert(height, block);
    }

    // ## Timeouts

    fn on_timeout(&mut self, event: TimeoutEvent) {
        let current = self.current_view();
        if event.view != current {
            log::debug!("ignoring stale {} timeout for view {}", event.step, event.view);
            return;
        }
        let step = self.current_step();
        match event.step {
            Step::Propose if step == Step::Propose => {
                log::debug!("propose timeout at view {}; prevoting nil", current);
                self.send_prevote(None);
                self.set_step(Step::Prevote);
            }
            Step::Prevote if step == Step::Prevote => {
                log::debug!("prevote timeout at view {}; precommitting nil", current);
                self.send_precommit(None);
                self.set_step(Step::Precommit);
            }
            Step::Precommit => {
                log::debug!("precommit timeout at view {}; starting next round", current);
                self.start_round(current.round.next());
            }
            _ => {}
        }
    }

    fn handle_committed(&mut self) {
        log::debug!("chain head advanced; moving to the next height");
        self.start_round(Round::new(0));
    }

    // ## Outbound

    /// Sign the envelope and broadcast it to a snapshot of the validator set,
    /// this node included.
    pub(crate) fn finalize_and_broadcast(&mut self, mut message: Message) {
        let digest = match message.signing_digest() {
            Ok(digest) => digest,
            Err(err) => {
                log::error!("failed to build signing digest: {}", err);
                return;
            }
        };
        match self.backend.sign(&digest) {
            Ok(signature) => message.signature = signature,
            Err(err) => {
                log::error!("failed to sign outgoing message: {}", err);
                return;
            }
        }
        let snapshot = self.valset_snapshot();
        self.backend.broadcast(&snapshot, message.encode());
    }

    // ## Small helpers

    pub(crate) fn current_view(&self) -> View {
        self.shared.rounds.read().current.view()
    }

    pub(crate) fn current_step(&self) -> Step {
        self.shared.rounds.read().current.step()
    }

    pub(crate) fn quorum(&self) -> usize {
        self.shared.valset.read().quorum()
    }

    /// The proposer of `round` at the current height. Pure in the validator
    /// set, the last committed proposer, and the round.
    pub(crate) fn proposer_of(&self, round: Round) -> Option<ValidatorAddress> {
        self.shared
            .valset
            .read()
            .proposer_for(&self.last_proposer, round)
    }

    /// Copy-on-broadcast snapshot: a height change mid-broadcast cannot
    /// mutate the recipient set.
    pub(crate) fn valset_snapshot(&self) -> ValidatorSet {
        self.shared.valset.read().clone()
    }

    /// Access the state a message target points at, creating the archived
    /// round on demand (a round skip can jump over rounds nobody entered).
    pub(crate) fn with_target_state<T>(
        &self,
        target: MessageTarget,
        f: impl FnOnce(&mut RoundState) -> T,
    ) -> T {
        let mut rounds = self.shared.rounds.write();
        match target {
            MessageTarget::Current => f(&mut rounds.current),
            MessageTarget::Old(round) => {
                let height = rounds.current.height();
                f(rounds
                    .old
                    .entry(round)
                    .or_insert_with(|| RoundState::new(height, round)))
            }
        }
    }
}

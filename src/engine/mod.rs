/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus engine: the public [`Core`] handle and the threads behind it.
//!
//! [`Core::start`] spawns the subsystems:
//! 1. the **driver** thread, which owns every mutation of consensus state and
//!    services the event channel ([`driver`]);
//! 2. the **verification pool**, which decodes inbound payloads and checks
//!    their signatures before they reach the driver;
//! 3. the **sync loop** thread, which asks peers for state when the view
//!    stalls and answers their sync requests.
//!
//! The host feeds the engine through the `post_*` methods and reads from it
//! through [`is_validator`](Core::is_validator) and
//! [`current_height_messages`](Core::current_height_messages).

pub(crate) mod driver;
mod precommit;
mod proposal;
mod prevote;

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use threadpool::ThreadPool;

use crate::backend::Backend;
use crate::backlog::Backlog;
use crate::config::Config;
use crate::errors::ConsensusError;
use crate::events::CoreEvent;
use crate::messages::Message;
use crate::round_state::RoundState;
use crate::types::basic::{Height, Round, ValidatorAddress};
use crate::types::block::Block;
use crate::validators::ValidatorSet;

use self::driver::Driver;

/// Round states for the live height: the current round plus the read-only
/// archive of the height's earlier rounds.
pub(crate) struct HeightRounds {
    pub(crate) current: RoundState,
    pub(crate) old: BTreeMap<Round, RoundState>,
}

impl HeightRounds {
    pub(crate) fn new(height: Height) -> HeightRounds {
        HeightRounds {
            current: RoundState::new(height, Round::new(0)),
            old: BTreeMap::new(),
        }
    }

    /// Every message accepted this height, oldest round first.
    pub(crate) fn current_height_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        for state in self.old.values() {
            messages.extend(state.messages());
        }
        messages.extend(self.current.messages());
        messages
    }
}

/// State shared between the driver and the read-only paths (the verification
/// workers, the sync loop, and the host-facing queries). The driver is the
/// only writer.
pub(crate) struct Shared {
    pub(crate) rounds: RwLock<HeightRounds>,
    pub(crate) valset: RwLock<ValidatorSet>,
    pub(crate) shutdown: AtomicBool,
}

impl Shared {
    fn new(height: Height) -> Shared {
        Shared {
            rounds: RwLock::new(HeightRounds::new(height)),
            valset: RwLock::new(ValidatorSet::new(Vec::new())),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// Start/stop protection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EngineStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// Channels and thread handles that exist only while the engine runs.
struct Runtime {
    events: Sender<CoreEvent>,
    candidates: Sender<Block>,
    sync_requests: Sender<ValidatorAddress>,
    pool: ThreadPool,
    driver: Option<JoinHandle<()>>,
    sync_loop: Option<JoinHandle<()>>,
}

/// The consensus core. One instance lives per node, across heights.
pub struct Core<B: Backend> {
    backend: Arc<B>,
    config: Config,
    address: ValidatorAddress,
    shared: Arc<Shared>,
    backlog: Arc<Backlog>,
    status: Mutex<EngineStatus>,
    runtime: Mutex<Option<Runtime>>,
}

impl<B: Backend> Core<B> {
    pub fn new(backend: Arc<B>, config: Config) -> Core<B> {
        let address = backend.address();
        Core {
            backend,
            config,
            address,
            shared: Arc::new(Shared::new(Height::new(1))),
            backlog: Arc::new(Backlog::new()),
            status: Mutex::new(EngineStatus::Stopped),
            runtime: Mutex::new(None),
        }
    }

    /// Start consensus from the height above the current chain head.
    /// Idempotent: starting a started engine does nothing.
    pub fn start(&self) -> Result<(), ConsensusError> {
        {
            let mut status = self.status.lock();
            match *status {
                EngineStatus::Stopped => *status = EngineStatus::Starting,
                EngineStatus::Starting | EngineStatus::Started => return Ok(()),
                EngineStatus::Stopping => return Err(ConsensusError::Stopped),
            }
        }

        self.shared.shutdown.store(false, Ordering::Release);

        // Seed the shared view before any thread can observe it.
        let (last_block, _) = self.backend.last_committed_block();
        let height = last_block.number().next();
        *self.shared.rounds.write() = HeightRounds::new(height);
        if let Some(valset) = self.backend.validators(height) {
            *self.shared.valset.write() = valset;
        }

        let (events_tx, events_rx) = mpsc::channel();
        let (candidates_tx, candidates_rx) = mpsc::channel();
        let (sync_tx, sync_rx) = mpsc::channel();

        let driver = Driver::new(
            self.config.clone(),
            self.address,
            self.backend.clone(),
            self.shared.clone(),
            self.backlog.clone(),
            events_tx.clone(),
            events_rx,
            candidates_rx,
        );
        let driver_handle = thread::Builder::new()
            .name("consensus-driver".into())
            .spawn(move || driver.run())
            .map_err(|err| ConsensusError::Backend(err.to_string()))?;

        let sync_backend = self.backend.clone();
        let sync_shared = self.shared.clone();
        let sync_handle = thread::Builder::new()
            .name("consensus-sync".into())
            .spawn(move || run_sync_loop(sync_backend, sync_shared, sync_rx))
            .map_err(|err| ConsensusError::Backend(err.to_string()))?;

        let pool = ThreadPool::with_name("consensus-verify".into(), self.config.verify_workers);

        *self.runtime.lock() = Some(Runtime {
            events: events_tx,
            candidates: candidates_tx,
            sync_requests: sync_tx,
            pool,
            driver: Some(driver_handle),
            sync_loop: Some(sync_handle),
        });
        *self.status.lock() = EngineStatus::Started;
        log::info!("consensus core started at height {} ({})", height, self.address);
        Ok(())
    }

    /// Stop consensus, cancel all timers, and join the engine threads.
    /// Idempotent: stopping a stopped engine does nothing.
    pub fn stop(&self) -> Result<(), ConsensusError> {
        {
            let mut status = self.status.lock();
            match *status {
                EngineStatus::Started => *status = EngineStatus::Stopping,
                EngineStatus::Stopped | EngineStatus::Stopping => return Ok(()),
                EngineStatus::Starting => return Err(ConsensusError::Stopped),
            }
        }

        log::info!("stopping consensus core ({})", self.address);
        self.shared.shutdown.store(true, Ordering::Release);

        // Take the runtime out before joining: the driver may still be
        // posting through methods that take the runtime lock.
        let runtime = self.runtime.lock().take();
        if let Some(mut runtime) = runtime {
            // Wait for in-flight verifications, then the driver and sync loop.
            // Dropping the runtime disconnects the channels afterwards.
            runtime.pool.join();
            if let Some(handle) = runtime.driver.take() {
                let _ = handle.join();
            }
            if let Some(handle) = runtime.sync_loop.take() {
                let _ = handle.join();
            }
        }

        *self.status.lock() = EngineStatus::Stopped;
        Ok(())
    }

    /// Whether `address` is a member of the current height's validator set.
    pub fn is_validator(&self, address: &ValidatorAddress) -> bool {
        self.shared.valset.read().contains(address)
    }

    /// Snapshot of every message accepted at the current height. Serves sync
    /// queries; safe to call from any thread.
    pub fn current_height_messages(&self) -> Vec<Message> {
        self.shared.rounds.read().current_height_messages()
    }

    /// Submit raw message bytes received from the network. The payload is
    /// decoded and signature-checked on the verification pool before it
    /// reaches the driver; malformed payloads are dropped there.
    pub fn post_message(&self, payload: Vec<u8>) {
        let runtime = self.runtime.lock();
        let Some(runtime) = runtime.as_ref() else {
            log::debug!("dropping message posted while stopped");
            return;
        };
        let backend = self.backend.clone();
        let shared = self.shared.clone();
        let backlog = self.backlog.clone();
        let events = runtime.events.clone();
        runtime.pool.execute(move || {
            verify_message(&*backend, &shared, &backlog, &events, payload);
        });
    }

    /// Supply a candidate block for the proposer side of a future or current
    /// height.
    pub fn post_candidate_block(&self, block: Block) {
        if let Some(runtime) = self.runtime.lock().as_ref() {
            let _ = runtime.candidates.send(block);
        }
    }

    /// Notify the core that the host finished writing a committed block; the
    /// core moves to the next height.
    pub fn post_committed(&self) {
        if let Some(runtime) = self.runtime.lock().as_ref() {
            let _ = runtime.events.send(CoreEvent::Committed);
        }
    }

    /// Notify the core that `peer` asked for the current consensus state.
    pub fn post_sync_request(&self, peer: ValidatorAddress) {
        if let Some(runtime) = self.runtime.lock().as_ref() {
            let _ = runtime.sync_requests.send(peer);
        }
    }
}

impl<B: Backend> Drop for Core<B> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// First stage of message intake, run on the verification pool: decode the
/// envelope, recover and check the sender, and triage by height. Messages for
/// the current height go to the driver; future-height messages park in the
/// backlog; everything else is dropped here.
fn verify_message<B: Backend>(
    backend: &B,
    shared: &Shared,
    backlog: &Backlog,
    events: &Sender<CoreEvent>,
    payload: Vec<u8>,
) {
    let message = match Message::decode(&payload) {
        Ok(message) => message,
        Err(err) => {
            log::debug!("failed to decode message payload: {}", err);
            return;
        }
    };
    let digest = match message.signing_digest() {
        Ok(digest) => digest,
        Err(err) => {
            log::debug!("failed to compute signing digest: {}", err);
            return;
        }
    };
    let sender = match backend.recover_sender(&digest, &message.signature) {
        Ok(sender) => sender,
        Err(err) => {
            log::debug!("failed to recover message sender: {}", err);
            return;
        }
    };
    if sender != message.sender {
        log::debug!(
            "recovered sender {} does not match envelope sender {}",
            sender,
            message.sender
        );
        return;
    }
    let view = match message.view() {
        Ok(view) => view,
        Err(err) => {
            log::debug!("failed to decode message view: {}", err);
            return;
        }
    };

    let current_height = shared.rounds.read().current.height();
    if view.height < current_height {
        log::debug!("dropping old height message from {}", sender);
        return;
    }
    if view.height > current_height {
        // The validator set for that height is not known yet; membership is
        // re-checked when the backlog replays the message.
        log::debug!("parking future height message from {}", sender);
        backlog.store(message);
        return;
    }
    if !shared.valset.read().contains(&sender) {
        log::warn!("dropping message from non-validator {}", sender);
        return;
    }
    let _ = events.send(CoreEvent::Message(message));
}

/// The sync loop: answers sync requests with the current-height snapshot, and
/// asks peers for state on start and whenever the view has not moved for a
/// while.
fn run_sync_loop<B: Backend>(
    backend: Arc<B>,
    shared: Arc<Shared>,
    requests: Receiver<ValidatorAddress>,
) {
    const ASK_INTERVAL: Duration = Duration::from_secs(10);
    const POLL: Duration = Duration::from_millis(250);

    let snapshot = shared.valset.read().clone();
    backend.ask_sync(&snapshot);

    let mut last_view = shared.rounds.read().current.view();
    let mut last_ask = Instant::now();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        match requests.recv_timeout(POLL) {
            Ok(peer) => {
                log::info!("processing sync request from {}", peer);
                let payloads = shared
                    .rounds
                    .read()
                    .current_height_messages()
                    .iter()
                    .map(Message::encode)
                    .collect();
                backend.sync_peer(&peer, payloads);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        if last_ask.elapsed() >= ASK_INTERVAL {
            let view = shared.rounds.read().current.view();
            // Only nag peers if we are visibly stuck.
            if view == last_view {
                let snapshot = shared.valset.read().clone();
                backend.ask_sync(&snapshot);
            }
            last_view = view;
            last_ask = Instant::now();
        }
    }
}

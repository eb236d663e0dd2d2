/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A deterministic Tendermint consensus core for proof-of-authority chains.
//!
//! Given a fixed, ordered validator set and a stream of signed messages, the
//! core drives agreement on a single block per height, tolerating up to f
//! Byzantine validators out of n ≥ 3f + 1. Everything stateful lives in one
//! single-threaded driver; the host supplies the outside world (signing,
//! validator lookup, block production, block execution, and the gossip
//! transport) through the [`Backend`](backend::Backend) trait.
//!
//! ## Quickstart
//!
//! 1. Implement [`Backend`](backend::Backend).
//! 2. Create a [`Core`](engine::Core) with a [`Config`](config::Config).
//! 3. Call [`start`](engine::Core::start), then feed it with
//!    `post_message`, `post_candidate_block`, `post_committed`, and
//!    `post_sync_request` as the host side observes the world.
//!
//! Logging goes through the [`log`](https://docs.rs/log) facade; install any
//! logger implementation to see it.

pub mod backend;
pub(crate) mod backlog;
pub mod config;
pub mod errors;
pub mod events;
pub mod messages;
pub(crate) mod round_state;
pub(crate) mod timeout;
pub mod types;
pub mod validators;
pub mod vote_set;

pub mod engine;

// Re-exports of the types a host touches directly.
pub use backend::Backend;
pub use config::Config;
pub use engine::Core;
pub use errors::ConsensusError;
pub use messages::{Message, MessageCode, Proposal, Vote};
pub use types::basic::{
    BlockHash, CommittedSeal, Height, Round, SignatureBytes, Step, ValidatorAddress, View,
};
pub use types::block::{Block, BlockHeader};
pub use validators::ValidatorSet;

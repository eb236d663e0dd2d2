/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors produced while classifying and handling consensus messages.
//!
//! None of these are fatal to the driver: malformed and stale messages are
//! dropped, future messages are parked in the [backlog](crate::backlog), and
//! host failures are logged and retried through the normal round machinery.

use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ConsensusError {
    /// The message is malformed: the envelope did not decode, a field is out
    /// of range, or the recovered sender does not match the envelope.
    #[error("invalid message")]
    InvalidMessage,

    /// The PROPOSAL payload is malformed.
    #[error("failed to decode PROPOSAL")]
    FailedDecodeProposal,

    /// The PREVOTE payload is malformed.
    #[error("failed to decode PREVOTE")]
    FailedDecodePrevote,

    /// The PRECOMMIT payload is malformed.
    #[error("failed to decode PRECOMMIT")]
    FailedDecodePrecommit,

    /// The committed seal inside a precommit was not signed by the sender of
    /// the message.
    #[error("invalid sender of committed seal")]
    InvalidSenderOfCommittedSeal,

    /// A proposal was received from a validator that is not the proposer of
    /// its round.
    #[error("message does not come from proposer")]
    NotFromProposer,

    /// The message sender is not a validator for the message's height.
    #[error("message sender is not a validator")]
    NotAValidator,

    /// The message's height is below the current height.
    #[error("old height message")]
    OldHeightMessage,

    /// The message's height is above the current height.
    #[error("future height message")]
    FutureHeightMessage,

    /// Same height, but the message's round is above the current round.
    #[error("same height but future round message")]
    FutureRoundMessage,

    /// Same view, but the message belongs to a step the round has not reached
    /// yet.
    #[error("same round but future step message")]
    FutureStepMessage,

    /// The host rejected an operation (signing, committing). Transient from
    /// the core's point of view.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The engine is not running.
    #[error("engine is stopped")]
    Stopped,
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The closed sum of events the driver services.
//!
//! Every mutation of consensus state happens in the driver thread, which
//! receives these events on a single channel. Candidate blocks travel on
//! their own channel (the proposer suspends on it inside round start) and
//! sync requests go to the sync loop; everything else is a [`CoreEvent`].

use crate::messages::Message;
use crate::types::basic::{Step, View};

/// An event consumed by the driver.
#[derive(Clone, Debug)]
pub(crate) enum CoreEvent {
    /// A decoded, signature-checked consensus message.
    Message(Message),
    /// A round timer fired.
    Timeout(TimeoutEvent),
    /// The host finished writing a committed block to the chain.
    Committed,
}

/// Emitted when one of the three round timers fires. Carries the view the
/// timer was armed for so the handler can discard stale firings.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeoutEvent {
    pub step: Step,
    pub view: View,
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parking lot for messages that arrived too early.
//!
//! Future-height, future-round, and future-step messages are stored here,
//! keyed per sending validator and ordered by (height, round, step). On every
//! step transition the driver drains every entry whose position is at or
//! before the new (height, round, step) and re-feeds it through
//! classification; entries whose height has already passed are discarded
//! during the drain.
//!
//! The structure carries its own mutex: the signature-verification workers
//! park future-height messages here directly, without a round-trip through
//! the driver.

use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::messages::Message;
use crate::types::basic::{Height, Round, Step, ValidatorAddress, View};

struct BacklogEntry {
    view: View,
    step: Step,
    message: Message,
}

impl BacklogEntry {
    fn key(&self) -> (Height, Round, u8) {
        (self.view.height, self.view.round, self.step.ordinal())
    }
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BacklogEntry {}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
pub(crate) struct Backlog {
    // Reverse turns the max-heap into the min-heap the drain wants.
    queues: Mutex<HashMap<ValidatorAddress, BinaryHeap<Reverse<BacklogEntry>>>>,
}

impl Backlog {
    pub(crate) fn new() -> Backlog {
        Backlog::default()
    }

    /// Park `message` until its view becomes current. The message must carry a
    /// decodable payload; undecodable ones are dropped here.
    pub(crate) fn store(&self, message: Message) {
        let view = match message.view() {
            Ok(view) => view,
            Err(_) => return,
        };
        let entry = BacklogEntry {
            view,
            step: message.code.step(),
            message,
        };
        let mut queues = self.queues.lock();
        queues
            .entry(entry.message.sender)
            .or_default()
            .push(Reverse(entry));
    }

    /// Pop every entry at or before (`height`, `round`, `step`), in priority
    /// order per validator. Entries for heights below `height` are dropped
    /// rather than returned; everything later stays parked.
    pub(crate) fn drain_ready(&self, height: Height, round: Round, step: Step) -> Vec<Message> {
        let mut ready = Vec::new();
        let mut queues = self.queues.lock();
        for queue in queues.values_mut() {
            while let Some(Reverse(entry)) = queue.peek() {
                if entry.view.height < height {
                    queue.pop();
                    continue;
                }
                let eligible = entry.view.height == height
                    && (entry.view.round < round
                        || (entry.view.round == round && entry.step <= step));
                if !eligible {
                    break;
                }
                let Reverse(entry) = queue.pop().expect("peeked entry is present");
                ready.push(entry.message);
            }
        }
        queues.retain(|_, queue| !queue.is_empty());
        ready
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queues.lock().values().map(BinaryHeap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Vote;

    fn address(byte: u8) -> ValidatorAddress {
        ValidatorAddress::new([byte; 20])
    }

    fn prevote_at(sender: u8, height: u64, round: u64) -> Message {
        let vote = Vote {
            height: Height::new(height),
            round: Round::new(round),
            block_hash: None,
        };
        Message::prevote(&vote, address(sender))
    }

    fn precommit_at(sender: u8, height: u64, round: u64) -> Message {
        let vote = Vote {
            height: Height::new(height),
            round: Round::new(round),
            block_hash: None,
        };
        Message::precommit(&vote, address(sender), None)
    }

    #[test]
    fn drains_in_view_then_step_order() {
        let backlog = Backlog::new();
        backlog.store(precommit_at(1, 1, 1));
        backlog.store(prevote_at(1, 1, 1));
        backlog.store(prevote_at(1, 1, 0));

        let drained = backlog.drain_ready(Height::new(1), Round::new(1), Step::Precommit);
        let views: Vec<_> = drained
            .iter()
            .map(|m| (m.view().unwrap().round.int(), m.code.step().ordinal()))
            .collect();
        assert_eq!(views, vec![(0, 1), (1, 1), (1, 2)]);
    }

    #[test]
    fn future_entries_stay_parked() {
        let backlog = Backlog::new();
        backlog.store(prevote_at(1, 1, 2));
        backlog.store(prevote_at(2, 2, 0));
        backlog.store(precommit_at(3, 1, 0));

        // Step prevote at (1, 0): the precommit for (1, 0) is still future.
        let drained = backlog.drain_ready(Height::new(1), Round::new(0), Step::Prevote);
        assert!(drained.is_empty());
        assert_eq!(backlog.len(), 3);

        // Step precommit releases it; the rest remain parked.
        let drained = backlog.drain_ready(Height::new(1), Round::new(0), Step::Precommit);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].sender, address(3));
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn past_height_entries_are_discarded() {
        let backlog = Backlog::new();
        backlog.store(prevote_at(1, 1, 0));
        backlog.store(prevote_at(1, 3, 0));

        let drained = backlog.drain_ready(Height::new(2), Round::new(0), Step::Propose);
        assert!(drained.is_empty());
        // The height-1 entry is gone; the height-3 entry survives.
        assert_eq!(backlog.len(), 1);
        let drained = backlog.drain_ready(Height::new(3), Round::new(0), Step::Prevote);
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn nothing_eligible_is_retained_after_drain() {
        let backlog = Backlog::new();
        for sender in 0..4 {
            backlog.store(prevote_at(sender, 1, 1));
            backlog.store(precommit_at(sender, 1, 1));
        }
        let drained = backlog.drain_ready(Height::new(1), Round::new(1), Step::PrecommitDone);
        assert_eq!(drained.len(), 8);
        assert_eq!(backlog.len(), 0);
    }
}

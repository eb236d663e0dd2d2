/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The three cancellable round timers.
//!
//! Each timer is one-shot: arming it spawns a sleeper thread that posts a
//! [`TimeoutEvent`] into the driver channel unless the timer was cancelled
//! first. A timer remembers the view it was armed for; the driver discards
//! firings whose view is no longer current, so a cancellation that loses the
//! race with the sleeper is harmless.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::events::{CoreEvent, TimeoutEvent};
use crate::types::basic::{Step, View};

// Sleepers wake at this granularity to observe cancellation.
const TICK: Duration = Duration::from_millis(25);

pub(crate) struct Timeout {
    step: Step,
    pending: Mutex<Option<Pending>>,
}

struct Pending {
    cancelled: Arc<AtomicBool>,
}

impl Timeout {
    pub(crate) fn new(step: Step) -> Timeout {
        Timeout {
            step,
            pending: Mutex::new(None),
        }
    }

    /// Arm the timer for `view`. An already-armed timer is cancelled and
    /// replaced.
    pub(crate) fn schedule(&self, duration: Duration, view: View, events: Sender<CoreEvent>) {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.cancelled.store(true, Ordering::Release);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let step = self.step;
        thread::spawn(move || {
            let deadline = Instant::now() + duration;
            loop {
                if flag.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(TICK.min(deadline - now));
            }
            if !flag.load(Ordering::Acquire) {
                log::debug!("{} timeout expired for view {}", step, view);
                let _ = events.send(CoreEvent::Timeout(TimeoutEvent { step, view }));
            }
        });

        *pending = Some(Pending { cancelled });
    }

    /// Whether the timer is currently armed. Used by the "arm once per round"
    /// rules; [`reset`](Self::reset) on round change clears it.
    pub(crate) fn is_scheduled(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Cancel the timer if armed. Returns whether there was one to cancel.
    pub(crate) fn stop(&self) -> bool {
        match self.pending.lock().take() {
            Some(pending) => {
                pending.cancelled.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Cancel and forget any pending firing. Called on every round change.
    pub(crate) fn reset(&self) {
        self.stop();
    }
}

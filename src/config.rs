/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Engine configuration.

use std::time::Duration;

use crate::types::basic::{Round, Step};

/// Tuning knobs for the consensus engine. [`Config::default`] gives the
/// standard parameters; hosts normally only touch these for tests or unusual
/// network conditions.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base wait for a proposal before prevoting NIL.
    pub timeout_propose: Duration,
    /// Added to `timeout_propose` once per round.
    pub timeout_propose_delta: Duration,
    /// Base wait after a mixed prevote quorum before precommitting NIL.
    pub timeout_prevote: Duration,
    /// Added to `timeout_prevote` once per round.
    pub timeout_prevote_delta: Duration,
    /// Base wait after a mixed precommit quorum before starting the next
    /// round.
    pub timeout_precommit: Duration,
    /// Added to `timeout_precommit` once per round.
    pub timeout_precommit_delta: Duration,
    /// Size of the signature-verification worker pool.
    pub verify_workers: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            timeout_propose: Duration::from_millis(3000),
            timeout_propose_delta: Duration::from_millis(500),
            timeout_prevote: Duration::from_millis(1000),
            timeout_prevote_delta: Duration::from_millis(500),
            timeout_precommit: Duration::from_millis(1000),
            timeout_precommit_delta: Duration::from_millis(500),
            verify_workers: 4,
        }
    }
}

impl Config {
    /// Timer duration for `step` in `round`: linear in the round number, so
    /// slow validators get progressively more time as rounds fail.
    pub(crate) fn timeout(&self, step: Step, round: Round) -> Duration {
        let (base, delta) = match step {
            Step::Propose => (self.timeout_propose, self.timeout_propose_delta),
            Step::Prevote => (self.timeout_prevote, self.timeout_prevote_delta),
            Step::Precommit | Step::PrecommitDone => {
                (self.timeout_precommit, self.timeout_precommit_delta)
            }
        };
        base + delta * round.int() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_linearly_with_round() {
        let config = Config::default();
        assert_eq!(
            config.timeout(Step::Propose, Round::new(0)),
            Duration::from_millis(3000)
        );
        assert_eq!(
            config.timeout(Step::Propose, Round::new(2)),
            Duration::from_millis(4000)
        );
        assert_eq!(
            config.timeout(Step::Prevote, Round::new(1)),
            Duration::from_millis(1500)
        );
        assert_eq!(
            config.timeout(Step::Precommit, Round::new(3)),
            Duration::from_millis(2500)
        );
    }
}

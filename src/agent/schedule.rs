//! Single-tick scheduling of captures and flushes
//!
//! Instead of two independently sleeping loops, the agent ticks every
//! `gcd(poll, report)` seconds and decides on each tick whether to capture,
//! flush or both. The elapsed counter resets whenever both fire together.

use std::time::Duration;

use crate::util::gcd;

/// What to do on a tick; capture always runs before flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickActions {
    pub capture: bool,
    pub flush: bool,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    poll: u64,
    report: u64,
    tick: u64,
    elapsed: u64,
}

impl Schedule {
    /// Intervals are in seconds; 0 is treated as 1
    pub fn new(poll_secs: u64, report_secs: u64) -> Self {
        let poll = poll_secs.max(1);
        let report = report_secs.max(1);

        Self {
            poll,
            report,
            tick: gcd(poll, report),
            elapsed: 0,
        }
    }

    /// Period of the driving tick
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick)
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Move forward by one tick
    pub fn advance(&mut self) -> TickActions {
        self.elapsed += self.tick;

        let actions = TickActions {
            capture: self.elapsed % self.poll == 0,
            flush: self.elapsed % self.report == 0,
        };

        if actions.capture && actions.flush {
            self.elapsed = 0;
        }

        actions
    }
}

//! Countdown between segments.

use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestEvent {
    Tick { remaining_s: u32 },
    /// Emitted at most once per period, on expiry or skip.
    Complete { period: u64 },
}

#[derive(Debug)]
struct Countdown {
    period: u64,
    remaining_s: u32,
    next_tick: Instant,
}

/// `Idle -> Counting -> Idle`, driven by [`RestScheduler::poll`].
#[derive(Debug)]
pub struct RestScheduler {
    tick: Duration,
    period: u64,
    countdown: Option<Countdown>,
}

impl RestScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            period: 0,
            countdown: None,
        }
    }

    pub fn set_tick(&mut self, tick: Duration) {
        self.tick = tick;
    }

    /// Starts a new period, cancelling any running one.
    ///
    /// A zero-length rest completes immediately without counting.
    pub fn start(&mut self, seconds: u32, now: Instant) -> Vec<RestEvent> {
        self.cancel();
        self.period += 1;
        if seconds == 0 {
            return vec![RestEvent::Complete {
                period: self.period,
            }];
        }
        debug!(
            "RestScheduler: period {} counting {}s",
            self.period, seconds
        );
        self.countdown = Some(Countdown {
            period: self.period,
            remaining_s: seconds,
            next_tick: now + self.tick,
        });
        vec![RestEvent::Tick {
            remaining_s: seconds,
        }]
    }

    /// Emits every tick due at `now`, catching up if polls were late.
    pub fn poll(&mut self, now: Instant) -> Vec<RestEvent> {
        let mut events = Vec::new();
        while let Some(countdown) = self.countdown.as_mut() {
            if now < countdown.next_tick {
                break;
            }
            countdown.remaining_s = countdown.remaining_s.saturating_sub(1);
            countdown.next_tick += self.tick;
            if countdown.remaining_s == 0 {
                let period = countdown.period;
                self.countdown = None;
                events.push(RestEvent::Complete { period });
                break;
            }
            events.push(RestEvent::Tick {
                remaining_s: countdown.remaining_s,
            });
        }
        events
    }

    /// Ends the running period early. No-op while idle.
    pub fn skip(&mut self) -> Option<RestEvent> {
        let countdown = self.countdown.take()?;
        debug!(
            "RestScheduler: period {} skipped with {}s left",
            countdown.period, countdown.remaining_s
        );
        Some(RestEvent::Complete {
            period: countdown.period,
        })
    }

    pub fn cancel(&mut self) {
        self.countdown = None;
    }

    pub fn is_counting(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn remaining(&self) -> Option<u32> {
        self.countdown.as_ref().map(|countdown| countdown.remaining_s)
    }
}

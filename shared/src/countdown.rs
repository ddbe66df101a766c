use serde::{Deserialize, Serialize};
use std::fmt;

/// A value shown during the pre-round countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownTick {
    Count(u8),
    Go,
}

impl fmt::Display for CountdownTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountdownTick::Count(n) => write!(f, "{n}"),
            CountdownTick::Go => f.write_str("GO!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Tick(CountdownTick),
    /// The round goes live.
    Start,
}

/// Step sequence `from, .., 1, GO!, Start`, owned by whoever drives the
/// room's countdown. One step is taken per countdown interval.
#[derive(Debug, Clone)]
pub struct Countdown {
    next: Option<CountdownStep>,
}

impl Countdown {
    pub fn new(from: u8) -> Self {
        let first = if from == 0 {
            CountdownTick::Go
        } else {
            CountdownTick::Count(from)
        };
        Self {
            next: Some(CountdownStep::Tick(first)),
        }
    }
}

impl Iterator for Countdown {
    type Item = CountdownStep;

    fn next(&mut self) -> Option<CountdownStep> {
        let current = self.next.take()?;
        self.next = match current {
            CountdownStep::Tick(CountdownTick::Count(n)) if n > 1 => {
                Some(CountdownStep::Tick(CountdownTick::Count(n - 1)))
            }
            CountdownStep::Tick(CountdownTick::Count(_)) => {
                Some(CountdownStep::Tick(CountdownTick::Go))
            }
            CountdownStep::Tick(CountdownTick::Go) => Some(CountdownStep::Start),
            CountdownStep::Start => None,
        };
        Some(current)
    }
}

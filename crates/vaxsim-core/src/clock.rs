//! Day counter and phase machine for one simulation run.
//!
//! ```text
//! INIT --start--> WARMUP (days 1..=W) --> ACTIVE (days W+1..=W+R) --> FINALIZED
//! ```
//!
//! The day starts at 1 and only moves forward. The initial poll runs on
//! day 1 before the first warmup day; with `W = 0` the run goes straight
//! to ACTIVE. The phase of a running day is derived from the day number,
//! never stored independently.

use core::fmt;

/// Errors from clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Day counter would overflow.
    #[error("day counter overflow")]
    DayOverflow,

    /// Invalid day counts.
    #[error("invalid day configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// A phase change that the machine does not allow.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// Phase the clock was in.
        from: Phase,
        /// Phase that was requested.
        to: Phase,
    },
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Agents built, nothing polled yet.
    Init,
    /// Days before the policy takes effect.
    Warmup,
    /// Days with the policy in effect.
    Active,
    /// Summary written; the run must be reset before reuse.
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Warmup => "warmup",
            Self::Active => "active",
            Self::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

/// Day counter for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayClock {
    day: u32,
    warmup_days: u32,
    run_days: u32,
    last_day: u32,
    phase: Phase,
}

impl DayClock {
    /// Create a clock at day 1 in [`Phase::Init`].
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `run_days` is zero, or
    /// [`ClockError::DayOverflow`] if the total does not fit in a `u32`.
    pub fn new(warmup_days: u32, run_days: u32) -> Result<Self, ClockError> {
        if run_days == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "run_days must be at least 1".to_owned(),
            });
        }
        let last_day = warmup_days
            .checked_add(run_days)
            .ok_or(ClockError::DayOverflow)?;
        Ok(Self {
            day: 1,
            warmup_days,
            run_days,
            last_day,
            phase: Phase::Init,
        })
    }

    /// Current day (1-based).
    pub const fn day(&self) -> u32 {
        self.day
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Configured warmup days.
    pub const fn warmup_days(&self) -> u32 {
        self.warmup_days
    }

    /// Configured active days.
    pub const fn run_days(&self) -> u32 {
        self.run_days
    }

    /// Last simulated day, `W + R`.
    pub const fn total_days(&self) -> u32 {
        self.last_day
    }

    /// Whether every day has been simulated.
    pub const fn is_done(&self) -> bool {
        self.day > self.last_day
    }

    /// Whether today is the first warmup day (peer posts are skipped).
    pub fn is_first_warmup_day(&self) -> bool {
        self.phase == Phase::Warmup && self.day == 1
    }

    /// Phase a running day belongs to.
    const fn phase_of(&self, day: u32) -> Phase {
        if day <= self.warmup_days {
            Phase::Warmup
        } else {
            Phase::Active
        }
    }

    /// Leave [`Phase::Init`] after the initial poll.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTransition`] unless the clock is in INIT.
    pub fn start(&mut self) -> Result<Phase, ClockError> {
        let next = self.phase_of(self.day);
        if self.phase != Phase::Init {
            return Err(ClockError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(next)
    }

    /// Close the current day and advance to the next one.
    ///
    /// Returns the phase of the new day, or [`Phase::Finalized`] once the
    /// last day has been closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTransition`] outside WARMUP and ACTIVE,
    /// or [`ClockError::DayOverflow`] if the counter cannot advance.
    pub fn complete_day(&mut self) -> Result<Phase, ClockError> {
        if !matches!(self.phase, Phase::Warmup | Phase::Active) {
            return Err(ClockError::InvalidTransition {
                from: self.phase,
                to: Phase::Active,
            });
        }
        self.day = self.day.checked_add(1).ok_or(ClockError::DayOverflow)?;
        self.phase = if self.is_done() {
            Phase::Finalized
        } else {
            self.phase_of(self.day)
        };
        Ok(self.phase)
    }
}

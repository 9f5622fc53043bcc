//! Retry policy shared by the convergence monitor, the health verifier and
//! the orchestrator query layer

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::schedule::{wait, AbortSignal, Scheduler, Wait};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Delay between two rounds
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential(CooldownOptions),
}

impl Backoff {
    /// Delay before round `retry + 2`
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential(options) => calc_exp_backoff(options, retry),
        }
    }
}

/// Bounded repetition: by attempt count, by elapsed wall-clock time, or both
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// At most `max_attempts` rounds, `delay` apart
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_elapsed: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Rounds every `interval` until `timeout` has elapsed
    pub fn deadline(timeout: Duration, interval: Duration) -> Self {
        Self {
            max_attempts: None,
            max_elapsed: Some(timeout),
            backoff: Backoff::Fixed(interval),
        }
    }

    /// At most `max_attempts` rounds with exponential delays
    pub fn exponential(max_attempts: u32, options: CooldownOptions) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_elapsed: None,
            backoff: Backoff::Exponential(options),
        }
    }

    /// The same policy with its time budget capped at `budget`
    pub fn within(&self, budget: Duration) -> Self {
        let mut policy = self.clone();
        policy.max_elapsed = Some(policy.max_elapsed.map_or(budget, |max| max.min(budget)));
        policy
    }

    /// Start counting rounds
    pub fn rounds<'a>(&self, scheduler: &'a dyn Scheduler, abort: &'a AbortSignal) -> Rounds<'a> {
        Rounds {
            policy: self.clone(),
            scheduler,
            abort,
            started: scheduler.now(),
            round: 0,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the policy runs out.
    ///
    /// `op` receives the 1-based attempt number. Only errors reporting
    /// themselves as transient are retried.
    pub async fn run<T, E, F, Fut>(&self, scheduler: &dyn Scheduler, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let abort = AbortSignal::never();
        let mut rounds = self.rounds(scheduler, &abort);
        // the first call always runs, even with a zero ceiling
        let _ = rounds.next().await;
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => match rounds.next().await {
                    Tick::Round(next) => {
                        warn!("Attempt {} failed with a transient error, retrying: {}", attempt, e);
                        attempt = next;
                    }
                    Tick::Exhausted | Tick::Aborted => return Err(e),
                },
            }
        }
    }
}

/// Errors that may succeed when retried
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// What the round ticker decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Go ahead with this 1-based round
    Round(u32),

    /// Attempt ceiling or time budget reached
    Exhausted,

    /// Operator abort
    Aborted,
}

/// Round counter driven by a [`RetryPolicy`].
///
/// The first round fires immediately. Later rounds wait for the backoff
/// delay, shortened so the last round lands exactly on the time budget.
pub struct Rounds<'a> {
    policy: RetryPolicy,
    scheduler: &'a dyn Scheduler,
    abort: &'a AbortSignal,
    started: Instant,
    round: u32,
}

impl<'a> Rounds<'a> {
    /// Rounds started so far
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Time since the ticker was created
    pub fn elapsed(&self) -> Duration {
        self.scheduler.now().saturating_duration_since(self.started)
    }

    pub async fn next(&mut self) -> Tick {
        if self.abort.is_aborted() {
            return Tick::Aborted;
        }

        if let Some(max) = self.policy.max_attempts {
            if self.round >= max {
                return Tick::Exhausted;
            }
        }

        if self.round > 0 {
            let mut delay = self.policy.backoff.delay(self.round - 1);
            if let Some(budget) = self.policy.max_elapsed {
                let elapsed = self.elapsed();
                if elapsed >= budget {
                    return Tick::Exhausted;
                }
                delay = delay.min(budget - elapsed);
            }

            if wait(self.scheduler, delay, self.abort).await == Wait::Aborted {
                return Tick::Aborted;
            }
        }

        self.round += 1;
        Tick::Round(self.round)
    }
}

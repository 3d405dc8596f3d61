use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::NodeError;
use crate::state_machine::{Outcome, Phase, TransitionTable};

/// Runs the handler for a phase and reports how it went.
#[allow(async_fn_in_trait)]
pub trait PhaseRunner {
    async fn run_phase(&mut self, phase: Phase) -> Outcome;
}

/// Backoff and ceiling for phases that keep re-entering themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive self-transitions tolerated before escalating.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// delay = min(base_delay_ms * 2^(attempt - 1), max_delay_ms)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Why the driver stopped. The surrounding runtime decides what happens next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Exit {
    /// A new image is staged; restart into it.
    UpdateApplied,
    /// The retry ceiling was reached in this phase, either by re-entering it or
    /// by failing cycles that never got back to a successful publish.
    RetriesExhausted(Phase),
    /// The configured iteration limit was reached.
    IterationLimit,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue(Phase),
    Exit(Exit),
}

/// Record of a driver run, printed when the driver stops.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub iterations: u64,
    pub phase_visits: BTreeMap<Phase, u64>,
    /// PUBLISH phases that completed, including cycles skipped for a failed
    /// sensor read.
    pub publish_iterations: u64,
    pub exit: Option<Exit>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            iterations: 0,
            phase_visits: BTreeMap::new(),
            publish_iterations: 0,
            exit: None,
        }
    }

    fn record(&mut self, phase: Phase, outcome: Outcome) {
        self.iterations += 1;
        *self.phase_visits.entry(phase).or_insert(0) += 1;
        if phase == Phase::Publish && outcome == Outcome::Success {
            self.publish_iterations += 1;
        }
    }
}

/// Owns the phase cursor and moves it along the transition table.
pub struct Driver<R> {
    runner: R,
    table: TransitionTable,
    policy: RetryPolicy,
    phase: Phase,
    /// Consecutive self-transitions of the current phase.
    retries: u32,
    /// Consecutive fallbacks to another phase; only a PUBLISH success clears it.
    fallbacks: u32,
    summary: RunSummary,
}

impl<R: PhaseRunner> Driver<R> {
    pub fn new(runner: R, table: TransitionTable, policy: RetryPolicy) -> Self {
        Self {
            runner,
            table,
            policy,
            phase: Phase::INITIAL,
            retries: 0,
            fallbacks: 0,
            summary: RunSummary::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Run one phase and move the cursor.
    ///
    /// A non-success outcome that re-enters the same phase backs off
    /// exponentially. Past `max_retries` such re-entries the phase is abandoned
    /// for `Phase::INITIAL`, or the run ends if it already is the initial phase.
    ///
    /// Falling back to another phase (including that escalation) counts as one
    /// failed cycle and backs off by the number of failed cycles since the last
    /// successful PUBLISH. Past `max_retries` failed cycles the run ends.
    pub async fn step(&mut self) -> Result<Step, NodeError> {
        let phase = self.phase;
        log::debug!("entering {phase}");
        let outcome = self.runner.run_phase(phase).await;
        self.summary.record(phase, outcome);

        if outcome.is_terminal() {
            log::info!("{phase} returned {outcome}, stopping");
            return Ok(Step::Exit(Exit::UpdateApplied));
        }

        let next = self
            .table
            .lookup(phase, outcome)
            .ok_or(NodeError::MissingTransition { phase, outcome })?;

        let next = if outcome == Outcome::Success {
            self.retries = 0;
            if phase == Phase::Publish {
                self.fallbacks = 0;
            }
            next
        } else if next == phase && self.retries < self.policy.max_retries {
            self.retries += 1;
            let delay = self.policy.delay_for_attempt(self.retries);
            log::warn!(
                "{phase} returned {outcome}, retry {}/{} in {delay:?}",
                self.retries,
                self.policy.max_retries
            );
            sleep(delay).await;
            next
        } else if next == phase && phase == Phase::INITIAL {
            log::error!(
                "{phase} failed {} times in a row, giving up",
                self.policy.max_retries + 1
            );
            return Ok(Step::Exit(Exit::RetriesExhausted(phase)));
        } else {
            let target = if next == phase {
                log::warn!(
                    "{phase} exceeded {} retries, escalating",
                    self.policy.max_retries
                );
                Phase::INITIAL
            } else {
                next
            };
            self.retries = 0;
            self.fallbacks += 1;
            if self.fallbacks > self.policy.max_retries {
                log::error!(
                    "{phase} returned {outcome}, {} failed cycles without a publish, giving up",
                    self.fallbacks
                );
                return Ok(Step::Exit(Exit::RetriesExhausted(phase)));
            }
            let delay = self.policy.delay_for_attempt(self.fallbacks);
            log::warn!(
                "{phase} returned {outcome}, falling back to {target} in {delay:?} (cycle {}/{})",
                self.fallbacks,
                self.policy.max_retries
            );
            sleep(delay).await;
            target
        };

        if next != phase {
            log::info!("{phase} --{outcome}--> {next}");
        }
        self.phase = next;
        Ok(Step::Continue(next))
    }

    /// Loop until a terminal outcome, the retry ceiling, or `limit` iterations.
    pub async fn run(&mut self, limit: Option<u64>) -> Result<Exit, NodeError> {
        loop {
            if limit.is_some_and(|limit| self.summary.iterations >= limit) {
                return Ok(self.finish(Exit::IterationLimit));
            }
            if let Step::Exit(exit) = self.step().await? {
                return Ok(self.finish(exit));
            }
        }
    }

    /// Stamp the summary with the exit reason.
    pub fn finish(&mut self, exit: Exit) -> Exit {
        self.summary.finished_at = Some(Utc::now());
        self.summary.exit = Some(exit);
        exit
    }
}

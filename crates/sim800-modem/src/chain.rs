//! Command chains.
//!
//! A chain is an ordered list of steps, each with a [`FailurePolicy`], plus
//! a cleanup list that always runs afterwards. Static chains are described
//! with [`Chain`] and run with [`Session::run_chain`]. Chains whose later
//! steps depend on earlier responses (read the HTTP body only when the
//! server sent one) use [`Session::transaction`] and drive a
//! [`ChainRunner`] step by step.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sim800_at_protocol::{ProtocolResult, RawResponse};
use tracing::{debug, info, warn};

use crate::command::{Command, Outcome};
use crate::error::{ChainError, CleanupRecord, StepError};
use crate::session::{Link, Session, SessionState, StateGuard};
use crate::telemetry::metric_defs;

// ============================================================================
// Policies and steps
// ============================================================================

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Stop the chain and run cleanup.
    Abort,
    /// Re-execute up to `n` more times, then abort.
    Retry(u32),
    /// Record the failure and continue.
    Ignore,
}

impl FailurePolicy {
    /// Total number of executions allowed.
    pub fn attempts(&self) -> u32 {
        match self {
            FailurePolicy::Retry(n) => n.saturating_add(1),
            _ => 1,
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => f.write_str("abort"),
            FailurePolicy::Retry(n) => write!(f, "retry({})", n),
            FailurePolicy::Ignore => f.write_str("ignore"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    /// Parse `abort`, `ignore`, `retry(n)` or `retry: n`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "abort" => return Ok(FailurePolicy::Abort),
            "ignore" => return Ok(FailurePolicy::Ignore),
            _ => {}
        }
        let count = s
            .strip_prefix("retry")
            .map(|rest| rest.trim().trim_start_matches(':').trim())
            .map(|rest| rest.trim_start_matches('(').trim_end_matches(')').trim())
            .ok_or_else(|| format!("unknown failure policy '{}'", s))?;
        count
            .parse()
            .map(FailurePolicy::Retry)
            .map_err(|_| format!("invalid retry count in '{}'", s))
    }
}

impl Serialize for FailurePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FailurePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A command and the policy applied when it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    /// The command to execute.
    pub command: Command,
    /// Policy on `Error` or `Timeout`.
    pub on_failure: FailurePolicy,
}

impl ChainStep {
    /// Step with an explicit policy.
    pub fn new(command: Command, on_failure: FailurePolicy) -> Self {
        ChainStep {
            command,
            on_failure,
        }
    }

    /// Step that aborts the chain on failure.
    pub fn abort(command: Command) -> Self {
        Self::new(command, FailurePolicy::Abort)
    }
}

/// A fixed chain template.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    name: &'static str,
    steps: Vec<ChainStep>,
    cleanup: Vec<Command>,
}

impl Chain {
    /// Empty chain named `name`.
    pub fn new(name: &'static str) -> Self {
        Chain {
            name,
            steps: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a cleanup command.
    pub fn cleanup(mut self, command: Command) -> Self {
        self.cleanup.push(command);
        self
    }

    /// Chain name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// Cleanup commands in execution order.
    pub fn cleanup_commands(&self) -> &[Command] {
        &self.cleanup
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared with the session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next step starts.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Running
// ============================================================================

/// Executes steps of one chain while holding the link.
pub struct ChainRunner<'a> {
    link: &'a mut Link,
    cancel: &'a CancelToken,
    chain: &'static str,
    ignored: Vec<StepError>,
    faulted: bool,
}

impl<'a> ChainRunner<'a> {
    fn new(link: &'a mut Link, cancel: &'a CancelToken, chain: &'static str) -> Self {
        ChainRunner {
            link,
            cancel,
            chain,
            ignored: Vec::new(),
            faulted: false,
        }
    }

    /// Execute a step under its policy.
    ///
    /// Returns `Ok(None)` when the step failed and its policy is `Ignore`.
    pub fn run(&mut self, step: &ChainStep) -> Result<Option<RawResponse>, StepError> {
        match self.attempt(step) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if step.on_failure == FailurePolicy::Ignore && is_absorbable(&err) => {
                warn!(chain = self.chain, error = %err, "ignoring failed step");
                self.ignored.push(err);
                Ok(None)
            }
            Err(err) => Err(self.escalate(err)),
        }
    }

    /// Execute a step whose response is needed.
    ///
    /// Retries still apply, but an `Ignore` policy cannot absorb the failure.
    pub fn require(&mut self, step: &ChainStep) -> Result<RawResponse, StepError> {
        self.attempt(step).map_err(|err| self.escalate(err))
    }

    /// Shorthand for [`ChainRunner::require`] with a fresh step.
    pub fn exec(&mut self, command: Command, policy: FailurePolicy) -> Result<RawResponse, StepError> {
        self.require(&ChainStep::new(command, policy))
    }

    /// Failures absorbed so far by `Ignore` policies.
    pub fn ignored(&self) -> &[StepError] {
        &self.ignored
    }

    fn escalate(&mut self, err: StepError) -> StepError {
        match &err {
            StepError::Timeout { .. } | StepError::Transport { .. } => self.faulted = true,
            _ => {}
        }
        err
    }

    fn attempt(&mut self, step: &ChainStep) -> Result<RawResponse, StepError> {
        let command = &step.command;
        let attempts = step.on_failure.attempts();
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled {
                    command: command.text().to_string(),
                });
            }
            let err = match self.link.exchange(command) {
                Ok(Outcome::Ok(raw)) => return Ok(raw),
                Ok(outcome) => match outcome.into_result() {
                    Ok(raw) => return Ok(raw),
                    Err(err) => err,
                },
                Err(source) => {
                    return Err(StepError::Transport {
                        command: command.text().to_string(),
                        source,
                    })
                }
            };
            if attempt >= attempts {
                return Err(err);
            }
            warn!(
                chain = self.chain,
                attempt,
                attempts,
                error = %err,
                "step failed, retrying"
            );
            metrics::counter!(metric_defs::STEP_RETRIES.name).increment(1);
            attempt += 1;
        }
    }
}

/// Transport failures and cancellation are never absorbed.
fn is_absorbable(err: &StepError) -> bool {
    matches!(err, StepError::Modem { .. } | StepError::Timeout { .. })
}

/// Parse a step response, attributing failures to the step.
pub fn parse_step<T>(
    raw: &RawResponse,
    parser: impl FnOnce(&RawResponse) -> ProtocolResult<T>,
) -> Result<T, StepError> {
    parser(raw).map_err(|source| StepError::Parse {
        command: raw.command().to_string(),
        source,
    })
}

fn run_cleanup(link: &mut Link, chain: &'static str, commands: &[Command]) -> (Vec<CleanupRecord>, bool) {
    let mut records = Vec::with_capacity(commands.len());
    let mut faulted = false;
    for command in commands {
        let error = match link.exchange(command) {
            Ok(outcome) => outcome.into_result().err(),
            Err(source) => {
                faulted = true;
                Some(StepError::Transport {
                    command: command.text().to_string(),
                    source,
                })
            }
        };
        if let Some(err) = &error {
            warn!(chain, error = %err, "cleanup command failed");
            metrics::counter!(metric_defs::CLEANUP_FAILURES.name).increment(1);
        }
        records.push(CleanupRecord {
            command: command.text().to_string(),
            error,
        });
    }
    (records, faulted)
}

/// Value produced by a successful transaction.
#[derive(Debug)]
pub struct ChainOutput<T> {
    /// What the chain body returned.
    pub value: T,
    /// Failures absorbed by `Ignore` policies.
    pub ignored: Vec<StepError>,
    /// Cleanup outcomes.
    pub cleanup: Vec<CleanupRecord>,
}

/// Result of [`Session::run_chain`].
#[derive(Debug)]
pub struct ChainReport {
    /// Responses of the steps that succeeded, in order.
    pub responses: Vec<RawResponse>,
    /// Failures absorbed by `Ignore` policies.
    pub ignored: Vec<StepError>,
    /// Cleanup outcomes.
    pub cleanup: Vec<CleanupRecord>,
}

impl Session {
    /// Run `body` as one chain.
    ///
    /// The session must be `Ready`; it is `Busy` while the body runs. The
    /// cleanup commands run exactly once afterwards, whether the body
    /// succeeded, failed or was cancelled. The session returns to `Ready`
    /// unless a transport failure, a fatal timeout or a cancellation
    /// occurred, in which case it is `Faulted`.
    pub fn transaction<T, F>(
        &self,
        name: &'static str,
        cleanup: &[Command],
        body: F,
    ) -> Result<ChainOutput<T>, ChainError>
    where
        F: FnOnce(&mut ChainRunner<'_>) -> Result<T, StepError>,
    {
        let mut link = self.link.lock();
        let state = self.state();
        if state != SessionState::Ready {
            return Err(ChainError::NotReady(state));
        }
        let mut guard = StateGuard::enter(&self.state, SessionState::Busy);
        debug!(chain = name, "chain started");
        metrics::counter!(metric_defs::CHAINS_STARTED.name, "chain" => name).increment(1);

        let mut runner = ChainRunner::new(&mut *link, &self.cancel, name);
        let result = body(&mut runner);
        let ChainRunner {
            ignored, faulted, ..
        } = runner;

        let (cleanup, cleanup_faulted) = run_cleanup(&mut *link, name, cleanup);
        let cancelled = self.cancel.is_cancelled();
        let healthy = !(faulted || cleanup_faulted || cancelled);
        guard.finish(if healthy {
            SessionState::Ready
        } else {
            SessionState::Faulted
        });

        let result = match result {
            Ok(value) => {
                debug!(chain = name, "chain completed");
                Ok(ChainOutput {
                    value,
                    ignored,
                    cleanup,
                })
            }
            Err(StepError::Cancelled { .. }) => {
                info!(chain = name, "chain cancelled");
                metrics::counter!(metric_defs::CHAIN_ABORTS.name, "chain" => name).increment(1);
                Err(ChainError::Cancelled {
                    chain: name,
                    cleanup,
                })
            }
            Err(source) => {
                warn!(chain = name, error = %source, "chain aborted");
                metrics::counter!(metric_defs::CHAIN_ABORTS.name, "chain" => name).increment(1);
                Err(ChainError::Aborted {
                    chain: name,
                    source,
                    cleanup,
                })
            }
        };
        drop(guard);
        result
    }

    /// Run a fixed chain template.
    pub fn run_chain(&self, chain: &Chain) -> Result<ChainReport, ChainError> {
        let output = self.transaction(chain.name, &chain.cleanup, |tx| {
            let mut responses = Vec::with_capacity(chain.steps.len());
            for step in &chain.steps {
                if let Some(raw) = tx.run(step)? {
                    responses.push(raw);
                }
            }
            Ok(responses)
        })?;
        Ok(ChainReport {
            responses: output.value,
            ignored: output.ignored,
            cleanup: output.cleanup,
        })
    }
}

//! The command session: one owned connection to one modem.
//!
//! A [`Session`] holds the link behind a mutex. Whoever holds the mutex owns
//! the `Busy` right; concurrent callers block on it until the current chain
//! (or boot, or single command) finishes. State changes are published before
//! the mutex is released, so the next holder always sees a settled state.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sim800_at_protocol::{
    is_unsolicited, standard_terminators, CountedPayload, ErrorCode, RawResponse,
};
use tracing::{debug, info, trace};

use crate::chain::CancelToken;
use crate::command::{Command, Outcome};
use crate::config::ModemConfig;
use crate::error::{Sim800Error, Sim800Result, TransportError};
use crate::reset::{HardwareReset, NoReset, SysfsGpioReset};
use crate::telemetry::metric_defs;
use crate::transport::{self, ReadOutcome, Transport};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed; the modem has not been booted.
    Uninitialized,
    /// Reset issued, polling for readiness.
    Booting,
    /// Accepting commands.
    Ready,
    /// A chain or command is running.
    Busy,
    /// A fatal error occurred; boot again before further use.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Booting => "booting",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Link
// ============================================================================

/// Exclusive access to the transport and reset line.
pub(crate) struct Link {
    transport: Box<dyn Transport>,
    pub(crate) reset: Box<dyn HardwareReset>,
    pause: Duration,
    last_exchange: Option<Instant>,
}

impl Link {
    fn new(transport: Box<dyn Transport>, reset: Box<dyn HardwareReset>, pause: Duration) -> Self {
        Link {
            transport,
            reset,
            pause,
            last_exchange: None,
        }
    }

    /// Wait out the inter-command pause.
    fn settle(&self) {
        if let Some(last) = self.last_exchange {
            let since = last.elapsed();
            if since < self.pause {
                thread::sleep(self.pause - since);
            }
        }
    }

    /// Lines that arrived between exchanges. URCs are kept; anything else is
    /// a late reply to an earlier command and is dropped.
    fn take_stale(&mut self) -> Result<Vec<String>, TransportError> {
        let mut kept = Vec::new();
        for line in self.transport.drain()? {
            if is_unsolicited(&line) {
                kept.push(line);
            } else if !line.trim().is_empty() {
                debug!(line = %line, "discarding stale line");
            }
        }
        Ok(kept)
    }

    /// Write one command and classify its response.
    pub(crate) fn exchange(&mut self, command: &Command) -> Result<Outcome, TransportError> {
        self.settle();
        let result = self.exchange_inner(command);
        self.last_exchange = Some(Instant::now());
        result
    }

    fn exchange_inner(&mut self, command: &Command) -> Result<Outcome, TransportError> {
        let mut lines = self.take_stale()?;

        debug!(command = command.text(), "sending");
        metrics::counter!(metric_defs::COMMANDS_SENT.name).increment(1);
        let started = Instant::now();
        self.transport.write(command.bytes())?;

        if command.is_write_only() {
            return Ok(Outcome::Ok(RawResponse::new(command.text(), lines)));
        }

        let deadline = started + command.timeout();
        let read = self
            .transport
            .read_until(command.terminators(), command.timeout())?;
        let (read, payload) = match (command.counted_payload(), read) {
            (Some(counted), ReadOutcome::Matched { terminator, lines: header })
                if terminator.is_success() =>
            {
                self.read_counted(counted, header, deadline)?
            }
            (_, read) => (read, None),
        };
        let elapsed = started.elapsed();
        metrics::histogram!(metric_defs::COMMAND_LATENCY.name).record(elapsed.as_secs_f64());

        let outcome = match read {
            ReadOutcome::Matched { terminator, lines: received } => {
                let failure_line = received.last().cloned().unwrap_or_default();
                lines.extend(received);
                let mut raw = RawResponse::new(command.text(), lines);
                if let Some(payload) = payload {
                    raw = raw.with_payload(payload);
                }
                if terminator.is_success() {
                    Outcome::Ok(raw)
                } else {
                    Outcome::Error(ErrorCode::from_line(&failure_line), raw)
                }
            }
            ReadOutcome::TimedOut { lines: received } => {
                lines.extend(received);
                Outcome::Timeout {
                    partial: RawResponse::new(command.text(), lines),
                    elapsed,
                }
            }
        };

        for urc in outcome.response().unsolicited() {
            trace!(?urc, "unsolicited");
            metrics::counter!(metric_defs::URCS_RECEIVED.name).increment(1);
        }
        let class = match &outcome {
            Outcome::Ok(_) => "ok",
            Outcome::Error(..) => "error",
            Outcome::Timeout { .. } => "timeout",
        };
        metrics::counter!(metric_defs::COMMAND_OUTCOMES.name, "outcome" => class).increment(1);
        match &outcome {
            Outcome::Error(code, _) => debug!(command = command.text(), %code, "command failed"),
            Outcome::Timeout { .. } => {
                debug!(command = command.text(), ?elapsed, "command timed out")
            }
            Outcome::Ok(raw) => trace!(command = command.text(), response = %raw, "command ok"),
        }
        Ok(outcome)
    }

    /// Read the payload announced by the last header line, then the final
    /// result code.
    ///
    /// A header without a readable length skips the payload; the parser
    /// reports it.
    fn read_counted(
        &mut self,
        counted: &CountedPayload,
        mut lines: Vec<String>,
        deadline: Instant,
    ) -> Result<(ReadOutcome, Option<Vec<u8>>), TransportError> {
        let remaining = || deadline.saturating_duration_since(Instant::now());
        let announced = lines.last().and_then(|line| counted.length(line));
        let mut payload = None;
        if let Some(len) = announced {
            match self.transport.read_payload(len, remaining())? {
                Some(data) => {
                    trace!(bytes = data.len(), "counted payload");
                    payload = Some(data);
                }
                None => return Ok((ReadOutcome::TimedOut { lines }, None)),
            }
        }
        let read = match self.transport.read_until(&standard_terminators(), remaining())? {
            ReadOutcome::Matched { terminator, lines: tail } => {
                lines.extend(tail);
                ReadOutcome::Matched { terminator, lines }
            }
            ReadOutcome::TimedOut { lines: tail } => {
                lines.extend(tail);
                ReadOutcome::TimedOut { lines }
            }
        };
        Ok((read, payload))
    }
}

// ============================================================================
// State guard
// ============================================================================

/// Holds a transitional state and publishes the final one on drop.
///
/// The final state defaults to `Faulted` so an early return or a panic
/// never leaves the session looking usable.
pub(crate) struct StateGuard<'a> {
    state: &'a RwLock<SessionState>,
    next: SessionState,
}

impl<'a> StateGuard<'a> {
    pub(crate) fn enter(state: &'a RwLock<SessionState>, during: SessionState) -> Self {
        set_state(state, during);
        StateGuard {
            state,
            next: SessionState::Faulted,
        }
    }

    pub(crate) fn finish(&mut self, next: SessionState) {
        self.next = next;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        set_state(self.state, self.next);
    }
}

fn set_state(state: &RwLock<SessionState>, next: SessionState) {
    let mut current = state.write();
    if *current != next {
        match next {
            SessionState::Busy => trace!(from = %*current, "session busy"),
            SessionState::Faulted => info!(from = %*current, "session faulted"),
            _ => debug!(from = %*current, to = %next, "session state"),
        }
        *current = next;
    }
}

// ============================================================================
// Session
// ============================================================================

/// An AT command session bound to one modem.
///
/// `Session` is `Sync`; share it with `Arc` to issue operations from
/// several threads. Operations are serialized: a second caller blocks until
/// the first finishes.
pub struct Session {
    pub(crate) config: ModemConfig,
    pub(crate) link: Mutex<Link>,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) cancel: CancelToken,
    pub(crate) last_sms: Mutex<Option<Instant>>,
}

impl Session {
    /// Create a session over an existing transport and reset line.
    pub fn new<T, R>(config: ModemConfig, transport: T, reset: R) -> Self
    where
        T: Transport + 'static,
        R: HardwareReset + 'static,
    {
        let pause = config.command_pause;
        Session {
            config,
            link: Mutex::new(Link::new(Box::new(transport), Box::new(reset), pause)),
            state: RwLock::new(SessionState::Uninitialized),
            cancel: CancelToken::new(),
            last_sms: Mutex::new(None),
        }
    }

    /// Validate `config`, open its serial port and pick the reset line.
    pub fn open(config: ModemConfig) -> Sim800Result<Self> {
        config.validate()?;
        let transport = transport::open(&config.serial_port, config.baud_rate)?;
        let session = if config.reset_pin.is_some() {
            Session::new(config, transport, SysfsGpioReset::new())
        } else {
            Session::new(config, transport, NoReset)
        };
        info!(port = %session.config.serial_port, "session opened");
        Ok(session)
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Token that requests cancellation of the running chain.
    ///
    /// The command in flight is never interrupted: it runs to its terminator
    /// or timeout, cleanup runs, and the session is faulted.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute a single command outside of any chain.
    ///
    /// Requires `Ready`. A timeout faults the session unless the command is
    /// best-effort; a transport failure always does. Modem errors are
    /// returned as [`Outcome::Error`] and leave the session ready.
    pub fn execute(&self, command: &Command) -> Sim800Result<Outcome> {
        let mut link = self.link.lock();
        let state = self.state();
        if state != SessionState::Ready {
            return Err(Sim800Error::NotReady(state));
        }
        let mut guard = StateGuard::enter(&self.state, SessionState::Busy);
        let outcome = link.exchange(command)?;
        match &outcome {
            Outcome::Timeout { .. } if !command.is_best_effort() => {
                guard.finish(SessionState::Faulted)
            }
            _ => guard.finish(SessionState::Ready),
        }
        drop(guard);
        Ok(outcome)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.config.serial_port)
            .field("state", &self.state())
            .finish()
    }
}

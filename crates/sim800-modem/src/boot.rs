//! Boot sequencing: reset the modem and wait until it answers.

use std::thread;
use std::time::Instant;

use sim800_at_protocol::{standard_terminators, ESCAPE};
use tracing::{debug, info, warn};

use crate::command::{Command, Outcome};
use crate::error::BootError;
use crate::session::{Session, SessionState, StateGuard};
use crate::telemetry::metric_defs;

/// The readiness poll, `AT`.
const POLL: &[u8] = b"AT\r\n";

impl Session {
    /// Bring the modem to `Ready`.
    ///
    /// Does nothing when the session is already ready. Otherwise pulses the
    /// reset line (or, without one, sends ESC to leave any stuck text entry)
    /// and polls `AT` until it is answered with `OK` and every configured
    /// boot message has been seen, or `boot_wait_time` runs out.
    ///
    /// This is the only way out of `Uninitialized` and `Faulted`, and clears
    /// any pending cancellation.
    pub fn boot(&self) -> Result<(), BootError> {
        let mut link = self.link.lock();
        if self.state() == SessionState::Ready {
            debug!("already ready");
            return Ok(());
        }
        self.cancel.reset();
        let mut guard = StateGuard::enter(&self.state, SessionState::Booting);
        let config = &self.config;

        match config.reset_pin {
            Some(pin) => {
                if let Err(err) = link.reset.pulse(pin, config.reset_pulse) {
                    metrics::counter!(metric_defs::BOOT_ATTEMPTS.name, "result" => "failed")
                        .increment(1);
                    return Err(BootError::Reset(err));
                }
            }
            None => {
                let escape = Command::write_only("<ESC>", vec![ESCAPE]);
                if let Err(err) = link.exchange(&escape) {
                    warn!(error = %err, "soft reset write failed");
                }
            }
        }

        let window = config.boot_wait_time;
        let started = Instant::now();
        let mut polls = 0u32;
        let mut answered = false;
        let mut seen = vec![false; config.boot_messages.len()];

        loop {
            let remaining = window.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            polls += 1;
            let poll = Command::payload(
                "AT",
                POLL.to_vec(),
                standard_terminators(),
                config.read_timeout.min(remaining),
            )
            .best_effort();
            match link.exchange(&poll) {
                Ok(outcome) => {
                    for line in outcome.response().lines() {
                        for (expected, flag) in config.boot_messages.iter().zip(seen.iter_mut()) {
                            if !*flag && line.contains(expected.as_str()) {
                                debug!(message = %expected, "boot message seen");
                                *flag = true;
                            }
                        }
                    }
                    if matches!(outcome, Outcome::Ok(_)) {
                        answered = true;
                    }
                }
                Err(err) => debug!(error = %err, "poll failed"),
            }

            if answered && seen.iter().all(|&s| s) {
                guard.finish(SessionState::Ready);
                metrics::counter!(metric_defs::BOOT_ATTEMPTS.name, "result" => "ready").increment(1);
                info!(polls, elapsed = ?started.elapsed(), "modem ready");
                return Ok(());
            }

            let remaining = window.saturating_sub(started.elapsed());
            thread::sleep(config.boot_poll_interval.min(remaining));
        }

        let missing: Vec<String> = config
            .boot_messages
            .iter()
            .zip(&seen)
            .filter(|(_, &seen)| !seen)
            .map(|(message, _)| message.clone())
            .collect();
        metrics::counter!(metric_defs::BOOT_ATTEMPTS.name, "result" => "failed").increment(1);
        warn!(polls, answered, ?missing, "boot window exhausted");
        Err(BootError::WindowExhausted {
            waited: started.elapsed(),
            polls,
            missing,
        })
    }
}


//! Scripted modem stubs shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sim800_modem::protocol::{decode_latin1, Terminator};
use sim800_modem::{
    HardwareReset, ModemConfig, ReadOutcome, Session, Transport, TransportError,
};

/// What the stub does when a command matches a rule.
#[derive(Debug, Clone)]
enum Reply {
    Lines(Vec<String>),
    Silence,
    Fail,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
    once: bool,
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<Rule>,
    written: Vec<String>,
    queued: VecDeque<String>,
    unsolicited: VecDeque<String>,
    silent: bool,
}

/// A [`Transport`] that answers written commands from a script.
///
/// One-shot rules take priority over persistent ones; among each kind the
/// first registered match wins. Unmatched `AT` commands are answered with
/// `OK`; unmatched payloads get no answer.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModem {
    script: Arc<Mutex<Script>>,
}

fn lines(reply: &[&str]) -> Vec<String> {
    reply.iter().map(|line| line.to_string()).collect()
}

impl ScriptedModem {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(&self, prefix: &str, reply: Reply, once: bool) -> &Self {
        self.script.lock().rules.push(Rule {
            prefix: prefix.to_string(),
            reply,
            once,
        });
        self
    }

    /// Answer every command starting with `prefix` with `reply`.
    pub fn on(&self, prefix: &str, reply: &[&str]) -> &Self {
        self.rule(prefix, Reply::Lines(lines(reply)), false)
    }

    /// Answer the next command starting with `prefix` with `reply`.
    pub fn once(&self, prefix: &str, reply: &[&str]) -> &Self {
        self.rule(prefix, Reply::Lines(lines(reply)), true)
    }

    /// Never answer commands starting with `prefix`.
    pub fn silent_on(&self, prefix: &str) -> &Self {
        self.rule(prefix, Reply::Silence, false)
    }

    /// Fail the write of commands starting with `prefix`.
    pub fn fail_on(&self, prefix: &str) -> &Self {
        self.rule(prefix, Reply::Fail, false)
    }

    /// Never answer anything.
    pub fn go_silent(&self) {
        self.script.lock().silent = true;
    }

    /// Resume answering after [`ScriptedModem::go_silent`].
    pub fn wake(&self) {
        self.script.lock().silent = false;
    }

    /// Queue an unsolicited line, delivered before the next command.
    pub fn push_unsolicited(&self, line: &str) {
        self.script.lock().unsolicited.push_back(line.to_string());
    }

    /// Everything written so far, decoded and without line endings.
    pub fn written(&self) -> Vec<String> {
        self.script.lock().written.clone()
    }

    /// Number of writes starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.script
            .lock()
            .written
            .iter()
            .filter(|w| w.starts_with(prefix))
            .count()
    }

    /// Index of the first write starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.script
            .lock()
            .written
            .iter()
            .position(|w| w.starts_with(prefix))
    }
}

impl Script {
    fn take_reply(&mut self, text: &str) -> Reply {
        if self.silent {
            return Reply::Silence;
        }
        let once = self
            .rules
            .iter()
            .position(|r| r.once && text.starts_with(&r.prefix));
        if let Some(index) = once {
            return self.rules.remove(index).reply;
        }
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| !r.once && text.starts_with(&r.prefix))
        {
            return rule.reply.clone();
        }
        if text.starts_with("AT") {
            Reply::Lines(vec!["OK".to_string()])
        } else {
            Reply::Silence
        }
    }
}

impl Transport for ScriptedModem {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let text = decode_latin1(data)
            .trim_end_matches(['\r', '\n', '\u{1a}'])
            .to_string();
        let mut script = self.script.lock();
        script.written.push(text.clone());
        match script.take_reply(&text) {
            Reply::Lines(reply) => script.queued.extend(reply),
            Reply::Silence => {}
            Reply::Fail => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )))
            }
        }
        Ok(())
    }

    fn read_until(
        &mut self,
        terminators: &[Terminator],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        let mut received = Vec::new();
        {
            let mut script = self.script.lock();
            while let Some(line) = script.queued.pop_front() {
                let matched = terminators.iter().find(|t| t.matches_line(&line)).cloned();
                received.push(line);
                if let Some(terminator) = matched {
                    return Ok(ReadOutcome::Matched {
                        terminator,
                        lines: received,
                    });
                }
            }
        }
        thread::sleep(timeout);
        Ok(ReadOutcome::TimedOut { lines: received })
    }

    fn read_payload(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut script = self.script.lock();
        let mut data: Vec<u8> = Vec::new();
        let mut taken = 0;
        while data.len() < len {
            let Some(line) = script.queued.get(taken) else {
                drop(script);
                thread::sleep(timeout);
                return Ok(None);
            };
            if taken > 0 {
                data.extend_from_slice(b"\r\n");
            }
            data.extend(line.chars().map(|c| c as u8));
            taken += 1;
        }
        script.queued.drain(..taken);
        // Bytes past the payload stay queued as the start of the next line.
        let rest = data.split_off(len);
        let rest = decode_latin1(&rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        if !rest.is_empty() {
            script.queued.push_front(rest.to_string());
        }
        Ok(Some(data))
    }

    fn drain(&mut self) -> Result<Vec<String>, TransportError> {
        let mut script = self.script.lock();
        let mut stale: Vec<String> = script.queued.drain(..).collect();
        stale.extend(script.unsolicited.drain(..));
        Ok(stale)
    }
}

/// A [`HardwareReset`] that records its pulses.
#[derive(Debug, Clone, Default)]
pub struct RecordingReset {
    pulses: Arc<Mutex<Vec<(u32, Duration)>>>,
    fail: bool,
}

impl RecordingReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        RecordingReset {
            fail: true,
            ..Self::default()
        }
    }

    pub fn pulses(&self) -> Vec<(u32, Duration)> {
        self.pulses.lock().clone()
    }
}

impl HardwareReset for RecordingReset {
    fn pulse(&mut self, pin: u32, duration: Duration) -> Result<(), TransportError> {
        self.pulses.lock().push((pin, duration));
        if self.fail {
            return Err(TransportError::Gpio {
                pin,
                source: io::Error::new(io::ErrorKind::PermissionDenied, "scripted gpio failure"),
            });
        }
        Ok(())
    }
}

/// Configuration with timings short enough for tests.
pub fn fast_config() -> ModemConfig {
    ModemConfig {
        read_timeout: Duration::from_millis(50),
        boot_wait_time: Duration::from_millis(300),
        boot_poll_interval: Duration::from_millis(5),
        command_pause: Duration::ZERO,
        http_request_timeout: Duration::from_millis(80),
        http_post_upload_timeout: Duration::from_millis(50),
        tcp_connect_timeout: Duration::from_millis(50),
        sms_send_timeout: Duration::from_millis(50),
        reset_pulse: Duration::from_millis(1),
        ..ModemConfig::default()
    }
}

/// A session over `modem` with a recording reset line, not yet booted.
pub fn session_with(modem: &ScriptedModem, config: ModemConfig) -> (Session, RecordingReset) {
    let reset = RecordingReset::new();
    let session = Session::new(config, modem.clone(), reset.clone());
    (session, reset)
}

/// A booted session over `modem` using [`fast_config`].
pub fn ready_session(modem: &ScriptedModem) -> Session {
    let (session, _) = session_with(modem, fast_config());
    session.boot().expect("scripted modem should boot");
    session
}

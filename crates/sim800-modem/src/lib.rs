//! SIM800 Modem Session
//!
//! Blocking AT command session for SIMCom SIM800 modules, with the
//! operations most deployments need built on top: HTTP GET/POST, one-shot
//! TCP messages and SMS.
//!
//! # Overview
//!
//! - [`Session`] owns the single link to the modem. Exactly one chain runs
//!   at a time; other callers block until it finishes.
//! - [`Session::boot`] resets the modem and polls until it answers.
//! - [`Session::execute`] runs one [`Command`] and classifies the
//!   [`Outcome`].
//! - [`Session::run_chain`] and [`Session::transaction`] run ordered steps
//!   with per-step [`FailurePolicy`] and an unconditional cleanup list.
//! - Feature operations ([`Session::http_get`], [`Session::send_tcp_message`],
//!   [`Session::read_sms_message`], ...) are fixed chains over those.
//!
//! # Example
//!
//! ```rust,no_run
//! use sim800_modem::{ModemConfig, Session};
//!
//! let config = ModemConfig::load("sim800.yaml")?;
//! let session = Session::open(config)?;
//! session.boot()?;
//!
//! let response = session.http_get("http://example.com/")?;
//! println!("{} {}", response.status_code, response.body_text());
//! # Ok::<(), sim800_modem::Sim800Error>(())
//! ```

mod boot;
mod chain;
mod command;
mod config;
mod error;
mod features;
mod reset;
mod session;
pub mod telemetry;
pub mod transport;

pub use chain::{
    parse_step, CancelToken, Chain, ChainOutput, ChainReport, ChainRunner, ChainStep,
    FailurePolicy,
};
pub use command::{Command, Outcome};
pub use config::{CommandPolicies, ModemConfig};
pub use error::{
    BootError, ChainError, CleanupRecord, Sim800Error, Sim800Result, StepError, TransportError,
};
pub use features::http::HttpResponse;
pub use reset::{HardwareReset, NoReset, SysfsGpioReset};
pub use session::{Session, SessionState};
pub use transport::{ReadOutcome, StreamTransport, Transport};

pub use sim800_at_protocol as protocol;

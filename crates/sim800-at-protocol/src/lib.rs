//! SIM800 AT Command Protocol
//!
//! This crate provides types and utilities for talking to SIMCom SIM800 series
//! cellular modules over their AT command interface. It performs no I/O: the
//! session layer feeds received bytes into a [`LineCodec`], matches lines
//! against [`Terminator`]s and hands the captured [`RawResponse`] to the
//! parsers in this crate.
//!
//! # Protocol Overview
//!
//! The AT interface is a line-based text protocol:
//!
//! - **Commands** (host → modem): `AT...` text terminated with `\r\n`
//! - **Echo**: with `ATE1` (the power-on default) the command is echoed back
//! - **Information lines**: zero or more lines such as `+CSQ: 18,0`
//! - **Final result code**: `OK`, `ERROR`, `+CME ERROR: <n>`, `+CMS ERROR: <n>`
//!   or a command specific code such as `SEND OK` or `CONNECT FAIL`
//! - **Prompts**: data-entry commands answer with `> ` (no line ending) or
//!   `DOWNLOAD` before the payload is written
//! - **URCs**: unsolicited result codes (`+CMTI: "SM",3`, `RING`, ...) may be
//!   interleaved with any response
//!
//! # Example
//!
//! ```rust
//! use sim800_at_protocol::{AtCommand, HttpAction, HttpMethod, RawResponse};
//!
//! let cmd = AtCommand::HttpAction(HttpMethod::Get);
//! assert_eq!(cmd.to_command_string(), "AT+HTTPACTION=0");
//!
//! let raw = RawResponse::new(
//!     "AT+HTTPACTION=0",
//!     vec!["OK".into(), "".into(), "+HTTPACTION: 0,200,1024".into()],
//! );
//! let action = HttpAction::parse(&raw).unwrap();
//! assert_eq!(action.status_code, 200);
//! assert_eq!(action.body_length, 1024);
//! ```

mod codec;
mod commands;
mod error;
mod responses;
mod urc;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
pub use urc::*;

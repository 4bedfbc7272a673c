//! Caller-facing operations, each built as a command chain.
//!
//! - [`http`]: GET, HTTPS GET and POST through the bearer/HTTP service
//! - [`tcp`]: one-shot TCP message over the TCP/IP stack
//! - [`sms`]: read, delete and send text messages
//! - [`network`]: signal quality, local address, packet service reset

pub mod http;
pub mod network;
pub mod sms;
pub mod tcp;

use std::time::Duration;

use sim800_at_protocol::AtCommand;

use crate::chain::{ChainStep, FailurePolicy};
use crate::command::Command;
use crate::error::{Sim800Error, Sim800Result};
use crate::session::Session;

impl Session {
    /// A typed command with the default read timeout, after checking that
    /// its arguments can be written on the command line.
    pub(crate) fn command(&self, at: AtCommand) -> Sim800Result<Command> {
        self.command_with_timeout(at, self.config.read_timeout)
    }

    pub(crate) fn command_with_timeout(
        &self,
        at: AtCommand,
        timeout: Duration,
    ) -> Sim800Result<Command> {
        at.validate().map_err(Sim800Error::InvalidArgument)?;
        Command::at(&at, timeout).map_err(Sim800Error::InvalidArgument)
    }

    /// A step for a command with the default read timeout.
    pub(crate) fn fixed(&self, at: AtCommand, policy: FailurePolicy) -> Sim800Result<ChainStep> {
        Ok(ChainStep::new(self.command(at)?, policy))
    }

    /// The packet service attach steps shared by TCP operations.
    pub(crate) fn attach_steps(&self) -> Sim800Result<Vec<ChainStep>> {
        let policies = &self.config.policies;
        Ok(vec![
            self.fixed(AtCommand::GprsAttach(true), policies.network_attach)?,
            self.fixed(AtCommand::NormalIpMode, policies.session_setup)?,
            ChainStep::new(
                self.command(AtCommand::SetApn {
                    apn: self.config.apn.clone(),
                })?,
                policies.session_setup,
            ),
            ChainStep::new(
                self.command_with_timeout(AtCommand::BringUpWireless, self.config.tcp_connect_timeout)?,
                policies.network_attach,
            ),
        ])
    }
}

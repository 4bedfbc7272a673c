//! One-shot TCP messages through the modem's TCP/IP stack.

use sim800_at_protocol::{
    parse_local_ip, AtCommand, ProtocolError, TcpSendReport, Terminator, MAX_TCP_SEND_LENGTH,
};
use tracing::{debug, info};

use crate::chain::parse_step;
use crate::command::Command;
use crate::error::{Sim800Error, Sim800Result};
use crate::session::Session;

impl Session {
    /// Connect to `host:port`, send `message` and disconnect.
    ///
    /// The message is written verbatim and must be 1 to 1460 bytes. The
    /// connection and the PDP context are closed afterwards whether or not
    /// the send succeeded.
    pub fn send_tcp_message(
        &self,
        host: &str,
        port: u16,
        message: &[u8],
    ) -> Sim800Result<TcpSendReport> {
        let config = &self.config;
        let policies = &config.policies;
        let payload = message.to_vec();
        if payload.is_empty() || payload.len() > MAX_TCP_SEND_LENGTH {
            return Err(Sim800Error::InvalidArgument(ProtocolError::BufferOverflow {
                max: MAX_TCP_SEND_LENGTH,
                actual: payload.len(),
            }));
        }

        let attach = self.attach_steps()?;
        let local_ip = self.fixed(AtCommand::LocalIp, policies.network_attach)?;
        let connect = self.command_with_timeout(
            AtCommand::TcpStart {
                host: host.trim().to_string(),
                port,
            },
            config.tcp_connect_timeout,
        )?;
        let announce = self.command(AtCommand::TcpSend {
            length: payload.len(),
        })?;
        let send = Command::payload(
            format!("<{} byte message>", payload.len()),
            payload.clone(),
            vec![
                Terminator::success("SEND OK"),
                Terminator::success("DATA ACCEPT"),
                Terminator::failure("SEND FAIL"),
                Terminator::ERROR,
            ],
            config.tcp_connect_timeout,
        );
        let cleanup = [
            self.command(AtCommand::TcpClose)?,
            self.command(AtCommand::PdpShutdown)?,
        ];

        info!(host, port, bytes = payload.len(), "tcp send");
        let output = self.transaction("tcp_send", &cleanup, |tx| {
            for step in &attach {
                tx.run(step)?;
            }
            let raw = tx.require(&local_ip)?;
            let ip = parse_step(&raw, parse_local_ip)?;
            debug!(%ip, "local address");

            tx.exec(connect, policies.data_transfer)?;
            tx.exec(announce, policies.data_transfer)?;
            let raw = tx.exec(send, policies.data_transfer)?;
            parse_step(&raw, |raw| TcpSendReport::parse(raw, payload.len()))
        })?;
        Ok(output.value)
    }
}

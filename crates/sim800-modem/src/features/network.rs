//! Network status and packet service management.

use std::net::Ipv4Addr;

use sim800_at_protocol::{parse_gprs_attached, parse_local_ip, AtCommand, SignalQuality};
use tracing::{debug, info};

use crate::chain::{parse_step, Chain, FailurePolicy};
use crate::error::Sim800Result;
use crate::session::Session;

impl Session {
    /// Current signal quality (`AT+CSQ`).
    pub fn signal_quality(&self) -> Sim800Result<SignalQuality> {
        let query = self.fixed(AtCommand::SignalQuality, FailurePolicy::Abort)?;
        let output = self.transaction("signal_quality", &[], |tx| {
            let raw = tx.require(&query)?;
            parse_step(&raw, SignalQuality::parse)
        })?;
        let quality = output.value;
        debug!(rssi = quality.rssi, dbm = ?quality.dbm(), "signal quality");
        Ok(quality)
    }

    /// Whether the modem is attached to the packet service (`AT+CGATT?`).
    pub fn gprs_attached(&self) -> Sim800Result<bool> {
        let query = self.fixed(AtCommand::GprsStatus, FailurePolicy::Abort)?;
        let output = self.transaction("gprs_status", &[], |tx| {
            let raw = tx.require(&query)?;
            parse_step(&raw, parse_gprs_attached)
        })?;
        Ok(output.value)
    }

    /// Attach to the packet service, bring up the wireless connection and
    /// return the address it was given.
    ///
    /// The connection is left up; see [`Session::reset_gprs`].
    pub fn connect(&self) -> Sim800Result<Ipv4Addr> {
        let attach = self.attach_steps()?;
        let local_ip = self.fixed(AtCommand::LocalIp, self.config.policies.network_attach)?;
        let output = self.transaction("connect", &[], |tx| {
            for step in &attach {
                tx.run(step)?;
            }
            let raw = tx.require(&local_ip)?;
            parse_step(&raw, parse_local_ip)
        })?;
        info!(ip = %output.value, "connected");
        Ok(output.value)
    }

    /// Address of the active wireless connection (`AT+CIFSR`).
    pub fn local_ip(&self) -> Sim800Result<Ipv4Addr> {
        let query = self.fixed(AtCommand::LocalIp, FailurePolicy::Abort)?;
        let output = self.transaction("local_ip", &[], |tx| {
            let raw = tx.require(&query)?;
            parse_step(&raw, parse_local_ip)
        })?;
        Ok(output.value)
    }

    /// Drop the PDP context and detach from the packet service, e.g. after
    /// the network deactivated the context.
    pub fn reset_gprs(&self) -> Sim800Result<()> {
        let chain = Chain::new("reset_gprs")
            .step(self.fixed(AtCommand::PdpShutdown, FailurePolicy::Abort)?)
            .step(self.fixed(AtCommand::GprsAttach(false), self.config.policies.network_attach)?);
        let report = self.run_chain(&chain)?;
        debug!(responses = report.responses.len(), "packet service reset");
        Ok(())
    }
}

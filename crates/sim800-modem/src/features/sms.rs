//! Text messages.

use std::time::Instant;

use sim800_at_protocol::{
    AtCommand, ProtocolError, SmsMessage, SmsSubmitReport, Terminator, CTRL_Z, ESCAPE,
};
use tracing::info;

use crate::chain::parse_step;
use crate::command::Command;
use crate::error::{Sim800Error, Sim800Result};
use crate::session::Session;

impl Session {
    /// Read the message stored at `index`.
    ///
    /// An empty slot is reported as [`Sim800Error::SmsNotFound`].
    pub fn read_sms_message(&self, index: u16) -> Sim800Result<SmsMessage> {
        let policies = &self.config.policies;
        let mode = self.fixed(AtCommand::SmsTextMode, policies.session_setup)?;
        let read = self.fixed(AtCommand::SmsRead { index }, policies.data_transfer)?;

        let output = self.transaction("sms_read", &[], |tx| {
            tx.run(&mode)?;
            let raw = tx.require(&read)?;
            parse_step(&raw, SmsMessage::parse)
        })?;
        output.value.ok_or(Sim800Error::SmsNotFound { index })
    }

    /// Delete every stored message. An empty inbox is not an error.
    pub fn delete_all_sms_messages(&self) -> Sim800Result<()> {
        let policies = &self.config.policies;
        let mode = self.fixed(AtCommand::SmsTextMode, policies.session_setup)?;
        let delete = self.fixed(AtCommand::SmsDeleteAll, policies.data_transfer)?;

        self.transaction("sms_delete_all", &[], |tx| {
            tx.run(&mode)?;
            tx.require(&delete)?;
            Ok(())
        })?;
        info!("deleted all messages");
        Ok(())
    }

    /// Send `text` to `number`.
    ///
    /// Messages are throttled: a second message within `sms_throttle` of the
    /// last successful one fails with [`Sim800Error::SmsThrottled`] without
    /// touching the modem. ESC is always written afterwards so a failed
    /// submission cannot leave the modem in text entry mode.
    pub fn send_sms_message(&self, number: &str, text: &str) -> Sim800Result<SmsSubmitReport> {
        let config = &self.config;
        let policies = &config.policies;

        if let Some(last) = *self.last_sms.lock() {
            let since = last.elapsed();
            if since < config.sms_throttle {
                return Err(Sim800Error::SmsThrottled {
                    remaining: config.sms_throttle - since,
                });
            }
        }
        if text.chars().any(|c| c == char::from(CTRL_Z) || c == char::from(ESCAPE)) {
            return Err(Sim800Error::InvalidArgument(ProtocolError::InvalidCommand(
                "message text contains Ctrl-Z or ESC".into(),
            )));
        }

        let mode = self.fixed(AtCommand::SmsTextMode, policies.session_setup)?;
        let recipient = self.command(AtCommand::SmsSend {
            number: number.trim().to_string(),
        })?;
        let body = Command::text_payload(
            text,
            &[CTRL_Z],
            vec![
                Terminator::OK,
                Terminator::ERROR,
                Terminator::CMS_ERROR,
                Terminator::CME_ERROR,
            ],
            config.sms_send_timeout,
        )
        .map_err(Sim800Error::InvalidArgument)?;
        let cleanup = [Command::write_only("<ESC>", vec![ESCAPE])];

        let output = self.transaction("sms_send", &cleanup, |tx| {
            tx.run(&mode)?;
            tx.exec(recipient, policies.data_transfer)?;
            let raw = tx.exec(body, policies.data_transfer)?;
            parse_step(&raw, SmsSubmitReport::parse)
        })?;

        *self.last_sms.lock() = Some(Instant::now());
        info!(reference = output.value.reference, "message sent");
        Ok(output.value)
    }
}

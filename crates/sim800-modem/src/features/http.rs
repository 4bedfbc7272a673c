//! HTTP requests through the modem's bearer and HTTP service.
//!
//! Every request opens bearer 1, initialises the HTTP service, sets the
//! parameters and starts the action. Cleanup always terminates the HTTP
//! service and closes the bearer, so a failed request never leaves the
//! packet session open.

use sim800_at_protocol::{
    decode_latin1, AtCommand, BearerStatus, HttpAction, HttpBody, HttpMethod, Terminator,
};
use tracing::{debug, info};

use crate::chain::{parse_step, ChainRunner, ChainStep};
use crate::command::Command;
use crate::error::{Sim800Error, Sim800Result, StepError};
use crate::session::Session;

/// Outcome of an HTTP request.
///
/// Status codes in the 600 range come from the modem itself (DNS failure,
/// network error, ...) and are reported here rather than as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Request method.
    pub method: HttpMethod,
    /// Server status, or a modem-side 6xx code.
    pub status_code: u16,
    /// Length announced in `+HTTPACTION`.
    pub content_length: usize,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn from_report(report: &HttpAction, body: Vec<u8>) -> Self {
        HttpResponse {
            method: report.method,
            status_code: report.status_code,
            content_length: report.body_length,
            body,
        }
    }

    /// A 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body as text, mapping bytes one-to-one onto Latin-1.
    pub fn body_text(&self) -> String {
        decode_latin1(&self.body)
    }
}

impl Session {
    /// `GET` a plain HTTP URL.
    pub fn http_get(&self, url: &str) -> Sim800Result<HttpResponse> {
        self.http_request(HttpMethod::Get, url, false, None)
    }

    /// `GET` an HTTPS URL with the modem's TLS stack enabled.
    pub fn https_get(&self, url: &str) -> Sim800Result<HttpResponse> {
        self.http_request(HttpMethod::Get, url, true, None)
    }

    /// `POST` `body` to a plain HTTP URL and return the server's answer.
    ///
    /// The SIM800 TLS stack cannot upload a body, so `https` URLs are
    /// refused with [`Sim800Error::Unsupported`] before anything is sent.
    pub fn http_post(&self, url: &str, body: &[u8]) -> Sim800Result<HttpResponse> {
        if url.trim_start().to_ascii_lowercase().starts_with("https://") {
            return Err(Sim800Error::Unsupported("HTTPS POST"));
        }
        self.http_request(HttpMethod::Post, url, false, Some(body))
    }

    fn http_request(
        &self,
        method: HttpMethod,
        url: &str,
        tls: bool,
        upload: Option<&[u8]>,
    ) -> Sim800Result<HttpResponse> {
        let config = &self.config;
        let policies = &config.policies;

        let bearer = [
            ChainStep::new(
                self.command(AtCommand::BearerSet {
                    param: "Contype",
                    value: "GPRS".into(),
                })?,
                policies.session_setup,
            ),
            ChainStep::new(
                self.command(AtCommand::BearerSet {
                    param: "APN",
                    value: config.apn.clone(),
                })?,
                policies.session_setup,
            ),
            self.fixed(AtCommand::BearerOpen, policies.bearer_open)?,
        ];
        let query = self.fixed(AtCommand::BearerQuery, policies.status_query)?;

        let mut setup = vec![
            self.fixed(AtCommand::HttpInit, policies.session_setup)?,
            self.fixed(AtCommand::HttpSsl(tls), policies.session_setup)?,
            self.fixed(
                AtCommand::HttpParam {
                    name: "CID",
                    value: "1".into(),
                    quoted: false,
                },
                policies.session_setup,
            )?,
        ];
        if !tls {
            setup.push(self.fixed(
                AtCommand::HttpParam {
                    name: "REDIR",
                    value: "0".into(),
                    quoted: false,
                },
                policies.session_setup,
            )?);
        }
        setup.push(ChainStep::new(
            self.command(AtCommand::HttpParam {
                name: "URL",
                value: url.trim().to_string(),
                quoted: true,
            })?,
            policies.session_setup,
        ));

        let mut transfer = Vec::new();
        if let Some(data) = upload {
            let announce = AtCommand::HttpData {
                length: data.len(),
                upload_timeout_ms: config.http_post_upload_timeout.as_millis() as u64,
            };
            transfer.push(ChainStep::new(self.command(announce)?, policies.data_transfer));
            transfer.push(ChainStep::new(
                Command::payload(
                    format!("<{} byte body>", data.len()),
                    data.to_vec(),
                    vec![Terminator::OK, Terminator::ERROR],
                    config.http_post_upload_timeout + config.read_timeout,
                ),
                policies.data_transfer,
            ));
        }

        let action = ChainStep::new(
            self.command_with_timeout(AtCommand::HttpAction(method), config.http_request_timeout)?,
            policies.data_transfer,
        );
        let read = self.fixed(AtCommand::HttpRead, policies.data_transfer)?;
        let cleanup = [
            self.command(AtCommand::HttpTerm)?,
            self.command(AtCommand::BearerClose)?,
        ];

        let chain = if tls { "https_request" } else { "http_request" };
        info!(%method, url, "http request");
        let output = self.transaction(chain, &cleanup, |tx| {
            for step in &bearer {
                tx.run(step)?;
            }
            if let Some(raw) = tx.run(&query)? {
                if let Ok(status) = BearerStatus::parse(&raw) {
                    debug!(status = status.status, ip = ?status.ip, "bearer status");
                }
            }
            for step in setup.iter().chain(&transfer) {
                tx.run(step)?;
            }

            let raw = tx.require(&action)?;
            let report = parse_step(&raw, HttpAction::parse)?;
            debug!(
                status = report.status_code,
                length = report.body_length,
                "http action reported"
            );
            if report.is_modem_error() || report.body_length == 0 {
                return Ok(HttpResponse::from_report(&report, Vec::new()));
            }
            read_body(tx, &read, &report)
        })?;

        let response = output.value;
        if let Some(reason) = modem_error_reason(response.status_code) {
            info!(status = response.status_code, reason, "request failed inside the modem");
        }
        Ok(response)
    }
}

fn read_body(
    tx: &mut ChainRunner<'_>,
    read: &ChainStep,
    report: &HttpAction,
) -> Result<HttpResponse, StepError> {
    let raw = tx.require(read)?;
    let body = parse_step(&raw, HttpBody::parse)?;
    Ok(HttpResponse::from_report(report, body.data))
}

fn modem_error_reason(status_code: u16) -> Option<&'static str> {
    HttpAction {
        method: HttpMethod::Get,
        status_code,
        body_length: 0,
    }
    .modem_error_description()
}

//! Plain and JSON rendering of operation results.

use std::fmt;

use serde::Serialize;
use sim800_modem::protocol::{HttpMethod, SignalQuality};
use sim800_modem::{HttpResponse, SessionState};

use crate::CliError;

/// Writes results to stdout, as JSON when requested.
pub(crate) struct Printer {
    json: bool,
}

impl Printer {
    pub(crate) fn new(json: bool) -> Self {
        Printer { json }
    }

    /// Print `value`, using `plain` for the human readable form.
    pub(crate) fn emit<T: Serialize>(&self, value: &T, plain: impl FnOnce(&T) -> String) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", plain(value));
        }
        Ok(())
    }

    pub(crate) fn state(&self, state: SessionState) -> Result<(), CliError> {
        self.emit(&serde_json::json!({ "state": state }), |_| format!("modem {}", state))
    }

    pub(crate) fn done(&self, message: &str) -> Result<(), CliError> {
        self.emit(&serde_json::json!({ "ok": true }), |_| message.to_string())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HttpReport {
    pub method: HttpMethod,
    pub status_code: u16,
    pub content_length: usize,
    pub body: String,
}

impl From<&HttpResponse> for HttpReport {
    fn from(response: &HttpResponse) -> Self {
        HttpReport {
            method: response.method,
            status_code: response.status_code,
            content_length: response.content_length,
            body: response.body_text(),
        }
    }
}

impl fmt::Display for HttpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.method, self.status_code, self.content_length)?;
        if !self.body.is_empty() {
            write!(f, "\n{}", self.body)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SignalReport {
    pub rssi: u8,
    pub ber: u8,
    pub dbm: Option<i32>,
}

impl From<SignalQuality> for SignalReport {
    fn from(quality: SignalQuality) -> Self {
        SignalReport {
            rssi: quality.rssi,
            ber: quality.ber,
            dbm: quality.dbm(),
        }
    }
}

impl fmt::Display for SignalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dbm {
            Some(dbm) => write!(f, "rssi {} ({} dBm), ber {}", self.rssi, dbm, self.ber),
            None => write!(f, "rssi {} (not detectable), ber {}", self.rssi, self.ber),
        }
    }
}

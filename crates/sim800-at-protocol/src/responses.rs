//! Response capture and parsing.
//!
//! A [`RawResponse`] holds every line received between writing a command and
//! its terminator. The parsers below pull structured data out of it by
//! pattern, never by position, because unsolicited result codes can be
//! interleaved anywhere and the echo may or may not be present.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::Serialize;

use crate::commands::HttpMethod;
use crate::error::{ProtocolError, ProtocolResult};
use crate::urc::{is_unsolicited, Urc};

/// Extended error reports, followed by a code or text.
const EXTENDED_ERRORS: &[&str] = &["+CME ERROR", "+CMS ERROR"];

/// Final result codes that carry no information of their own.
const FINAL_RESULT_CODES: &[&str] = &[
    "OK",
    "ERROR",
    "SEND OK",
    "SEND FAIL",
    "CLOSE OK",
    "SHUT OK",
    "CONNECT OK",
    "CONNECT FAIL",
    "ALREADY CONNECT",
    "DOWNLOAD",
];

fn is_final_result_code(line: &str) -> bool {
    FINAL_RESULT_CODES.contains(&line) || EXTENDED_ERRORS.iter().any(|code| line.starts_with(code))
}

/// Lines captured for one command exchange.
///
/// Commands with a counted payload (`AT+HTTPREAD`) also carry the payload
/// bytes, read by length rather than as lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    command: String,
    lines: Vec<String>,
    payload: Option<Vec<u8>>,
}

impl RawResponse {
    /// Create a response for `command` from captured lines.
    pub fn new(command: impl Into<String>, lines: Vec<String>) -> Self {
        RawResponse {
            command: command.into(),
            lines,
            payload: None,
        }
    }

    /// Attach a counted payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The counted payload, if the command has one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// The command text that produced this response.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// All captured lines, in arrival order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consume the response, returning its lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Unsolicited result codes that arrived during the exchange.
    pub fn unsolicited(&self) -> impl Iterator<Item = Urc> + '_ {
        self.lines.iter().filter_map(|line| Urc::parse(line))
    }

    fn is_echo(&self, line: &str) -> bool {
        !self.command.is_empty() && line == self.command.trim()
    }

    /// Lines carrying information: blanks, echo, URCs and final result codes
    /// are dropped.
    pub fn information_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .filter(|line| !self.is_echo(line))
            .filter(|line| !is_unsolicited(line))
            .filter(|line| !is_final_result_code(line))
            .collect()
    }

    /// Position of the first non-URC line starting with `prefix`.
    fn position_of(&self, prefix: &str) -> Option<usize> {
        self.lines.iter().position(|line| {
            let line = line.trim();
            line.starts_with(prefix) && !is_unsolicited(line)
        })
    }

    /// The text following `prefix` on the first line that starts with it.
    pub fn find_prefixed(&self, prefix: &str) -> Option<&str> {
        let index = self.position_of(prefix)?;
        Some(self.lines[index].trim()[prefix.len()..].trim())
    }

    /// Index of the last bare `OK` line.
    fn final_ok(&self) -> Option<usize> {
        self.lines.iter().rposition(|line| line.trim() == "OK")
    }

    fn missing(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            command: self.command.clone(),
            field,
        }
    }

    fn number<T: std::str::FromStr>(&self, field: &'static str, value: &str) -> ProtocolResult<T> {
        value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidNumber {
                command: self.command.clone(),
                field,
                value: value.trim().to_string(),
            })
    }

    fn malformed(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::Malformed {
            command: self.command.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.lines.join("\\r\\n"))
    }
}

/// Split a comma separated parameter list, honouring double quotes.
pub fn split_params(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

// ============================================================================
// Error codes
// ============================================================================

/// The error a failure terminator reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// Plain `ERROR`.
    Error,
    /// `+CME ERROR: <n>` (equipment error).
    Cme(u16),
    /// `+CMS ERROR: <n>` (message service error).
    Cms(u16),
    /// Any other failure line (`CONNECT FAIL`, `SEND FAIL`, verbose CME text).
    Other(String),
}

impl ErrorCode {
    /// Classify the line that matched a failure terminator.
    pub fn from_line(line: &str) -> ErrorCode {
        let line = line.trim();
        if line == "ERROR" {
            return ErrorCode::Error;
        }
        if let Some(rest) = line.strip_prefix("+CME ERROR:") {
            if let Ok(code) = rest.trim().parse() {
                return ErrorCode::Cme(code);
            }
        }
        if let Some(rest) = line.strip_prefix("+CMS ERROR:") {
            if let Ok(code) = rest.trim().parse() {
                return ErrorCode::Cms(code);
            }
        }
        ErrorCode::Other(line.to_string())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Error => f.write_str("ERROR"),
            ErrorCode::Cme(code) => write!(f, "+CME ERROR: {}", code),
            ErrorCode::Cms(code) => write!(f, "+CMS ERROR: {}", code),
            ErrorCode::Other(text) => f.write_str(text),
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Result of `AT+HTTPACTION`, reported through `+HTTPACTION: <m>,<status>,<len>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HttpAction {
    /// Request method.
    pub method: HttpMethod,
    /// HTTP status, or a 6xx code for failures inside the modem.
    pub status_code: u16,
    /// Bytes available through `AT+HTTPREAD`.
    pub body_length: usize,
}

impl HttpAction {
    /// Parse the `+HTTPACTION:` report.
    ///
    /// Modem-side failures (`603` DNS error, `601` network error, ...) parse
    /// successfully; check [`HttpAction::is_modem_error`].
    pub fn parse(raw: &RawResponse) -> ProtocolResult<HttpAction> {
        let report = raw
            .find_prefixed("+HTTPACTION:")
            .ok_or_else(|| raw.missing("+HTTPACTION status"))?;
        let fields: Vec<&str> = report.split(',').collect();
        if fields.len() < 3 {
            return Err(raw.malformed(format!(
                "expected 3 fields in +HTTPACTION, got {}: {}",
                fields.len(),
                report
            )));
        }
        let code: u8 = raw.number("method", fields[0])?;
        let method = HttpMethod::from_code(code)
            .ok_or_else(|| raw.malformed(format!("unknown method code {}", code)))?;
        let status_code = raw.number("status code", fields[1])?;
        let body_length = raw.number("body length", fields[2])?;
        Ok(HttpAction {
            method,
            status_code,
            body_length,
        })
    }

    /// A 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// A 6xx status, raised by the modem rather than the server.
    pub fn is_modem_error(&self) -> bool {
        (600..700).contains(&self.status_code)
    }

    /// Description of modem-side status codes.
    pub fn modem_error_description(&self) -> Option<&'static str> {
        match self.status_code {
            600 => Some("not HTTP PDU"),
            601 => Some("network error"),
            602 => Some("no memory"),
            603 => Some("DNS error"),
            604 => Some("stack busy"),
            _ => None,
        }
    }
}

/// Body returned by `AT+HTTPREAD`: `+HTTPREAD: <len>`, the data, then `OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBody {
    /// Length announced by the modem.
    pub declared_length: usize,
    /// Body bytes.
    pub data: Vec<u8>,
}

impl HttpBody {
    /// Parse an `AT+HTTPREAD` response.
    ///
    /// The body is the counted payload captured after the header, byte for
    /// byte; its lines are never inspected.
    pub fn parse(raw: &RawResponse) -> ProtocolResult<HttpBody> {
        let header = raw
            .position_of("+HTTPREAD:")
            .ok_or_else(|| raw.missing("+HTTPREAD length"))?;
        let declared_length: usize = raw.number(
            "body length",
            raw.lines[header].trim()["+HTTPREAD:".len()..].trim(),
        )?;
        let data = raw
            .payload()
            .ok_or_else(|| raw.malformed("no body captured after +HTTPREAD"))?;
        if data.len() != declared_length {
            return Err(raw.malformed(format!(
                "+HTTPREAD announced {} bytes but {} were captured",
                declared_length,
                data.len()
            )));
        }
        raw.final_ok()
            .filter(|&end| end > header)
            .ok_or_else(|| raw.malformed("body not followed by OK"))?;
        Ok(HttpBody {
            declared_length,
            data: data.to_vec(),
        })
    }
}

/// Bearer state reported by `AT+SAPBR=2,1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BearerStatus {
    /// Bearer profile id.
    pub cid: u8,
    /// 0 connecting, 1 connected, 2 closing, 3 closed.
    pub status: u8,
    /// Address assigned to the bearer.
    pub ip: Option<Ipv4Addr>,
}

impl BearerStatus {
    /// Parse `+SAPBR: <cid>,<status>,"<ip>"`.
    pub fn parse(raw: &RawResponse) -> ProtocolResult<BearerStatus> {
        let report = raw
            .find_prefixed("+SAPBR:")
            .ok_or_else(|| raw.missing("+SAPBR status"))?;
        let fields = split_params(report);
        if fields.len() < 2 {
            return Err(raw.malformed(format!("short +SAPBR report: {}", report)));
        }
        Ok(BearerStatus {
            cid: raw.number("cid", &fields[0])?,
            status: raw.number("bearer status", &fields[1])?,
            ip: fields.get(2).and_then(|ip| ip.parse().ok()),
        })
    }

    /// Whether the bearer is up.
    pub fn is_connected(&self) -> bool {
        self.status == 1
    }
}

// ============================================================================
// TCP / network
// ============================================================================

/// Confirmation of a `AT+CIPSEND` transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpSendReport {
    /// Bytes accepted by the modem.
    pub bytes_sent: usize,
}

impl TcpSendReport {
    /// Parse the response to the payload write.
    ///
    /// Normal mode answers `SEND OK`; quick-send mode answers
    /// `DATA ACCEPT:<n>` with the accepted length.
    pub fn parse(raw: &RawResponse, expected: usize) -> ProtocolResult<TcpSendReport> {
        if let Some(accepted) = raw.find_prefixed("DATA ACCEPT:") {
            let count = accepted.rsplit(',').next().unwrap_or(accepted);
            return Ok(TcpSendReport {
                bytes_sent: raw.number("accepted length", count)?,
            });
        }
        if raw.position_of("SEND OK").is_some() {
            return Ok(TcpSendReport {
                bytes_sent: expected,
            });
        }
        Err(raw.missing("SEND OK"))
    }
}

/// Parse the address printed by `AT+CIFSR`.
pub fn parse_local_ip(raw: &RawResponse) -> ProtocolResult<Ipv4Addr> {
    raw.information_lines()
        .into_iter()
        .find_map(|line| line.parse().ok())
        .ok_or_else(|| raw.missing("IPv4 address"))
}

/// Parse `+CGATT: <state>`.
pub fn parse_gprs_attached(raw: &RawResponse) -> ProtocolResult<bool> {
    let state = raw
        .find_prefixed("+CGATT:")
        .ok_or_else(|| raw.missing("+CGATT state"))?;
    let state: u8 = raw.number("attach state", state)?;
    Ok(state == 1)
}

/// Signal quality reported by `AT+CSQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalQuality {
    /// RSSI index: 0..=31, or 99 when unknown.
    pub rssi: u8,
    /// Bit error rate index: 0..=7, or 99 when unknown.
    pub ber: u8,
}

impl SignalQuality {
    /// Parse `+CSQ: <rssi>,<ber>`.
    pub fn parse(raw: &RawResponse) -> ProtocolResult<SignalQuality> {
        let report = raw
            .find_prefixed("+CSQ:")
            .ok_or_else(|| raw.missing("+CSQ report"))?;
        let (rssi, ber) = report
            .split_once(',')
            .ok_or_else(|| raw.malformed(format!("expected <rssi>,<ber>: {}", report)))?;
        Ok(SignalQuality {
            rssi: raw.number("rssi", rssi)?,
            ber: raw.number("ber", ber)?,
        })
    }

    /// Received signal strength in dBm, `None` when not detectable.
    ///
    /// 0 is -115 dBm or less, 1 is -111 dBm, 2..=30 span -110..=-54 dBm and
    /// 31 is -52 dBm or greater.
    pub fn dbm(&self) -> Option<i32> {
        match self.rssi {
            0 => Some(-115),
            1 => Some(-111),
            v @ 2..=30 => Some(-110 + (i32::from(v) - 2) * 2),
            31 => Some(-52),
            _ => None,
        }
    }
}

// ============================================================================
// SMS
// ============================================================================

/// A stored text message read with `AT+CMGR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsMessage {
    /// Storage status (`REC UNREAD`, `REC READ`, ...).
    pub status: String,
    /// Originating address.
    pub sender: String,
    /// Service centre time stamp.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Message text.
    pub text: String,
}

impl SmsMessage {
    /// Parse an `AT+CMGR` response in text mode.
    ///
    /// An empty storage slot is answered with a bare `OK`; that yields
    /// `Ok(None)`.
    pub fn parse(raw: &RawResponse) -> ProtocolResult<Option<SmsMessage>> {
        let Some(header) = raw.position_of("+CMGR:") else {
            return if raw.information_lines().is_empty() {
                Ok(None)
            } else {
                Err(raw.missing("+CMGR header"))
            };
        };
        let fields = split_params(raw.lines[header].trim()["+CMGR:".len()..].trim());
        if fields.len() < 2 {
            return Err(raw.malformed(format!("short +CMGR header: {:?}", fields)));
        }
        let timestamp = fields
            .iter()
            .skip(2)
            .find_map(|field| parse_sms_timestamp(field));

        let end = raw
            .final_ok()
            .filter(|&end| end > header)
            .ok_or_else(|| raw.malformed("message text not followed by OK"))?;
        let mut text_lines: Vec<&str> = raw.lines[header + 1..end]
            .iter()
            .map(String::as_str)
            .collect();
        while text_lines.last().is_some_and(|line| line.trim().is_empty()) {
            text_lines.pop();
        }

        Ok(Some(SmsMessage {
            status: fields[0].clone(),
            sender: fields[1].clone(),
            timestamp,
            text: text_lines.join("\n"),
        }))
    }
}

/// Parse a service centre time stamp: `yy/MM/dd,hh:mm:ss±zz`, where the zone
/// is given in quarter hours.
pub fn parse_sms_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim().trim_matches('"');
    let (date, time) = text.split_once(',')?;
    let mut date = date.split('/').map(|p| p.parse::<u32>().ok());
    let (year, month, day) = (date.next()??, date.next()??, date.next()??);

    let zone_at = time.rfind(&['+', '-'][..])?;
    let (clock, zone) = time.split_at(zone_at);
    let quarters: i32 = zone.parse().ok()?;
    let mut clock = clock.split(':').map(|p| p.parse::<u32>().ok());
    let (hour, minute, second) = (clock.next()??, clock.next()??, clock.next()??);

    let naive = NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?
        .and_hms_opt(hour, minute, second)?;
    let offset = FixedOffset::east_opt(quarters * 15 * 60)?;
    offset.from_local_datetime(&naive).single()
}

/// Message reference returned by `AT+CMGS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmsSubmitReport {
    /// Message reference assigned by the modem.
    pub reference: u8,
}

impl SmsSubmitReport {
    /// Parse `+CMGS: <mr>`.
    pub fn parse(raw: &RawResponse) -> ProtocolResult<SmsSubmitReport> {
        let reference = raw
            .find_prefixed("+CMGS:")
            .ok_or_else(|| raw.missing("+CMGS reference"))?;
        Ok(SmsSubmitReport {
            reference: raw.number("message reference", reference)?,
        })
    }
}

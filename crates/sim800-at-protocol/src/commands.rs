//! Commands that can be sent to the modem, and the terminators that end
//! their responses.
//!
//! The command set covers the families the session layer drives:
//! - General: `AT`, `ATZ`, `AT+CSQ`
//! - Packet service and TCP/IP stack: `AT+CGATT`, `AT+CSTT`, `AT+CIICR`, `AT+CIP...`
//! - Bearer and HTTP service: `AT+SAPBR`, `AT+HTTP...`
//! - SMS in text mode: `AT+CMGF`, `AT+CMGR`, `AT+CMGS`, `AT+CMGDA`

use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::codec::{encode_latin1, LineCodec};
use crate::error::{ProtocolError, ProtocolResult};

/// Largest payload accepted by `AT+CIPSEND=<len>` in normal mode.
pub const MAX_TCP_SEND_LENGTH: usize = 1460;

/// Largest body accepted by `AT+HTTPDATA`.
pub const MAX_HTTP_DATA_LENGTH: usize = 319_488;

/// Whether a terminator denotes success or failure of the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminatorClass {
    /// The command completed.
    Success,
    /// The command was rejected or failed.
    Failure,
}

/// How a terminator is recognised in the response stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// A complete line equal to the given text.
    Exact(Cow<'static, str>),
    /// A complete line starting with the given text.
    Line(Cow<'static, str>),
    /// Text at the start of the unterminated tail (or of a complete line).
    /// Used for data-entry prompts which have no line ending.
    Prompt(Cow<'static, str>),
    /// A complete line holding a dotted IPv4 address (`AT+CIFSR`).
    Ipv4Address,
}

/// A response line that ends a command exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Terminator {
    /// How the terminator is matched.
    pub pattern: Pattern,
    /// Success or failure.
    pub class: TerminatorClass,
}

impl Terminator {
    /// `OK` on a line of its own.
    pub const OK: Terminator = Terminator {
        pattern: Pattern::Exact(Cow::Borrowed("OK")),
        class: TerminatorClass::Success,
    };
    /// `ERROR` on a line of its own.
    pub const ERROR: Terminator = Terminator {
        pattern: Pattern::Exact(Cow::Borrowed("ERROR")),
        class: TerminatorClass::Failure,
    };
    /// `+CME ERROR: <n>`
    pub const CME_ERROR: Terminator = Terminator::failure("+CME ERROR");
    /// `+CMS ERROR: <n>`
    pub const CMS_ERROR: Terminator = Terminator::failure("+CMS ERROR");
    /// The `> ` data prompt.
    pub const DATA_PROMPT: Terminator = Terminator {
        pattern: Pattern::Prompt(Cow::Borrowed(">")),
        class: TerminatorClass::Success,
    };

    /// A success terminator matching lines that start with `text`.
    pub const fn success(text: &'static str) -> Self {
        Terminator {
            pattern: Pattern::Line(Cow::Borrowed(text)),
            class: TerminatorClass::Success,
        }
    }

    /// A failure terminator matching lines that start with `text`.
    pub const fn failure(text: &'static str) -> Self {
        Terminator {
            pattern: Pattern::Line(Cow::Borrowed(text)),
            class: TerminatorClass::Failure,
        }
    }

    /// Whether this terminator denotes success.
    pub fn is_success(&self) -> bool {
        self.class == TerminatorClass::Success
    }

    /// Check a complete response line against this terminator.
    pub fn matches_line(&self, line: &str) -> bool {
        let line = line.trim();
        match &self.pattern {
            Pattern::Exact(text) => line == text.as_ref(),
            Pattern::Line(prefix) | Pattern::Prompt(prefix) => line.starts_with(prefix.as_ref()),
            Pattern::Ipv4Address => line.parse::<Ipv4Addr>().is_ok(),
        }
    }

    /// Check the unterminated tail of the receive buffer.
    ///
    /// Only prompts can match here; everything else needs a full line.
    pub fn matches_partial(&self, tail: &str) -> bool {
        match &self.pattern {
            Pattern::Prompt(prefix) => tail.trim_start().starts_with(prefix.as_ref()),
            _ => false,
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pattern {
            Pattern::Exact(text) | Pattern::Line(text) | Pattern::Prompt(text) => f.write_str(text),
            Pattern::Ipv4Address => f.write_str("<ipv4>"),
        }
    }
}

/// The generic final result codes: `OK`, `ERROR`, `+CME ERROR`, `+CMS ERROR`.
pub fn standard_terminators() -> Vec<Terminator> {
    vec![
        Terminator::OK,
        Terminator::ERROR,
        Terminator::CME_ERROR,
        Terminator::CMS_ERROR,
    ]
}

/// Failure terminators shared by every command.
fn failures() -> [Terminator; 3] {
    [Terminator::ERROR, Terminator::CME_ERROR, Terminator::CMS_ERROR]
}

fn with_failures(success: &[Terminator]) -> Vec<Terminator> {
    let mut set = success.to_vec();
    set.extend(failures());
    set
}

/// A response carrying a counted payload: a header line `<header> <len>`,
/// exactly `len` raw bytes, then a final result code.
///
/// The payload may contain anything, including lines that look like
/// result codes, so it is read by length and never split into lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountedPayload {
    /// Prefix of the header line, such as `+HTTPREAD:`.
    pub header: &'static str,
}

impl CountedPayload {
    /// The terminator that ends the header phase.
    pub fn header_terminator(&self) -> Terminator {
        Terminator::success(self.header)
    }

    /// Payload length announced by a header line.
    pub fn length(&self, line: &str) -> Option<usize> {
        line.trim()
            .strip_prefix(self.header)?
            .trim()
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    }
}

/// HTTP methods supported by `AT+HTTPACTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `AT+HTTPACTION=0`
    Get,
    /// `AT+HTTPACTION=1`
    Post,
    /// `AT+HTTPACTION=2`
    Head,
}

impl HttpMethod {
    /// The numeric code used by `AT+HTTPACTION`.
    pub fn code(&self) -> u8 {
        match self {
            HttpMethod::Get => 0,
            HttpMethod::Post => 1,
            HttpMethod::Head => 2,
        }
    }

    /// Parse the numeric method code.
    pub fn from_code(code: u8) -> Option<HttpMethod> {
        match code {
            0 => Some(HttpMethod::Get),
            1 => Some(HttpMethod::Post),
            2 => Some(HttpMethod::Head),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
            HttpMethod::Head => f.write_str("HEAD"),
        }
    }
}

/// Commands understood by the SIM800 AT interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum AtCommand {
    // ========== General ==========
    /// Attention; used to poll for readiness.
    Test,

    /// Restore the user profile (`ATZ`).
    ResetProfile,

    /// Signal quality report (`AT+CSQ`).
    SignalQuality,

    // ========== Packet service / TCP stack ==========
    /// Query packet service attach state (`AT+CGATT?`).
    GprsStatus,

    /// Attach to or detach from the packet service.
    GprsAttach(bool),

    /// Select normal (non-transparent) mode (`AT+CIPMODE=0`).
    NormalIpMode,

    /// Set the access point name for the TCP/IP stack.
    SetApn {
        /// Carrier access point name.
        apn: String,
    },

    /// Bring up the wireless connection (`AT+CIICR`).
    BringUpWireless,

    /// Local IP address (`AT+CIFSR`).
    LocalIp,

    /// Open a TCP connection.
    TcpStart {
        /// Remote host name or address.
        host: String,
        /// Remote port.
        port: u16,
    },

    /// Announce `length` bytes of payload (`AT+CIPSEND=<len>`).
    TcpSend {
        /// Payload length.
        length: usize,
    },

    /// Close the TCP connection.
    TcpClose,

    /// Deactivate the PDP context (`AT+CIPSHUT`).
    PdpShutdown,

    // ========== Bearer / HTTP ==========
    /// Set a bearer parameter (`AT+SAPBR=3,1,"<param>","<value>"`).
    BearerSet {
        /// Parameter name (`Contype`, `APN`, ...).
        param: &'static str,
        /// Parameter value.
        value: String,
    },

    /// Open bearer 1.
    BearerOpen,

    /// Query bearer 1.
    BearerQuery,

    /// Close bearer 1.
    BearerClose,

    /// Initialise the HTTP service.
    HttpInit,

    /// Terminate the HTTP service.
    HttpTerm,

    /// Enable or disable TLS for the HTTP service.
    HttpSsl(bool),

    /// Set an HTTP parameter (`AT+HTTPPARA="<name>",<value>`).
    HttpParam {
        /// Parameter name (`CID`, `URL`, `REDIR`, ...).
        name: &'static str,
        /// Value; written quoted when `quoted` is set.
        value: String,
        /// Quote the value.
        quoted: bool,
    },

    /// Announce a request body (`AT+HTTPDATA=<len>,<ms>`).
    HttpData {
        /// Body length.
        length: usize,
        /// Upload window the modem waits for the body, in milliseconds.
        upload_timeout_ms: u64,
    },

    /// Start an HTTP request.
    HttpAction(HttpMethod),

    /// Read the response body.
    HttpRead,

    /// HTTP session status (`AT+HTTPSTATUS?`).
    HttpStatus,

    // ========== SMS ==========
    /// Select SMS text mode (`AT+CMGF=1`).
    SmsTextMode,

    /// Read the message at `index`.
    SmsRead {
        /// Storage index.
        index: u16,
    },

    /// Start sending a message to `number`; answered with a `> ` prompt.
    SmsSend {
        /// Destination number.
        number: String,
    },

    /// Delete every stored message (`AT+CMGDA="DEL ALL"`).
    SmsDeleteAll,

    /// Raw command text.
    Raw(String),
}

impl AtCommand {
    /// Convert to the command line (without the delimiter).
    pub fn to_command_string(&self) -> String {
        match self {
            AtCommand::Test => "AT".to_string(),
            AtCommand::ResetProfile => "ATZ".to_string(),
            AtCommand::SignalQuality => "AT+CSQ".to_string(),

            AtCommand::GprsStatus => "AT+CGATT?".to_string(),
            AtCommand::GprsAttach(attach) => format!("AT+CGATT={}", u8::from(*attach)),
            AtCommand::NormalIpMode => "AT+CIPMODE=0".to_string(),
            AtCommand::SetApn { apn } => format!("AT+CSTT=\"{}\"", apn),
            AtCommand::BringUpWireless => "AT+CIICR".to_string(),
            AtCommand::LocalIp => "AT+CIFSR".to_string(),
            AtCommand::TcpStart { host, port } => {
                format!("AT+CIPSTART=\"TCP\",\"{}\",{}", host, port)
            }
            AtCommand::TcpSend { length } => format!("AT+CIPSEND={}", length),
            AtCommand::TcpClose => "AT+CIPCLOSE".to_string(),
            AtCommand::PdpShutdown => "AT+CIPSHUT".to_string(),

            AtCommand::BearerSet { param, value } => {
                format!("AT+SAPBR=3,1,\"{}\",\"{}\"", param, value)
            }
            AtCommand::BearerOpen => "AT+SAPBR=1,1".to_string(),
            AtCommand::BearerQuery => "AT+SAPBR=2,1".to_string(),
            AtCommand::BearerClose => "AT+SAPBR=0,1".to_string(),
            AtCommand::HttpInit => "AT+HTTPINIT".to_string(),
            AtCommand::HttpTerm => "AT+HTTPTERM".to_string(),
            AtCommand::HttpSsl(enabled) => format!("AT+HTTPSSL={}", u8::from(*enabled)),
            AtCommand::HttpParam {
                name,
                value,
                quoted,
            } => {
                if *quoted {
                    format!("AT+HTTPPARA=\"{}\",\"{}\"", name, value)
                } else {
                    format!("AT+HTTPPARA=\"{}\",{}", name, value)
                }
            }
            AtCommand::HttpData {
                length,
                upload_timeout_ms,
            } => format!("AT+HTTPDATA={},{}", length, upload_timeout_ms),
            AtCommand::HttpAction(method) => format!("AT+HTTPACTION={}", method.code()),
            AtCommand::HttpRead => "AT+HTTPREAD".to_string(),
            AtCommand::HttpStatus => "AT+HTTPSTATUS?".to_string(),

            AtCommand::SmsTextMode => "AT+CMGF=1".to_string(),
            AtCommand::SmsRead { index } => format!("AT+CMGR={}", index),
            AtCommand::SmsSend { number } => format!("AT+CMGS=\"{}\"", number),
            AtCommand::SmsDeleteAll => "AT+CMGDA=\"DEL ALL\"".to_string(),

            AtCommand::Raw(text) => text.clone(),
        }
    }

    /// Encode the command for transmission.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        LineCodec::encode_command(&self.to_command_string())
    }

    /// The counted payload this command's response carries, if any.
    ///
    /// For these commands [`AtCommand::terminators`] ends the header phase;
    /// the payload and the final result code are read afterwards.
    pub fn counted_payload(&self) -> Option<CountedPayload> {
        match self {
            AtCommand::HttpRead => Some(CountedPayload {
                header: "+HTTPREAD:",
            }),
            _ => None,
        }
    }

    /// The terminators that end this command's response.
    pub fn terminators(&self) -> Vec<Terminator> {
        match self {
            AtCommand::LocalIp => with_failures(&[Terminator {
                pattern: Pattern::Ipv4Address,
                class: TerminatorClass::Success,
            }]),
            AtCommand::TcpStart { .. } => {
                let mut set = with_failures(&[
                    Terminator::success("CONNECT OK"),
                    Terminator::success("ALREADY CONNECT"),
                ]);
                set.push(Terminator::failure("CONNECT FAIL"));
                set
            }
            AtCommand::TcpSend { .. } | AtCommand::SmsSend { .. } => {
                with_failures(&[Terminator::DATA_PROMPT])
            }
            AtCommand::TcpClose => with_failures(&[Terminator::success("CLOSE OK")]),
            AtCommand::PdpShutdown => with_failures(&[Terminator::success("SHUT OK")]),
            AtCommand::HttpData { .. } => with_failures(&[Terminator::success("DOWNLOAD")]),
            AtCommand::HttpAction(_) => with_failures(&[Terminator::success("+HTTPACTION:")]),
            _ => match self.counted_payload() {
                Some(counted) => with_failures(&[counted.header_terminator()]),
                None => standard_terminators(),
            },
        }
    }

    /// Check that user supplied arguments can be expressed on the command line.
    ///
    /// AT string parameters cannot escape `"`, control characters would end
    /// the line early, and the link only carries Latin-1.
    pub fn validate(&self) -> ProtocolResult<()> {
        encode_latin1(&self.to_command_string())?;
        let quoted: Option<(&str, &str)> = match self {
            AtCommand::SetApn { apn } => Some(("apn", apn)),
            AtCommand::TcpStart { host, .. } => Some(("host", host)),
            AtCommand::BearerSet { value, .. } => Some(("bearer value", value)),
            AtCommand::HttpParam { value, .. } => Some(("http parameter", value)),
            AtCommand::SmsSend { number } => Some(("number", number)),
            _ => None,
        };
        if let Some((what, value)) = quoted {
            if value.is_empty() {
                return Err(ProtocolError::InvalidCommand(format!("empty {}", what)));
            }
            if value.chars().any(|c| c == '"' || c.is_control()) {
                return Err(ProtocolError::InvalidCommand(format!(
                    "{} contains a quote or control character: {:?}",
                    what, value
                )));
            }
        }
        match self {
            AtCommand::TcpSend { length } if *length == 0 || *length > MAX_TCP_SEND_LENGTH => {
                Err(ProtocolError::BufferOverflow {
                    max: MAX_TCP_SEND_LENGTH,
                    actual: *length,
                })
            }
            AtCommand::HttpData { length, .. } if *length > MAX_HTTP_DATA_LENGTH => {
                Err(ProtocolError::BufferOverflow {
                    max: MAX_HTTP_DATA_LENGTH,
                    actual: *length,
                })
            }
            _ => {
                let len = self.to_command_string().len();
                if len > crate::codec::MAX_COMMAND_LENGTH {
                    Err(ProtocolError::BufferOverflow {
                        max: crate::codec::MAX_COMMAND_LENGTH,
                        actual: len,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}

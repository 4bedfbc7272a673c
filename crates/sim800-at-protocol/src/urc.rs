//! Unsolicited result codes.
//!
//! The modem emits these whenever something happens on its side, so they can
//! land before, inside or after the response of any command. Parsers skip
//! them by pattern; the session keeps them for diagnostics and for boot
//! monitoring.

/// A recognised unsolicited result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    /// Module finished powering up (`RDY`).
    Ready,
    /// Functionality level report (`+CFUN: 1`).
    Functionality(u8),
    /// SIM status (`+CPIN: READY`).
    PinStatus(String),
    /// Voice call subsystem ready.
    CallReady,
    /// SMS subsystem ready.
    SmsReady,
    /// New message stored (`+CMTI: "SM",3`).
    NewMessage {
        /// Storage name.
        storage: String,
        /// Storage index.
        index: u16,
    },
    /// Incoming call.
    Ring,
    /// Caller id (`+CLIP: ...`).
    CallerId(String),
    /// TCP connection closed by the peer.
    Closed,
    /// PDP context deactivated by the network.
    PdpDeactivated,
    /// Supply voltage warning or shutdown.
    Voltage(String),
    /// Module powering down.
    PowerDown,
}

impl Urc {
    /// Try to recognise a line as an unsolicited result code.
    pub fn parse(line: &str) -> Option<Urc> {
        let line = line.trim();
        match line {
            "RDY" => return Some(Urc::Ready),
            "Call Ready" => return Some(Urc::CallReady),
            "SMS Ready" => return Some(Urc::SmsReady),
            "RING" => return Some(Urc::Ring),
            "CLOSED" => return Some(Urc::Closed),
            "+PDP: DEACT" => return Some(Urc::PdpDeactivated),
            "NORMAL POWER DOWN" => return Some(Urc::PowerDown),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("+CFUN: ") {
            return rest.trim().parse().ok().map(Urc::Functionality);
        }
        if let Some(rest) = line.strip_prefix("+CPIN: ") {
            return Some(Urc::PinStatus(rest.trim().to_string()));
        }
        if let Some(rest) = line.strip_prefix("+CMTI: ") {
            let (storage, index) = rest.split_once(',')?;
            return Some(Urc::NewMessage {
                storage: storage.trim().trim_matches('"').to_string(),
                index: index.trim().parse().ok()?,
            });
        }
        if let Some(rest) = line.strip_prefix("+CLIP: ") {
            return Some(Urc::CallerId(rest.to_string()));
        }
        if line.starts_with("UNDER-VOLTAGE") || line.starts_with("OVER-VOLTAGE") {
            return Some(Urc::Voltage(line.to_string()));
        }
        None
    }
}

/// Whether a line is an unsolicited result code.
pub fn is_unsolicited(line: &str) -> bool {
    Urc::parse(line).is_some()
}

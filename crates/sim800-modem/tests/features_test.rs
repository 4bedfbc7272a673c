//! Integration tests for the HTTP, TCP, SMS and network operations.

mod common;

use std::net::Ipv4Addr;

use common::{ready_session, ScriptedModem};
use sim800_modem::protocol::{decode_latin1, HttpMethod, ProtocolError};
use sim800_modem::{ChainError, Sim800Error, SessionState, StepError};

/// Index of the first write starting with `prefix`, failing the test if absent.
fn at(modem: &ScriptedModem, prefix: &str) -> usize {
    modem
        .position(prefix)
        .unwrap_or_else(|| panic!("{} never written: {:?}", prefix, modem.written()))
}

// ============================================================================
// HTTP
// ============================================================================

fn http_modem(action: &[&str]) -> ScriptedModem {
    let modem = ScriptedModem::new();
    modem
        .on("AT+SAPBR=2,1", &["+SAPBR: 1,1,\"10.52.7.1\"", "OK"])
        .on("AT+HTTPACTION", action)
        .on("AT+HTTPREAD", &["+HTTPREAD: 5", "hello", "OK"]);
    modem
}

#[test]
fn test_http_get_reads_body() {
    let modem = http_modem(&["OK", "+HTTPACTION: 0,200,5"]);
    let session = ready_session(&modem);

    let response = session.http_get("http://example.com/").unwrap();
    assert_eq!(response.method, HttpMethod::Get);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.content_length, 5);
    assert_eq!(response.body_text(), "hello");
    assert!(response.is_success());

    assert!(at(&modem, "AT+SAPBR=3,1,\"Contype\",\"GPRS\"") < at(&modem, "AT+SAPBR=1,1"));
    assert!(at(&modem, "AT+HTTPINIT") < at(&modem, "AT+HTTPPARA=\"URL\""));
    assert_eq!(modem.count("AT+HTTPSSL=0"), 1);
    assert_eq!(modem.count("AT+HTTPPARA=\"REDIR\",0"), 1);
    assert_eq!(modem.count("AT+HTTPPARA=\"URL\",\"http://example.com/\""), 1);

    let written = modem.written();
    assert_eq!(&written[written.len() - 2..], ["AT+HTTPTERM", "AT+SAPBR=0,1"]);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_https_get_enables_tls_without_redirect_param() {
    let modem = http_modem(&["OK", "+HTTPACTION: 0,200,5"]);
    let session = ready_session(&modem);

    let response = session.https_get("https://example.com/").unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(modem.count("AT+HTTPSSL=1"), 1);
    assert_eq!(modem.count("AT+HTTPPARA=\"REDIR\""), 0);
}

#[test]
fn test_http_modem_error_status_skips_read() {
    let modem = http_modem(&["OK", "+HTTPACTION: 0,603,0"]);
    let session = ready_session(&modem);

    let response = session.http_get("http://no-such-host.invalid/").unwrap();
    assert_eq!(response.status_code, 603);
    assert!(response.body.is_empty());
    assert!(!response.is_success());
    assert_eq!(modem.count("AT+HTTPREAD"), 0);
    assert_eq!(modem.count("AT+HTTPTERM"), 1);
}

#[test]
fn test_http_post_uploads_body() {
    let modem = http_modem(&["OK", "+HTTPACTION: 1,201,5"]);
    modem
        .on("AT+HTTPDATA=", &["DOWNLOAD"])
        .on("{\"t\":21}", &["OK"]);
    let session = ready_session(&modem);

    let response = session
        .http_post("http://example.com/readings", b"{\"t\":21}")
        .unwrap();
    assert_eq!(response.method, HttpMethod::Post);
    assert_eq!(response.status_code, 201);
    assert_eq!(response.body_text(), "hello");

    assert_eq!(modem.count("AT+HTTPDATA=8,"), 1);
    assert!(at(&modem, "AT+HTTPDATA") < at(&modem, "{\"t\":21}"));
    assert!(at(&modem, "{\"t\":21}") < at(&modem, "AT+HTTPACTION=1"));
}

#[test]
fn test_http_body_lines_are_not_result_codes() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+HTTPACTION", &["OK", "+HTTPACTION: 0,200,16"])
        .on("AT+HTTPREAD", &["+HTTPREAD: 16", "OK computer", "bye", "OK"]);
    let session = ready_session(&modem);

    let response = session.http_get("http://example.com/").unwrap();
    assert_eq!(response.body, b"OK computer\r\nbye");
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_http_body_starting_with_error_is_data() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+HTTPACTION", &["OK", "+HTTPACTION: 0,401,14"])
        .on("AT+HTTPREAD", &["+HTTPREAD: 14", "ERROR: no user", "OK"]);
    let session = ready_session(&modem);

    let response = session.http_get("http://example.com/").unwrap();
    assert_eq!(response.status_code, 401);
    assert_eq!(response.body_text(), "ERROR: no user");
    assert_eq!(modem.count("AT+HTTPTERM"), 1);
}

#[test]
fn test_http_read_error_before_body() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+HTTPACTION", &["OK", "+HTTPACTION: 0,200,5"])
        .on("AT+HTTPREAD", &["ERROR"]);
    let session = ready_session(&modem);

    match session.http_get("http://example.com/") {
        Err(Sim800Error::Chain(ChainError::Aborted {
            source: StepError::Modem { command, .. },
            ..
        })) => assert_eq!(command, "AT+HTTPREAD"),
        other => panic!("expected HTTPREAD failure, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_https_post_is_refused() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.http_post("https://example.com/readings", b"{}"),
        Err(Sim800Error::Unsupported(_))
    ));
    assert_eq!(modem.written(), vec!["AT"]);
}

#[test]
fn test_http_rejects_non_latin1_url() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.http_get("http://example.com/\u{20ac}"),
        Err(Sim800Error::InvalidArgument(ProtocolError::NotLatin1 { character: '\u{20ac}' }))
    ));
    assert_eq!(modem.written(), vec!["AT"]);
}

#[test]
fn test_http_bearer_failure_retries_then_cleans_up() {
    let modem = ScriptedModem::new();
    modem.on("AT+SAPBR=1,1", &["ERROR"]);
    let session = ready_session(&modem);

    match session.http_get("http://example.com/") {
        Err(Sim800Error::Chain(ChainError::Aborted {
            source: StepError::Modem { command, .. },
            cleanup,
            ..
        })) => {
            assert_eq!(command, "AT+SAPBR=1,1");
            assert_eq!(cleanup.len(), 2);
        }
        other => panic!("expected bearer failure, got {:?}", other),
    }
    // bearer_open defaults to one retry
    assert_eq!(modem.count("AT+SAPBR=1,1"), 2);
    assert_eq!(modem.count("AT+HTTPINIT"), 0);
    assert_eq!(modem.count("AT+HTTPTERM"), 1);
    assert_eq!(modem.count("AT+SAPBR=0,1"), 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_http_rejects_quote_in_url() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.http_get("http://example.com/\"x"),
        Err(Sim800Error::InvalidArgument(ProtocolError::InvalidCommand(_)))
    ));
    assert_eq!(modem.written(), vec!["AT"]);
}

// ============================================================================
// TCP
// ============================================================================

fn tcp_modem() -> ScriptedModem {
    let modem = ScriptedModem::new();
    modem
        .on("AT+CIFSR", &["10.52.7.1"])
        .on("AT+CIPSTART", &["OK", "CONNECT OK"])
        .on("AT+CIPSEND", &["> "])
        .on("hello", &["SEND OK"])
        .on("AT+CIPCLOSE", &["CLOSE OK"])
        .on("AT+CIPSHUT", &["SHUT OK"]);
    modem
}

#[test]
fn test_tcp_send_message() {
    let modem = tcp_modem();
    let session = ready_session(&modem);

    let report = session.send_tcp_message("203.0.113.5", 4444, b"hello").unwrap();
    assert_eq!(report.bytes_sent, 5);

    let expected = [
        "AT+CGATT=1",
        "AT+CIPMODE=0",
        "AT+CSTT=\"EE\"",
        "AT+CIICR",
        "AT+CIFSR",
        "AT+CIPSTART=\"TCP\",\"203.0.113.5\",4444",
        "AT+CIPSEND=5",
        "hello",
        "AT+CIPCLOSE",
        "AT+CIPSHUT",
    ];
    assert_eq!(&modem.written()[1..], expected);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_tcp_payload_bytes_are_sent_verbatim() {
    let payload = "\u{20ac}5".as_bytes();
    let on_wire = decode_latin1(payload);
    let modem = tcp_modem();
    modem.on(&on_wire, &["SEND OK"]);
    let session = ready_session(&modem);

    let report = session.send_tcp_message("203.0.113.5", 4444, payload).unwrap();
    assert_eq!(report.bytes_sent, 4);
    assert_eq!(modem.count("AT+CIPSEND=4"), 1);
    assert_eq!(modem.count(&on_wire), 1);
    assert_eq!(modem.count("?"), 0);
}

#[test]
fn test_tcp_connect_failure_still_shuts_down() {
    let modem = tcp_modem();
    modem.once("AT+CIPSTART", &["OK", "CONNECT FAIL"]);
    let session = ready_session(&modem);

    let err = session.send_tcp_message("203.0.113.5", 4444, b"hello").unwrap_err();
    match err {
        Sim800Error::Chain(ChainError::Aborted { source, .. }) => {
            assert!(matches!(source, StepError::Modem { .. }));
        }
        other => panic!("expected connect failure, got {:?}", other),
    }
    assert_eq!(modem.count("AT+CIPSEND"), 0);
    assert_eq!(modem.count("AT+CIPCLOSE"), 1);
    assert_eq!(modem.count("AT+CIPSHUT"), 1);
}

#[test]
fn test_tcp_message_length_bounds() {
    let modem = tcp_modem();
    let session = ready_session(&modem);

    let too_long = vec![b'x'; 1461];
    assert!(matches!(
        session.send_tcp_message("203.0.113.5", 4444, &too_long),
        Err(Sim800Error::InvalidArgument(ProtocolError::BufferOverflow {
            max: 1460,
            actual: 1461
        }))
    ));
    assert!(matches!(
        session.send_tcp_message("203.0.113.5", 4444, b""),
        Err(Sim800Error::InvalidArgument(_))
    ));
    assert_eq!(modem.written(), vec!["AT"]);
}

// ============================================================================
// SMS
// ============================================================================

#[test]
fn test_read_sms_message() {
    let modem = ScriptedModem::new();
    modem.on(
        "AT+CMGR=1",
        &[
            "+CMGR: \"REC UNREAD\",\"+447700900123\",\"\",\"24/01/15,10:30:00+00\"",
            "Meter reading due",
            "OK",
        ],
    );
    let session = ready_session(&modem);

    let message = session.read_sms_message(1).unwrap();
    assert_eq!(message.status, "REC UNREAD");
    assert_eq!(message.sender, "+447700900123");
    assert_eq!(message.text, "Meter reading due");
    assert!(message.timestamp.is_some());
    assert!(at(&modem, "AT+CMGF=1") < at(&modem, "AT+CMGR=1"));
}

#[test]
fn test_read_empty_sms_slot() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.read_sms_message(7),
        Err(Sim800Error::SmsNotFound { index: 7 })
    ));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_delete_all_sms_on_empty_inbox() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    session.delete_all_sms_messages().unwrap();
    assert_eq!(modem.count("AT+CMGDA=\"DEL ALL\""), 1);
}

#[test]
fn test_send_sms_and_throttle() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+CMGS", &["> "])
        .on("Tank level low", &["+CMGS: 12", "OK"]);
    let session = ready_session(&modem);

    let report = session
        .send_sms_message("+447700900123", "Tank level low")
        .unwrap();
    assert_eq!(report.reference, 12);
    assert_eq!(modem.count("AT+CMGS=\"+447700900123\""), 1);
    // ESC always follows the submission.
    assert_eq!(modem.written().last().map(String::as_str), Some("\u{1b}"));

    let writes = modem.written().len();
    match session.send_sms_message("+447700900123", "Tank level low") {
        Err(Sim800Error::SmsThrottled { remaining }) => assert!(!remaining.is_zero()),
        other => panic!("expected throttle, got {:?}", other),
    }
    assert_eq!(modem.written().len(), writes);
}

#[test]
fn test_failed_sms_does_not_start_throttle() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+CMGS", &["> "])
        .once("Hello", &["+CMS ERROR: 500"])
        .on("Hello", &["+CMGS: 3", "OK"]);
    let session = ready_session(&modem);

    assert!(matches!(
        session.send_sms_message("+447700900123", "Hello"),
        Err(Sim800Error::Chain(ChainError::Aborted { .. }))
    ));
    assert_eq!(modem.count("\u{1b}"), 1);
    assert_eq!(session.send_sms_message("+447700900123", "Hello").unwrap().reference, 3);
}

#[test]
fn test_sms_text_cannot_contain_ctrl_z() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.send_sms_message("+447700900123", "bad\u{1a}text"),
        Err(Sim800Error::InvalidArgument(_))
    ));
    assert_eq!(modem.count("AT+CMGS"), 0);
}

#[test]
fn test_sms_text_must_be_latin1() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);

    assert!(matches!(
        session.send_sms_message("+447700900123", "costs \u{20ac}5"),
        Err(Sim800Error::InvalidArgument(ProtocolError::NotLatin1 { .. }))
    ));
    assert_eq!(modem.count("AT+CMGS"), 0);

    // Latin-1 text is fine.
    modem.on("AT+CMGS", &["> "]).on("caf", &["+CMGS: 9", "OK"]);
    let report = session.send_sms_message("+447700900123", "caf\u{e9}").unwrap();
    assert_eq!(report.reference, 9);
}

// ============================================================================
// Network
// ============================================================================

#[test]
fn test_signal_quality() {
    let modem = ScriptedModem::new();
    modem.on("AT+CSQ", &["+CSQ: 18,0", "OK"]);
    let session = ready_session(&modem);

    let quality = session.signal_quality().unwrap();
    assert_eq!(quality.rssi, 18);
    assert_eq!(quality.dbm(), Some(-78));
}

#[test]
fn test_unparseable_response_is_a_parse_error() {
    let modem = ScriptedModem::new();
    modem.on("AT+CSQ", &["+CSQ: strong", "OK"]);
    let session = ready_session(&modem);

    assert!(matches!(
        session.signal_quality(),
        Err(Sim800Error::Parse { .. })
    ));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_connect_and_gprs_status() {
    let modem = ScriptedModem::new();
    modem
        .on("AT+CIFSR", &["10.52.7.1"])
        .on("AT+CGATT?", &["+CGATT: 1", "OK"]);
    let session = ready_session(&modem);

    assert_eq!(session.connect().unwrap(), Ipv4Addr::new(10, 52, 7, 1));
    assert!(session.gprs_attached().unwrap());
    assert_eq!(session.local_ip().unwrap(), Ipv4Addr::new(10, 52, 7, 1));
}

#[test]
fn test_reset_gprs() {
    let modem = ScriptedModem::new();
    modem.on("AT+CIPSHUT", &["SHUT OK"]);
    let session = ready_session(&modem);

    session.reset_gprs().unwrap();
    assert!(at(&modem, "AT+CIPSHUT") < at(&modem, "AT+CGATT=0"));
}

//! Integration tests for the command chain engine.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{ready_session, ScriptedModem};
use sim800_modem::protocol::ErrorCode;
use sim800_modem::{
    Chain, ChainError, ChainStep, Command, FailurePolicy, SessionState, StepError,
};

fn cmd(text: &str) -> Command {
    Command::raw(text, Duration::from_millis(50)).unwrap()
}

fn step(text: &str, policy: FailurePolicy) -> ChainStep {
    ChainStep::new(cmd(text), policy)
}

// ============================================================================
// Failure policies
// ============================================================================

#[test]
fn test_chain_runs_steps_in_order() {
    let modem = ScriptedModem::new();
    modem.on("AT+B", &["+B: 1", "OK"]);
    let session = ready_session(&modem);

    let chain = Chain::new("ordered")
        .step(step("AT+A", FailurePolicy::Abort))
        .step(step("AT+B", FailurePolicy::Abort))
        .step(step("AT+C", FailurePolicy::Abort))
        .cleanup(cmd("AT+END"));
    let report = session.run_chain(&chain).unwrap();

    assert_eq!(report.responses.len(), 3);
    assert_eq!(report.responses[1].information_lines(), vec!["+B: 1"]);
    assert_eq!(report.cleanup.len(), 1);
    assert!(report.cleanup[0].succeeded());
    assert_eq!(&modem.written()[1..], ["AT+A", "AT+B", "AT+C", "AT+END"]);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_abort_stops_chain_and_runs_cleanup_once() {
    let modem = ScriptedModem::new();
    modem.on("AT+B", &["+CME ERROR: 3"]);
    let session = ready_session(&modem);

    let chain = Chain::new("aborting")
        .step(step("AT+A", FailurePolicy::Abort))
        .step(step("AT+B", FailurePolicy::Abort))
        .step(step("AT+C", FailurePolicy::Abort))
        .cleanup(cmd("AT+END1"))
        .cleanup(cmd("AT+END2"));

    match session.run_chain(&chain) {
        Err(ChainError::Aborted {
            chain,
            source: StepError::Modem { command, code, .. },
            cleanup,
        }) => {
            assert_eq!(chain, "aborting");
            assert_eq!(command, "AT+B");
            assert_eq!(code, ErrorCode::Cme(3));
            assert_eq!(cleanup.len(), 2);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(modem.count("AT+C"), 0);
    assert_eq!(modem.count("AT+END1"), 1);
    assert_eq!(modem.count("AT+END2"), 1);
    // A modem error is not fatal to the session.
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_retry_makes_n_plus_one_attempts() {
    let modem = ScriptedModem::new();
    modem.on("AT+FLAKY", &["ERROR"]);
    let session = ready_session(&modem);

    let chain = Chain::new("retrying").step(step("AT+FLAKY", FailurePolicy::Retry(2)));
    assert!(matches!(
        session.run_chain(&chain),
        Err(ChainError::Aborted { .. })
    ));
    assert_eq!(modem.count("AT+FLAKY"), 3);
}

#[test]
fn test_retry_on_timeout_makes_n_plus_one_attempts() {
    let modem = ScriptedModem::new();
    modem.silent_on("AT+SLOW");
    let session = ready_session(&modem);

    let started = Instant::now();
    let chain = Chain::new("retrying").step(step("AT+SLOW", FailurePolicy::Retry(2)));
    match session.run_chain(&chain) {
        Err(ChainError::Aborted { source, .. }) => assert!(source.is_timeout()),
        other => panic!("expected timeout abort, got {:?}", other),
    }
    assert_eq!(modem.count("AT+SLOW"), 3);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn test_retry_stops_at_first_success() {
    let modem = ScriptedModem::new();
    modem.once("AT+FLAKY", &["ERROR"]);
    let session = ready_session(&modem);

    let chain = Chain::new("retrying").step(step("AT+FLAKY", FailurePolicy::Retry(2)));
    let report = session.run_chain(&chain).unwrap();
    assert_eq!(report.responses.len(), 1);
    assert_eq!(modem.count("AT+FLAKY"), 2);
}

#[test]
fn test_ignore_continues_and_records_failure() {
    let modem = ScriptedModem::new();
    modem.on("AT+OPTIONAL", &["ERROR"]);
    let session = ready_session(&modem);

    let chain = Chain::new("ignoring")
        .step(step("AT+OPTIONAL", FailurePolicy::Ignore))
        .step(step("AT+NEXT", FailurePolicy::Abort));
    let report = session.run_chain(&chain).unwrap();

    assert_eq!(report.responses.len(), 1);
    assert_eq!(report.ignored.len(), 1);
    assert_eq!(modem.count("AT+NEXT"), 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_timeout_aborts_and_faults_session() {
    let modem = ScriptedModem::new();
    modem.silent_on("AT+SLOW");
    let session = ready_session(&modem);

    let chain = Chain::new("slow")
        .step(step("AT+SLOW", FailurePolicy::Abort))
        .cleanup(cmd("AT+END"));
    match session.run_chain(&chain) {
        Err(ChainError::Aborted { source, cleanup, .. }) => {
            assert!(source.is_timeout());
            assert_eq!(cleanup.len(), 1);
        }
        other => panic!("expected timeout abort, got {:?}", other),
    }
    assert_eq!(modem.count("AT+END"), 1);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn test_transport_failure_faults_session() {
    let modem = ScriptedModem::new();
    modem.fail_on("AT+A");
    let session = ready_session(&modem);

    let chain = Chain::new("broken")
        .step(step("AT+A", FailurePolicy::Ignore))
        .cleanup(cmd("AT+END"));
    match session.run_chain(&chain) {
        Err(ChainError::Aborted {
            source: StepError::Transport { .. },
            ..
        }) => {}
        other => panic!("expected transport abort, got {:?}", other),
    }
    assert_eq!(modem.count("AT+END"), 1);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn test_cleanup_failures_are_recorded_not_raised() {
    let modem = ScriptedModem::new();
    modem.on("AT+END", &["ERROR"]);
    let session = ready_session(&modem);

    let chain = Chain::new("messy")
        .step(step("AT+A", FailurePolicy::Abort))
        .cleanup(cmd("AT+END"))
        .cleanup(cmd("AT+LAST"));
    let report = session.run_chain(&chain).unwrap();

    assert!(!report.cleanup[0].succeeded());
    assert!(report.cleanup[1].succeeded());
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_chain_requires_ready_session() {
    let modem = ScriptedModem::new();
    modem.silent_on("AT+SLOW");
    let session = ready_session(&modem);
    let _ = session.run_chain(&Chain::new("slow").step(step("AT+SLOW", FailurePolicy::Abort)));

    let chain = Chain::new("late").step(step("AT+A", FailurePolicy::Abort));
    assert!(matches!(
        session.run_chain(&chain),
        Err(ChainError::NotReady(SessionState::Faulted))
    ));
    assert_eq!(modem.count("AT+A"), 0);
}

// ============================================================================
// Transactions and cancellation
// ============================================================================

#[test]
fn test_transaction_returns_body_value() {
    let modem = ScriptedModem::new();
    modem.on("AT+VAL", &["+VAL: 42", "OK"]);
    let session = ready_session(&modem);

    let output = session
        .transaction("value", &[], |tx| {
            let raw = tx.require(&step("AT+VAL", FailurePolicy::Abort))?;
            Ok(raw.find_prefixed("+VAL:").map(str::to_string))
        })
        .unwrap();
    assert_eq!(output.value.as_deref(), Some("42"));
}

#[test]
fn test_require_cannot_ignore_failure() {
    let modem = ScriptedModem::new();
    modem.on("AT+NEEDED", &["ERROR"]);
    let session = ready_session(&modem);

    let result = session.transaction("needed", &[], |tx| {
        tx.require(&step("AT+NEEDED", FailurePolicy::Ignore))
    });
    assert!(matches!(result, Err(ChainError::Aborted { .. })));
}

#[test]
fn test_cancel_stops_before_next_step() {
    let modem = ScriptedModem::new();
    let session = ready_session(&modem);
    let token = session.cancel_token();

    let result = session.transaction("cancelled", &[cmd("AT+END")], |tx| {
        tx.run(&step("AT+A", FailurePolicy::Abort))?;
        token.cancel();
        tx.run(&step("AT+B", FailurePolicy::Abort))?;
        Ok(())
    });

    match result {
        Err(ChainError::Cancelled { chain, cleanup }) => {
            assert_eq!(chain, "cancelled");
            assert_eq!(cleanup.len(), 1);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(modem.count("AT+A"), 1);
    assert_eq!(modem.count("AT+B"), 0);
    assert_eq!(modem.count("AT+END"), 1);
    assert_eq!(session.state(), SessionState::Faulted);

    // Boot clears the request.
    session.boot().unwrap();
    assert!(!token.is_cancelled());
    assert!(session
        .run_chain(&Chain::new("after").step(step("AT+C", FailurePolicy::Abort)))
        .is_ok());
}

#[test]
fn test_concurrent_chains_never_interleave() {
    let modem = ScriptedModem::new();
    let session = Arc::new(ready_session(&modem));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut chain = Chain::new("worker");
                for part in ["A", "B", "C"] {
                    chain = chain.step(step(&format!("AT+W{}{}", worker, part), FailurePolicy::Abort));
                }
                session.run_chain(&chain).map(|report| report.responses.len())
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 3);
    }

    let written = modem.written();
    let commands = &written[1..];
    assert_eq!(commands.len(), 12);
    for chunk in commands.chunks(3) {
        let worker = &chunk[0][..5];
        assert!(chunk.iter().all(|c| c.starts_with(worker)), "interleaved: {:?}", commands);
        assert!(chunk[0].ends_with('A') && chunk[1].ends_with('B') && chunk[2].ends_with('C'));
    }
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_peak_busy_holders_is_one() {
    let modem = ScriptedModem::new();
    let session = Arc::new(ready_session(&modem));
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let session = Arc::clone(&session);
            let holders = Arc::clone(&holders);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                session.transaction("busy", &[], |tx| {
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tx.run(&step("AT+A", FailurePolicy::Abort))?;
                    thread::sleep(Duration::from_millis(5));
                    holders.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(modem.count("AT+A"), 6);
}

//! Lock discipline of synchronous session calls.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tcc_session::{OutputMode, Session, SessionError};

use crate::mock_engine::{assert_serialized, mock_session, Event, MockEngine, Recorder, SLOW_CALL};

#[test]
fn test_sync_calls_never_interleave() {
    let (session, recorder) = mock_session();
    let session = Arc::new(session);

    let slow = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.compile("int first; /* SLOW */"))
    };
    // Let the slow compile take the lock first.
    thread::sleep(SLOW_CALL / 4);
    assert!(session.compile("int second;").is_ok());
    assert!(slow.join().unwrap().is_ok());

    let events = recorder.events();
    assert_serialized(&events);
    assert!(
        recorder.position(&Event::End("compile int first; /* SLOW */".into()))
            < recorder.position(&Event::Begin("compile int second;".into()))
    );
    assert_eq!(recorder.max_active(), 1);
}

#[test]
fn test_many_threads_hammering_one_session() {
    let (session, recorder) = mock_session();
    let session = Arc::new(session);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for j in 0..25 {
                    match j % 3 {
                        0 => session.define_symbol(&format!("T{}", i), &j.to_string()),
                        1 => {
                            let _ = session.compile(&format!("int t{}_{};", i, j));
                        }
                        _ => {
                            let _ = session.get_symbol("int");
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(recorder.max_active(), 1);
    assert_serialized(&recorder.events());
}

#[test]
fn test_symbol_lookup_is_stable() {
    let (session, _recorder) = mock_session();
    assert!(session.compile("int main() { return 0; }").is_ok());
    assert!(session.relocate().is_ok());

    let first = session.get_symbol("main").unwrap();
    for _ in 0..100 {
        assert_eq!(session.get_symbol("main").unwrap(), first);
    }
}

#[test]
fn test_missing_symbol_is_the_only_raised_error() {
    let (session, _recorder) = mock_session();
    assert!(session.compile("#error nope").is_err());
    assert!(session.add_file("missing.c").is_err());
    assert!(session.compile("int main;").is_ok());
    assert!(session.relocate().is_ok());

    let err = session.get_symbol("absent").unwrap_err();
    assert!(matches!(err, SessionError::SymbolNotFound { .. }));
    assert_eq!(err.to_string(), "symbol error");
}

#[test]
fn test_handles_outlive_the_session() {
    let (session, _recorder) = mock_session();
    assert!(session.compile("int counter;").is_ok());
    assert!(session.relocate().is_ok());
    let handle = session.get_symbol("counter").unwrap();
    drop(session);

    // The mock engine is gone but the handle is still a plain value.
    let copy = handle;
    assert_eq!(copy.addr(), handle.addr());
}

#[test]
fn test_independent_sessions_run_concurrently() {
    let shared = Recorder::new();
    let a = Arc::new(Session::new(Box::new(MockEngine::new(&shared)), OutputMode::Execute));
    let b = Arc::new(Session::new(Box::new(MockEngine::new(&shared)), OutputMode::Execute));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [a, b]
        .into_iter()
        .enumerate()
        .map(|(i, session)| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                session.compile(&format!("int s{}; /* SLOW */", i))
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    // Separate sessions do not share a lock.
    assert_eq!(shared.max_active(), 2);
}

#[test]
fn test_engine_panic_does_not_poison_the_session() {
    let (session, recorder) = mock_session();
    let session = Arc::new(session);

    let crashed = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.compile("PANIC"))
    };
    assert!(crashed.join().is_err());

    // The write guard was released during unwinding.
    let done = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.compile("int after;"))
    };
    thread::sleep(Duration::from_millis(10));
    assert!(done.join().unwrap().is_ok());
    assert_eq!(recorder.sources.lock().as_slice(), ["int after;"]);
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ccdb::backend::MemoryBackend;
use ccdb::error::{CcdbError, ErrorLog};
use ccdb::interface::{CallOptions, CancelToken};
use ccdb::resolve::{NewAssignment, Query};
use ccdb::session::Session;
use ccdb::settings::Settings;

#[test]
fn error_log_keeps_the_newest_records() {
    let mut log = ErrorLog::new(3);
    for i in 0..5 {
        log.record("memory::test", &CcdbError::not_found(format!("thing {}", i)));
    }
    assert_eq!(log.len(), 3);
    assert_eq!(log.capacity(), 3);
    let records = log.records();
    assert!(records[0].message().contains("thing 2"));
    assert!(log.last().expect("last").message().contains("thing 4"));
    assert_eq!(log.last().expect("last").code(), 10);
    log.clear();
    assert!(log.is_empty());
    assert_eq!(ErrorLog::default().capacity(), 100);
}

#[test]
fn each_operation_starts_with_an_empty_log() {
    let session = Session::in_memory().expect("session");
    assert!(session.directory("/missing").is_err());
    assert_eq!(session.error_count(), 1);
    let last = session.last_error().expect("recorded");
    assert_eq!(last.code(), 10);
    assert_eq!(last.module(), "memory::directory");

    assert!(session.directory("/").is_ok());
    assert_eq!(session.error_count(), 0);
    assert!(session.last_error().is_none());
}

#[test]
fn zero_timeout_expires_at_once() {
    let session = Session::in_memory().expect("session");
    session.set_call_options(CallOptions::default().with_timeout(Duration::ZERO));
    let result = session.make_directory("late", "/", "");
    assert!(matches!(result, Err(CcdbError::Timeout(_))));
    assert_eq!(session.last_error().map(|e| e.code()), Some(41));

    session.set_call_options(CallOptions::default());
    assert!(matches!(session.directory("/late"), Err(CcdbError::NotFound(_))));
    session.set_call_options(CallOptions::default().with_timeout(Duration::from_secs(60)));
    assert!(session.make_directory("late", "/", "").is_ok());
}

#[test]
fn cancellation_is_reported_separately() {
    let session = Session::in_memory().expect("session");
    let token = CancelToken::new();
    session.set_call_options(CallOptions::default().with_cancel(token.clone()));
    assert!(session.make_directory("before", "/", "").is_ok());

    token.cancel();
    let result = session.make_directory("after", "/", "");
    assert!(matches!(result, Err(CcdbError::Cancelled(_))));
    assert_eq!(session.last_error().map(|e| e.code()), Some(42));

    // with both set, cancellation wins
    session.set_call_options(
        CallOptions::default()
            .with_cancel(token.clone())
            .with_timeout(Duration::ZERO),
    );
    assert!(matches!(session.directory("/"), Err(CcdbError::Cancelled(_))));

    token.reset();
    session.set_call_options(CallOptions::default().with_cancel(token));
    assert!(session.make_directory("after", "/", "").is_ok());
}

#[test]
fn timeout_from_settings_applies_to_opening() {
    let settings = Settings {
        timeout_ms: Some(0),
        ..Settings::default()
    };
    let opened = Session::new(Box::new(MemoryBackend::new()), &settings);
    assert!(matches!(opened, Err(CcdbError::Timeout(_))));
}

#[test]
fn disconnected_sessions_refuse_work() {
    let session = Session::in_memory().expect("session");
    assert!(session.is_connected());
    assert_eq!(session.backend_name(), "memory");
    session.disconnect();
    assert!(!session.is_connected());
    assert!(matches!(session.directory("/"), Err(CcdbError::Connection(_))));
    assert_eq!(session.last_error().map(|e| e.code()), Some(40));
}

#[test]
fn operations_from_many_threads() {
    let session = Arc::new(Session::in_memory().expect("session"));
    session.make_directory("shared", "/", "").expect("directory");
    session
        .create_type_table("values", "/shared", 1, &[("v", "int")], "")
        .expect("type table");
    session
        .create_assignment(&NewAssignment::from_text("/shared/values", "7"))
        .expect("assignment");

    let mut workers = Vec::new();
    for i in 0..4 {
        let session = Arc::clone(&session);
        workers.push(thread::spawn(move || {
            for j in 0..25 {
                let resolved = session.resolve(&Query::new("/shared/values", j)).expect("resolve");
                assert_eq!(resolved.table().expect("table").value::<i32>(0, 0).expect("v"), 7);
            }
            session.make_directory(&format!("worker_{}", i), "/shared", "").expect("directory");
        }));
    }
    for worker in workers {
        worker.join().expect("worker");
    }
    let shared = session.directory("/shared").expect("shared");
    assert_eq!(session.subdirectories(&shared).expect("children").len(), 4);
}

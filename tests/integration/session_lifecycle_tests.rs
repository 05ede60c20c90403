//! Session start, connection exclusivity and shutdown.

use mph_session::process::supervisor::pid_alive;
use mph_session::{AppError, Session, SessionState};

use super::test_helpers::{Frontend, Harness, FIRST_PORT};

#[tokio::test]
async fn start_connects_and_records_server_port() {
    let harness = Harness::new(Frontend::Attaching);
    let mut session = Session::start(harness.config(5), harness.deps())
        .await
        .expect("session must start");

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.port(), Some(FIRST_PORT));
    assert_eq!(session.version(), "5.3");
    assert!(session.server().is_running(), "server process must be alive");
    assert!(harness.engine.is_connected());

    let reported = session
        .server_util()
        .unwrap()
        .port()
        .await
        .expect("server utility must report its port");
    assert_eq!(session.port(), Some(reported));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_version_fails_before_starting_anything() {
    let harness = Harness::new(Frontend::Attaching);
    let mut config = harness.config(5);
    config.version = "4.2".into();

    let err = Session::start(config, harness.deps())
        .await
        .expect_err("unknown version must fail");

    assert!(matches!(err, AppError::Version(_)), "got {err:?}");
    assert_eq!(harness.engine.servers_started(), 0);
}

#[tokio::test]
async fn refused_server_start_reports_server_message() {
    let harness = Harness::new(Frontend::Attaching);
    harness.engine.refuse_start();

    let err = Session::start(harness.config(5), harness.deps())
        .await
        .expect_err("refused start must fail");

    match err {
        AppError::Connection(msg) => assert!(msg.contains("License error"), "got {msg}"),
        other => panic!("expected connection error, got {other:?}"),
    }
    assert!(!harness.engine.is_connected());
}

#[tokio::test]
async fn second_session_is_rejected_and_first_stays_usable() {
    let harness = Harness::new(Frontend::Attaching);
    let mut first = Session::start(harness.config(5), harness.deps())
        .await
        .unwrap();

    let err = Session::start(harness.config(5), harness.deps())
        .await
        .expect_err("second session must be rejected");
    assert!(matches!(err, AppError::AlreadyConnected(_)), "got {err:?}");
    assert!(err.is_connection());

    assert_eq!(harness.engine.servers_started(), 2);
    assert!(
        harness.engine.is_connected(),
        "rejected session must not drop the first session's connection"
    );
    assert!(!harness
        .engine
        .calls()
        .iter()
        .any(|call| call == "ModelUtil.Disconnect"));

    let tags = first.mu().unwrap().tags().await;
    assert!(tags.is_ok(), "first session must still answer: {tags:?}");
    assert!(first.server().is_running());

    first.shutdown().await.unwrap();
    assert!(!harness.engine.is_connected());
}

#[tokio::test]
async fn shutdown_is_idempotent_and_stops_server() {
    let harness = Harness::new(Frontend::Attaching);
    let mut session = Session::start(harness.config(5), harness.deps())
        .await
        .unwrap();
    let pid = session.server().pid().expect("server pid must be known");

    session.shutdown().await.expect("first shutdown must succeed");
    session.shutdown().await.expect("second shutdown must succeed");

    assert_eq!(session.state(), SessionState::Closed);
    assert!(!pid_alive(pid), "server process must be gone");
    assert!(!harness.engine.is_connected());
}

#[tokio::test]
async fn shutdown_of_unstarted_session_is_noop() {
    let harness = Harness::new(Frontend::Attaching);
    let mut session = Session::new(harness.config(5), harness.deps());

    session.shutdown().await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.server().is_empty());
    assert!(harness.engine.calls().is_empty());
}

#[tokio::test]
async fn closed_session_cannot_launch() {
    let harness = Harness::new(Frontend::Attaching);
    let mut session = Session::start(harness.config(5), harness.deps())
        .await
        .unwrap();
    session.shutdown().await.unwrap();

    let err = session.launch(None).await.expect_err("launch must fail");
    assert!(matches!(err, AppError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn drop_without_shutdown_kills_server() {
    let harness = Harness::new(Frontend::Attaching);
    let session = Session::start(harness.config(5), harness.deps())
        .await
        .unwrap();
    let pid = session.server().pid().unwrap();

    drop(session);

    // SIGKILL delivery is asynchronous.
    for _ in 0..50 {
        if !pid_alive(pid) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server process {pid} survived session drop");
}

#[tokio::test]
async fn models_and_parameters_round_trip() {
    let harness = Harness::new(Frontend::Attaching);
    let mut session = Session::start(harness.config(5), harness.deps())
        .await
        .unwrap();
    let mu = session.mu().unwrap().clone();

    let model = mu.create("Scratch").await.unwrap();
    assert!(mu.tags().await.unwrap().contains(&"Scratch".to_owned()));

    let params = model.param();
    params.set("width", "1[cm]").await.unwrap();
    assert_eq!(params.get("width").await.unwrap(), "1[cm]");
    params.remove("width").await.unwrap();
    let err = params.get("width").await.expect_err("removed parameter");
    assert!(matches!(err, AppError::Api(_)), "got {err:?}");

    mu.remove("Scratch").await.unwrap();
    assert!(!mu.tags().await.unwrap().contains(&"Scratch".to_owned()));

    let err = mu.model("Scratch").await.expect_err("removed model");
    assert_eq!(err, AppError::Api("Unknown model tag: Scratch".into()));

    session.shutdown().await.unwrap();
}

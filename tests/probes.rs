use std::collections::HashMap;
use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use proctor::probe::{check_once, wait_until_ready, ProbeOutcome};
use proctor::procfile::ReadySpec;

fn no_env() -> HashMap<String, String> {
    HashMap::new()
}

#[tokio::test]
async fn tcp_probe_succeeds_against_a_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let spec = ReadySpec::Tcp { port };
    assert!(check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn tcp_probe_fails_without_a_listener() {
    // Bind-then-drop to find a port that is closed right now.
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let spec = ReadySpec::Tcp { port };
    assert!(!check_once(&spec, &no_env(), Path::new(".")).await);
}

fn serve_one_response(listener: TcpListener, response: &'static str) {
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 512];
            use std::io::Read;
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(response.as_bytes());
        }
    });
}

#[tokio::test]
async fn http_probe_accepts_sub_500_statuses() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    serve_one_response(listener, "HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n");

    let spec = ReadySpec::Http { port, path: "/health".into(), status: None };
    assert!(check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn http_probe_rejects_5xx_without_expected_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    serve_one_response(listener, "HTTP/1.0 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");

    let spec = ReadySpec::Http { port, path: "/".into(), status: None };
    assert!(!check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn http_probe_with_expected_status_matches_exactly() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    serve_one_response(listener, "HTTP/1.0 201 Created\r\nContent-Length: 0\r\n\r\n");

    let spec = ReadySpec::Http { port, path: "/".into(), status: Some(201) };
    assert!(check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn http_probe_with_expected_status_rejects_mismatch() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    serve_one_response(listener, "HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");

    let spec = ReadySpec::Http { port, path: "/".into(), status: Some(201) };
    assert!(!check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn exec_probe_reports_exit_status() {
    assert!(check_once(&ReadySpec::Exec { command: "true".into() }, &no_env(), Path::new(".")).await);
    assert!(
        !check_once(&ReadySpec::Exec { command: "false".into() }, &no_env(), Path::new(".")).await
    );
}

#[tokio::test]
async fn exec_probe_sees_the_child_environment() {
    let mut env = HashMap::new();
    env.insert("PROBE_FLAG".to_string(), "yes".to_string());
    let spec = ReadySpec::Exec { command: "test \"$PROBE_FLAG\" = yes".into() };
    assert!(check_once(&spec, &env, Path::new(".")).await);
    assert!(!check_once(&spec, &no_env(), Path::new(".")).await);
}

#[tokio::test]
async fn wait_until_ready_returns_once_the_probe_passes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let outcome = timeout(
        Duration::from_secs(5),
        wait_until_ready(&ReadySpec::Tcp { port }, &no_env(), Path::new("."), cancel_rx),
    )
    .await
    .unwrap();
    assert_eq!(outcome, ProbeOutcome::Ready);
}

#[tokio::test]
async fn cancellation_is_observed_within_a_poll_interval() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let started = Instant::now();
    let probe = tokio::spawn(async move {
        wait_until_ready(&ReadySpec::Tcp { port }, &no_env(), Path::new("."), cancel_rx).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel_tx.send(true).unwrap();

    let outcome = timeout(Duration::from_secs(2), probe).await.unwrap().unwrap();
    assert_eq!(outcome, ProbeOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(600), "cancellation was not prompt");
}

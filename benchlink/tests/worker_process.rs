//! End-to-end tests against real worker processes run by `sh`.

#![cfg(unix)]

use std::time::Duration;

use benchlink::config::SupervisorConfig;
use benchlink::{BenchService, CommandLine, ConnectionEvent, Error};
use tokio::sync::broadcast;
use tokio::time::timeout;

/// A well-behaved worker: reports READY, answers TRIGGER and leaves on QUIT.
const WORKER: &str = r#"
echo "Scanning for BLE device: '$1'..."
echo "sensor warming up" >&2
echo READY
while read cmd; do
  case "$cmd" in
    TRIGGER) echo "reading=42" ;;
    QUIT) echo DISCONNECTED; exit 0 ;;
  esac
done
"#;

/// A worker that connects and then ignores every command.
const STUBBORN_WORKER: &str = r#"
echo READY
while read cmd; do :; done
"#;

fn service(worker_script: &str, scanner_script: &str) -> BenchService {
    let config = SupervisorConfig {
        // `sh -c SCRIPT sh DEVICE` puts the device name in $1.
        worker: CommandLine::new("sh", ["-c", worker_script, "sh"]),
        scanner: CommandLine::new("sh", ["-c", scanner_script]),
        grace_period: Duration::from_millis(300),
        log_capacity: 100,
    };
    BenchService::new(&config)
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

async fn wait_for_log(service: &BenchService, entry: &str) -> Vec<String> {
    timeout(Duration::from_secs(10), async {
        loop {
            let logs = service.logs().await;
            if logs.iter().any(|line| line == entry) {
                return logs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for log entry {entry:?}"))
}

#[tokio::test]
async fn test_worker_session() {
    let service = service(WORKER, "true");
    let mut events = service.subscribe();

    service.connect("THOR-01").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Connected {
            device_name: "THOR-01".into()
        }
    );
    let status = service.status().await;
    assert!(status.connected);
    assert_eq!(status.device_name.as_deref(), Some("THOR-01"));

    service.trigger().await.unwrap();
    wait_for_log(&service, "[ERROR]: sensor warming up").await;
    let logs = wait_for_log(&service, "reading=42").await;
    // The two streams interleave arbitrarily; stdout keeps its own order.
    let stdout: Vec<&String> = logs
        .iter()
        .filter(|line| !line.starts_with("[ERROR]: "))
        .collect();
    assert_eq!(
        stdout,
        ["Scanning for BLE device: 'THOR-01'...", "reading=42"]
    );

    service.disconnect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);
    assert!(!service.status().await.connected);

    // Worker exit and the expired grace timer must not report a second time.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    service.shutdown().await;
}

#[tokio::test]
async fn test_unresponsive_worker_is_killed() {
    let service = service(STUBBORN_WORKER, "true");
    let mut events = service.subscribe();

    service.connect("THOR-01").await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));

    service.disconnect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

    // The slot is free again.
    service.connect("THOR-02").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Connected {
            device_name: "THOR-02".into()
        }
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_worker_crash_frees_slot() {
    let service = service(
        "echo READY; sleep 0.2; echo 'Traceback: boom' >&2; exit 1",
        "true",
    );
    let mut events = service.subscribe();

    service.connect("THOR-01").await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Connected { .. }
    ));
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Disconnected);

    wait_for_log(&service, "[ERROR]: Traceback: boom").await;
    assert!(matches!(service.trigger().await, Err(Error::NotConnected)));

    service.shutdown().await;
}

#[tokio::test]
async fn test_missing_worker_program() {
    let config = SupervisorConfig {
        worker: CommandLine::new("/nonexistent/benchlink-worker", Vec::<String>::new()),
        ..SupervisorConfig::default()
    };
    let service = BenchService::new(&config);

    assert!(matches!(
        service.connect("THOR-01").await,
        Err(Error::Spawn { .. })
    ));
    let logs = service.logs().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("[ERROR]: failed to start /nonexistent/benchlink-worker"));
    assert!(!service.status().await.connected);
}

#[tokio::test]
async fn test_scan_lists_devices() {
    let service = service(WORKER, r#"echo '["Dev-A","Dev-B"]'"#);
    assert_eq!(service.scan().await.unwrap(), vec!["Dev-A", "Dev-B"]);
}

#[tokio::test]
async fn test_scan_unparsable_output() {
    let service = service(WORKER, "echo 'Scanning...'; echo 'no json here'");
    assert!(service.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_failure() {
    let service = service(WORKER, "echo 'adapter not found' >&2; exit 1");
    match service.scan().await {
        Err(Error::ScanFailed { stderr, .. }) => assert_eq!(stderr, "adapter not found"),
        other => panic!("expected ScanFailed, got {other:?}"),
    }
}

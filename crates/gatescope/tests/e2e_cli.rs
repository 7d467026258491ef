use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use gatescope_core::model::Trace;
use testkit::{MockGateway, sample_trace, trace_with_status, unique_id};

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_gatescope")
}

// The history and watch tests block the test thread on child-process IO
// while the in-process gateway serves from the same runtime, so they need
// worker threads.
#[tokio::test(flavor = "multi_thread")]
async fn history_command_prints_json_collection() {
    let gateway = MockGateway::start().await;
    gateway.set_history(vec![
        sample_trace(&unique_id()),
        trace_with_status(&unique_id(), "error"),
    ]);

    let output = Command::new(bin())
        .arg("history")
        .arg("--history-url")
        .arg(gateway.history_url())
        .arg("--json")
        .output()
        .unwrap();

    assert!(output.status.success());
    let traces: Vec<Trace> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(traces.len(), 2);
    assert_eq!(traces[1].status, "error");
}

#[tokio::test(flavor = "multi_thread")]
async fn history_command_forwards_limit() {
    let gateway = MockGateway::start().await;
    gateway.set_history(vec![
        sample_trace("first"),
        sample_trace("second"),
        sample_trace("third"),
    ]);

    let output = Command::new(bin())
        .arg("history")
        .arg("--history-url")
        .arg(gateway.history_url())
        .arg("--limit")
        .arg("2")
        .arg("--json")
        .output()
        .unwrap();

    assert!(output.status.success());
    let traces: Vec<Trace> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(traces.len(), 2);
}

#[test]
fn diagram_command_compiles_stdin_trace() {
    let trace = sample_trace("diag");
    let payload = serde_json::to_string(&trace).unwrap();

    let mut child = Command::new(bin())
        .arg("diagram")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(payload.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    let rendered = String::from_utf8(output.stdout).unwrap();
    assert!(rendered.starts_with("sequenceDiagram\n"));
    assert!(rendered.contains("participant Core as Gateway\n"));
    assert!(rendered.contains("Core->>Postgres: query users\n"));
}

#[test]
fn diagram_command_rejects_malformed_input() {
    let mut child = Command::new(bin())
        .arg("diagram")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"not a trace")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(!output.status.success());
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_command_emits_merged_traces_as_json_lines() {
    let gateway = MockGateway::start().await;

    let mut child = Command::new(bin())
        .arg("watch")
        .arg("--no-history")
        .arg("--history-url")
        .arg(gateway.history_url())
        .arg("--stream-url")
        .arg(gateway.stream_url())
        .arg("--json")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
            if line_tx.send(line).is_err() {
                return;
            }
        }
    });

    // The subscriber attaches asynchronously, so keep pushing until a
    // merged trace shows up on stdout.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = None;
    while Instant::now() < deadline {
        gateway.push(sample_trace("live"));
        if let Ok(line) = line_rx.recv_timeout(Duration::from_millis(200)) {
            seen = Some(line);
            break;
        }
    }
    let _ = child.kill();
    let _ = child.wait();

    let line = seen.expect("no trace line before deadline");
    let trace: Trace = serde_json::from_str(&line).unwrap();
    assert_eq!(trace.id, "live");
}

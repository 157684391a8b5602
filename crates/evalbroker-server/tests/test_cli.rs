use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_evalbroker");

/// Feeds `lines` to a broker, closes its stdin and returns the replies sorted
/// by id.
async fn run_broker(args: &[&str], lines: &[Value]) -> (Vec<Value>, bool) {
    let mut child = Command::new(BIN)
        .args(args)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    for line in lines {
        stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }
    drop(stdin);

    let output = tokio::time::timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .expect("broker did not exit")
        .unwrap();

    let mut replies: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    replies.sort_by_key(|reply| reply["id"].as_i64());
    (replies, output.status.success())
}

fn request(id: i64, script: &str, variables: &[&str], timeout: f64) -> Value {
    json!({"id": id, "script": script, "variables": variables, "timeout": timeout})
}

fn standard_requests() -> Vec<Value> {
    vec![
        request(1, "a = 2 + 2", &["a"], 2000.0),
        request(2, "raise ValueError('x')", &[], 2000.0),
        request(3, "while True:\n    pass\n", &[], 200.0),
        request(
            4,
            "def fact(n):\n    return 1 if n <= 1 else n * fact(n - 1)\nr = fact(10)\n",
            &["r"],
            2000.0,
        ),
    ]
}

fn standard_replies() -> Vec<Value> {
    vec![
        json!({"id": 1, "a": 4}),
        json!({"id": 2, "exception": "<class 'ValueError'> x ('x',)"}),
        json!({"id": 3, "exception": "Timeout occurred."}),
        json!({"id": 4, "r": 3628800}),
    ]
}

#[tokio::test]
async fn test_help_describes_thread_backend_limits() {
    let output = Command::new(BIN).arg("--help").output().await.unwrap();
    assert!(output.status.success());
    let help = String::from_utf8(output.stdout).unwrap();
    assert!(help.contains("--backend"));
    assert!(help.contains("force-killed"));
}

#[tokio::test]
async fn test_thread_backend() {
    let (replies, success) = run_broker(&[], &standard_requests()).await;
    assert!(success);
    assert_eq!(replies, standard_replies());
}

#[tokio::test]
async fn test_serve_subcommand() {
    let (replies, success) = run_broker(&["serve", "--max-hosts", "2"], &standard_requests()).await;
    assert!(success);
    assert_eq!(replies, standard_replies());
}

#[tokio::test]
async fn test_process_backend() {
    let args = ["--backend", "process", "--min-idle", "1", "--grace-ms", "100"];
    let (replies, success) = run_broker(&args, &standard_requests()).await;
    assert!(success);
    assert_eq!(replies, standard_replies());
}

#[tokio::test]
async fn test_process_backend_isolates_requests() {
    let args = ["--backend", "process", "--max-hosts", "1"];
    let lines = [
        request(1, "x = 1", &["x"], 2000.0),
        request(2, "y = x", &["y"], 2000.0),
    ];
    let (replies, success) = run_broker(&args, &lines).await;
    assert!(success);
    assert_eq!(replies[0], json!({"id": 1, "x": 1}));
    assert!(replies[1]["exception"]
        .as_str()
        .unwrap()
        .starts_with("<class 'NameError'>"));
}

#[tokio::test]
async fn test_timeout_in_seconds() {
    let started = Instant::now();
    let lines = [request(1, "while True:\n    pass\n", &[], 0.3)];
    let (replies, success) = run_broker(&["--timeout-unit", "seconds"], &lines).await;
    assert!(success);
    assert_eq!(replies, vec![json!({"id": 1, "exception": "Timeout occurred."})]);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_malformed_line() {
    let lines = [json!("just a string"), request(2, "b = True", &["b"], 1000.0)];
    let (replies, success) = run_broker(&[], &lines).await;
    assert!(success);
    assert_eq!(replies.len(), 2);
    // Sorting puts the reply without id first.
    assert!(replies[0].get("id").is_none());
    assert!(replies[0]["exception"]
        .as_str()
        .unwrap()
        .starts_with("Malformed request:"));
    assert_eq!(replies[1], json!({"id": 2, "b": true}));
}

#[tokio::test]
async fn test_worker_mode_handshake() {
    let mut child = Command::new(BIN)
        .arg("worker")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap()).lines();

    let ready: Value = serde_json::from_str(&stdout.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(ready, json!({"type": "ready"}));

    let run = json!({
        "type": "run",
        "task_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
        "payload": "z = [i * i for i in range(4)]",
    });
    stdin
        .write_all(format!("{run}\n").as_bytes())
        .await
        .unwrap();

    let outcome: Value = serde_json::from_str(&stdout.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(
        outcome,
        json!({
            "type": "outcome",
            "outcome": {"status": "completed", "bindings": {"z": [0, 1, 4, 9]}},
        })
    );

    drop(stdin);
    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("worker did not exit on end of input")
        .unwrap();
    assert!(status.success());
}

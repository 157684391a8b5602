use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use evalbroker::unit::{Binding, Namespace};
use evalbroker::{
    Broker, BrokerConfig, CancelToken, ExecutionCapability, ExecutionFailure, ScriptCapability,
    TimeoutUnit,
};

struct Harness {
    input: Option<DuplexStream>,
    output: Lines<BufReader<DuplexStream>>,
    handle: JoinHandle<evalbroker::Result<()>>,
}

impl Harness {
    fn start(config: BrokerConfig) -> Self {
        Self::with_capability(config, Arc::new(ScriptCapability::new()))
    }

    fn with_capability(config: BrokerConfig, capability: Arc<dyn ExecutionCapability>) -> Self {
        Self::with_shutdown(config, capability, std::future::pending())
    }

    fn with_shutdown<S>(
        config: BrokerConfig,
        capability: Arc<dyn ExecutionCapability>,
        shutdown: S,
    ) -> Self
    where
        S: std::future::Future<Output = ()> + Send + 'static,
    {
        let (input, broker_input) = duplex(64 * 1024);
        let (broker_output, output) = duplex(64 * 1024);
        let broker = Broker::threaded(config, capability);
        let handle = tokio::spawn(broker.run(broker_input, broker_output, shutdown));
        Self {
            input: Some(input),
            output: BufReader::new(output).lines(),
            handle,
        }
    }

    async fn send_line(&mut self, line: &str) {
        let input = self.input.as_mut().expect("input already closed");
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, request: Value) {
        self.send_line(&request.to_string()).await;
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.output.next_line())
            .await
            .expect("no reply within 10s")
            .unwrap()
            .expect("broker closed its output");
        serde_json::from_str(&line).unwrap()
    }

    async fn finish(mut self) -> evalbroker::Result<()> {
        self.input.take();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("broker did not stop")
            .unwrap()
    }
}

fn request(id: i64, script: &str, variables: &[&str], timeout: u64) -> Value {
    json!({"id": id, "script": script, "variables": variables, "timeout": timeout})
}

// Sleeps for the number of milliseconds in the payload without ever looking at
// the cancel token.
fn stubborn(payload: &str, _: &CancelToken) -> Result<Namespace, ExecutionFailure> {
    let millis: u64 = payload.trim().parse().unwrap_or(0);
    std::thread::sleep(Duration::from_millis(millis));
    let mut ns = Namespace::new();
    ns.insert("slept".into(), Binding::Value(json!(millis)));
    Ok(ns)
}

#[tokio::test]
async fn test_projection_of_requested_bindings() {
    let mut broker = Harness::start(BrokerConfig::default());
    broker
        .send(request(
            1,
            "a = 2 + 2\nb = [1, 'x', None]\nc = {'k': 1.5}\nf = len\nimport math\n",
            &["a", "b", "c", "f", "math", "stop", "missing"],
            1000,
        ))
        .await;

    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "a": 4, "b": [1, "x", null], "c": {"k": 1.5}})
    );
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_exception_reply() {
    let mut broker = Harness::start(BrokerConfig::default());
    broker
        .send(request(2, "raise ValueError('x')", &["a"], 1000))
        .await;
    assert_eq!(
        broker.recv().await,
        json!({"id": 2, "exception": "<class 'ValueError'> x ('x',)"})
    );
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_request_without_id() {
    let mut broker = Harness::start(BrokerConfig::default());
    broker
        .send(json!({"script": "x = 'ok'", "variables": ["x"], "timeout": 500}))
        .await;
    assert_eq!(broker.recv().await, json!({"x": "ok"}));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_cooperative_timeout() {
    let mut broker = Harness::start(BrokerConfig::default());
    let started = Instant::now();
    broker
        .send(request(3, "while True:\n    pass\n", &[], 100))
        .await;
    assert_eq!(
        broker.recv().await,
        json!({"id": 3, "exception": "Timeout occurred."})
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_forced_timeout_does_not_block_others() {
    let config = BrokerConfig {
        grace_ms: Some(50),
        ..Default::default()
    };
    let mut broker = Harness::with_capability(config, Arc::new(stubborn));
    let started = Instant::now();

    broker
        .send(json!({"id": 1, "script": "5000", "variables": [], "timeout": 50}))
        .await;
    broker
        .send(json!({"id": 2, "script": "10", "variables": ["slept"], "timeout": 2000}))
        .await;

    let mut replies = vec![broker.recv().await, broker.recv().await];
    replies.sort_by_key(|reply| reply["id"].as_i64());
    assert_eq!(
        replies,
        vec![
            json!({"id": 1, "exception": "Timeout occurred."}),
            json!({"id": 2, "slept": 10}),
        ]
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_runaway_unit_does_not_delay_fast_one() {
    let mut broker = Harness::start(BrokerConfig::default());
    broker
        .send(request(1, "while True:\n    pass\n", &[], 500))
        .await;
    broker.send(request(2, "y = 7", &["y"], 500)).await;

    assert_eq!(broker.recv().await, json!({"id": 2, "y": 7}));
    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "exception": "Timeout occurred."})
    );
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_namespaces_do_not_leak_between_requests() {
    let config = BrokerConfig {
        max_hosts: Some(1),
        min_idle: 1,
        ..Default::default()
    };
    let mut broker = Harness::start(config);

    broker.send(request(1, "x = 1", &["x"], 1000)).await;
    assert_eq!(broker.recv().await, json!({"id": 1, "x": 1}));

    broker.send(request(2, "y = x", &["y"], 1000)).await;
    assert_eq!(
        broker.recv().await,
        json!({
            "id": 2,
            "exception": "<class 'NameError'> name 'x' is not defined (\"name 'x' is not defined\",)"
        })
    );
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_overlapping_requests_have_separate_namespaces() {
    let mut broker = Harness::start(BrokerConfig::default());
    let script = |value: i64| {
        format!("import time\nx = {value}\ntime.sleep(0.3)\nseen = x\n")
    };

    let started = Instant::now();
    broker.send(request(1, &script(1), &["x", "seen"], 5000)).await;
    broker.send(request(2, &script(2), &["x", "seen"], 5000)).await;

    let mut replies = vec![broker.recv().await, broker.recv().await];
    replies.sort_by_key(|reply| reply["id"].as_i64());
    assert_eq!(
        replies,
        vec![
            json!({"id": 1, "x": 1, "seen": 1}),
            json!({"id": 2, "x": 2, "seen": 2}),
        ]
    );
    // Both sleeps ran at the same time.
    assert!(started.elapsed() < Duration::from_millis(550));

    broker.send(request(3, "y = x", &["y"], 1000)).await;
    let reply = broker.recv().await;
    assert_eq!(reply["id"], json!(3));
    assert!(reply["exception"]
        .as_str()
        .unwrap()
        .starts_with("<class 'NameError'> name 'x' is not defined"));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_malformed_lines_are_answered_and_skipped() {
    let mut broker = Harness::start(BrokerConfig::default());

    broker.send_line("this is not json").await;
    let reply = broker.recv().await;
    assert!(reply.get("id").is_none());
    assert!(reply["exception"]
        .as_str()
        .unwrap()
        .starts_with("Malformed request:"));

    broker.send(json!({"id": 4, "script": "a = 1", "timeout": 10})).await;
    let reply = broker.recv().await;
    assert_eq!(reply["id"], json!(4));
    assert!(reply["exception"]
        .as_str()
        .unwrap()
        .contains("missing field `variables`"));

    broker.send_line("").await;
    broker.send(request(5, "a = 1", &["a"], 1000)).await;
    assert_eq!(broker.recv().await, json!({"id": 5, "a": 1}));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_in_flight_id_is_rejected() {
    let mut broker = Harness::start(BrokerConfig::default());
    broker
        .send(request(7, "while True:\n    pass\n", &[], 300))
        .await;
    broker.send(request(7, "a = 1", &["a"], 300)).await;

    assert_eq!(
        broker.recv().await,
        json!({"id": 7, "exception": "Duplicate request id: 7"})
    );
    assert_eq!(
        broker.recv().await,
        json!({"id": 7, "exception": "Timeout occurred."})
    );

    // The id is free again once answered.
    broker.send(request(7, "a = 1", &["a"], 300)).await;
    assert_eq!(broker.recv().await, json!({"id": 7, "a": 1}));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_capped_pool_queues_requests() {
    let config = BrokerConfig {
        max_hosts: Some(1),
        ..Default::default()
    };
    let mut broker = Harness::with_capability(config, Arc::new(stubborn));
    let started = Instant::now();

    for id in 1..=3 {
        broker
            .send(json!({"id": id, "script": "100", "variables": ["slept"], "timeout": 2000}))
            .await;
    }
    for id in 1..=3 {
        assert_eq!(broker.recv().await, json!({"id": id, "slept": 100}));
    }
    assert!(started.elapsed() >= Duration::from_millis(300));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_capped_pool_recovers_slots_from_timeouts() {
    let config = BrokerConfig {
        max_hosts: Some(1),
        grace_ms: Some(20),
        ..Default::default()
    };
    let mut broker = Harness::with_capability(config, Arc::new(stubborn));

    broker
        .send(json!({"id": 1, "script": "3000", "variables": [], "timeout": 30}))
        .await;
    broker
        .send(json!({"id": 2, "script": "0", "variables": ["slept"], "timeout": 1000}))
        .await;

    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "exception": "Timeout occurred."})
    );
    assert_eq!(broker.recv().await, json!({"id": 2, "slept": 0}));
}

#[tokio::test]
async fn test_stragglers_time_out_at_end_of_input() {
    let config = BrokerConfig {
        drain_timeout_ms: 100,
        ..Default::default()
    };
    let mut broker = Harness::start(config);
    broker
        .send(request(1, "while True:\n    pass\n", &[], 60_000))
        .await;
    broker.send(request(2, "b = 2", &["b"], 60_000)).await;
    assert_eq!(broker.recv().await, json!({"id": 2, "b": 2}));

    broker.input.take();
    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "exception": "Timeout occurred."})
    );
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_signal_stops_the_broker() {
    let (trigger, signal) = oneshot::channel::<()>();
    let shutdown = async move {
        let _ = signal.await;
    };
    let config = BrokerConfig {
        drain_timeout_ms: 100,
        ..Default::default()
    };
    let mut broker = Harness::with_shutdown(config, Arc::new(ScriptCapability::new()), shutdown);

    broker
        .send(request(1, "import time\ntime.sleep(30)\n", &[], 60_000))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.send(()).unwrap();

    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "exception": "Timeout occurred."})
    );
    // The input is still open; the signal alone ends the broker.
    let result = tokio::time::timeout(Duration::from_secs(5), &mut broker.handle)
        .await
        .expect("broker ignored the shutdown signal")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_timeout_in_seconds() {
    let config = BrokerConfig {
        timeout_unit: TimeoutUnit::Seconds,
        ..Default::default()
    };
    let mut broker = Harness::start(config);
    let started = Instant::now();
    broker
        .send(json!({"id": 1, "script": "while True:\n    pass\n", "variables": [], "timeout": 0.2}))
        .await;
    assert_eq!(
        broker.recv().await,
        json!({"id": 1, "exception": "Timeout occurred."})
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    broker.finish().await.unwrap();
}

#[tokio::test]
async fn test_broken_output_is_fatal() {
    let (mut input, broker_input) = duplex(4096);
    let (broker_output, output) = duplex(4096);
    drop(output);

    let broker = Broker::threaded(BrokerConfig::default(), Arc::new(ScriptCapability::new()));
    let handle = tokio::spawn(broker.run(broker_input, broker_output, std::future::pending()));

    input
        .write_all(b"{\"id\": 1, \"script\": \"a = 1\", \"variables\": [\"a\"], \"timeout\": 1000}\n")
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("broker kept running with a broken output")
        .unwrap();
    match result {
        Err(err) => assert!(err.is_fatal()),
        Ok(()) => panic!("broken output was not reported"),
    }
}

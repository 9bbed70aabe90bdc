//! Degraded operation: simulated bus and sockets, plus the shutdown harness.

use resonance_client::{MockFactory, SimulatedFactory};
use resonance_node::{run_until, Config, Delivery, InMemoryBus, Pipeline, Producer};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs() -> (Capture, tracing::subscriber::DefaultGuard) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

#[tokio::test]
async fn simulated_heartbeat_is_one_log_line() {
    let (logs, _guard) = capture_logs();
    let bus = InMemoryBus::disconnected();
    let producer = Producer::new(&Config::default(), Arc::new(bus.clone()));
    assert!(producer.is_simulated());
    logs.clear();

    for _ in 0..3 {
        assert_eq!(producer.send_heartbeat().await.unwrap(), Delivery::Simulated);
    }

    let lines = logs.lines();
    assert_eq!(lines.len(), 3, "{lines:#?}");
    for line in &lines {
        assert!(line.contains("[SIMULATED] Would send to resonance.state.sync"));
        assert!(line.contains("\"type\":\"heartbeat\""));
    }
    assert_eq!(bus.total_records(), 0);
}

#[tokio::test]
async fn fully_simulated_pipeline_runs_and_stops() {
    let config = Config::default().simulated();
    let pipeline = Pipeline::new(config, SimulatedFactory).await;

    assert!(pipeline.consumer().is_simulated());
    assert!(pipeline.synchronizer().producer().is_simulated());

    run_until(&pipeline, tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(pipeline.local_addr().is_none());
    assert!(!pipeline.synchronizer().is_running());
    assert!(!pipeline.hub().is_running());
}

#[tokio::test]
async fn signal_stops_a_running_pipeline() {
    let mut config = Config::default();
    config.socket.host = "127.0.0.1".into();
    config.socket.port = 0;
    let bus = InMemoryBus::new();
    let pipeline = Pipeline::with_bus(config, Arc::new(bus.clone()), MockFactory::new()).await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let signal = async move {
        let _ = rx.await;
    };

    let harness = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(pipeline.hub().is_running());
        tx.send(()).unwrap();
    };

    let (result, ()) = tokio::join!(run_until(&pipeline, signal), harness);
    result.unwrap();

    assert!(!pipeline.hub().is_running());
    assert!(bus.end_offset("resonance.state.sync") > 0);
}

#[tokio::test]
async fn startup_failure_is_returned() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.socket.host = "127.0.0.1".into();
    config.socket.port = taken.local_addr().unwrap().port();
    let pipeline = Pipeline::with_bus(config, Arc::new(InMemoryBus::new()), MockFactory::new()).await;

    let result = run_until(&pipeline, std::future::pending::<()>()).await;

    assert!(result.is_err());
    assert!(!pipeline.synchronizer().is_running());
}

#[tokio::test]
async fn pipeline_handlers_log_vitals_and_sender() {
    let (logs, _guard) = capture_logs();
    let pipeline =
        Pipeline::with_bus(Config::default(), Arc::new(InMemoryBus::new()), MockFactory::new())
            .await;
    let nexus = resonance_types::Origin::new("NEXUS", "nexus-ci");

    for (offset, envelope) in [
        nexus.frequency_sync(0.043, 0.61),
        nexus.repository_event("push", serde_json::json!({"ref": "main"})),
    ]
    .into_iter()
    .enumerate()
    {
        let record = resonance_node::bus::BusRecord {
            topic: "resonance.inbound".into(),
            offset: offset as u64,
            payload: envelope.to_bytes().unwrap(),
        };
        pipeline.consumer().handle_record(&record);
    }

    let lines = logs.lines();
    assert!(
        lines
            .iter()
            .any(|l| l.contains("Received frequency sync: 0.043 Hz, S-ROI: 0.61")),
        "{lines:#?}"
    );
    assert!(
        lines
            .iter()
            .any(|l| l.contains("Received repository event: push from nexus-ci")),
        "{lines:#?}"
    );
}

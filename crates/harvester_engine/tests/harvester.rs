mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FakeHost, FakeLink};
use harvester_core::{filter, ConnectionEvent, ConnectionState};
use harvester_engine::{
    AgentConfig, HarvestError, Harvester, Hook, HookError, Instrumentation, QueryHook,
    TransportSettings, Yield,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

fn config() -> AgentConfig {
    AgentConfig {
        process_info_interval_ms: 100,
        transport: TransportSettings {
            connect_timeout_ms: 500,
            request_timeout_ms: 500,
            reconnect_delay_ms: 1_000,
            heartbeat_interval_ms: 200,
        },
        ..AgentConfig::default()
    }
    .with_name("orders-api")
}

fn harvester(link: &Arc<FakeLink>, host: Arc<FakeHost>) -> Harvester {
    agent_logging::initialize_for_tests();
    Harvester::with_parts(config(), link.clone(), host).expect("inside runtime")
}

async fn wait_for(events: &mut broadcast::Receiver<ConnectionEvent>, wanted: ConnectionEvent) {
    timeout(Duration::from_secs(30), async {
        loop {
            if events.recv().await.expect("event channel open") == wanted {
                return;
            }
        }
    })
    .await
    .expect("connection event in time");
}

#[tokio::test(start_paused = true)]
async fn connect_harvests_environment_once_and_disconnect_stops_process_info() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(350)).await;

    let environment = link.sent_named("environment");
    assert_eq!(environment.len(), 1);
    let envelope = &environment[0];
    assert_eq!(envelope.app_name, "orders-api");
    assert_eq!(
        envelope.data,
        json!({
            "title": "orders-api",
            "version": "1.4.2",
            "architecture": "x86_64",
            "platform": "linux",
            "hostName": "web-01",
            "pid": 4242,
            "ip": ["10.1.2.3"],
            "ram": "7.5gb",
            "cpus": {"count": 4, "type": "Intel Xeon"}
        })
    );

    let process_info = link.sent_named("process.info");
    assert!(process_info.len() >= 2, "only {} process.info events", process_info.len());
    assert_eq!(process_info[0].data["uptime"], json!(90.0));
    assert_eq!(process_info[0].data["usage"]["memoryInfo"]["rss"], json!(64 * 1024 * 1024));
    assert!(harvester.is_harvesting("process.info"));

    link.set_up(false);
    wait_for(&mut events, ConnectionEvent::Disconnected).await;
    sleep(Duration::from_millis(10)).await;
    assert!(!harvester.is_harvesting("process.info"));

    // The stopped job must not produce anything more.
    let delivered = link.sent_named("process.info").len();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(link.sent_named("process.info").len(), delivered);
}

#[tokio::test(start_paused = true)]
async fn reconnect_restarts_standard_jobs_and_resends_environment() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    link.set_up(false);
    wait_for(&mut events, ConnectionEvent::Disconnected).await;
    link.set_up(true);
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(150)).await;

    assert_eq!(link.sent_named("environment").len(), 2);
    assert!(harvester.is_harvesting("process.info"));
}

#[tokio::test(start_paused = true)]
async fn harvest_while_disconnected_is_dropped_not_queued() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    for n in 0..10 {
        harvester.harvest("custom", json!(n));
    }
    assert_eq!(harvester.connection_state(), ConnectionState::Disconnected);

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    harvester.harvest("custom", json!("fresh"));
    sleep(Duration::from_millis(10)).await;

    let custom: Vec<Value> = link
        .sent_named("custom")
        .into_iter()
        .map(|envelope| envelope.data)
        .collect();
    assert_eq!(custom, vec![json!("fresh")]);
}

#[tokio::test(start_paused = true)]
async fn custom_jobs_survive_disconnect() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    harvester
        .start_harvesting("queue.depth", 100, || Yield::value(json!(3)))
        .unwrap();
    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    link.set_up(false);
    wait_for(&mut events, ConnectionEvent::Disconnected).await;
    sleep(Duration::from_millis(10)).await;

    assert!(harvester.is_harvesting("queue.depth"));
    assert!(!harvester.is_harvesting("process.info"));
}

#[tokio::test(start_paused = true)]
async fn environment_filters_run_exactly_once() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    harvester
        .add_filter(
            "environment",
            filter(move |mut data, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                data["region"] = json!("eu-west-1");
                Some(data)
            }),
            None,
        )
        .unwrap();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let environment = link.sent_named("environment");
    assert_eq!(environment[0].data["region"], json!("eu-west-1"));
}

#[tokio::test(start_paused = true)]
async fn filters_apply_to_every_event_name() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    let redact = filter(|mut data, _| {
        data["query"] = json!("<redacted>");
        Some(data)
    });
    harvester.add_filter("db.query", redact.clone(), Some(1)).unwrap();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    harvester.harvest("db.query", json!({"duration": 12, "query": "select secret"}));
    assert_eq!(harvester.remove_filter("db.query", &redact), Ok(1));
    harvester.harvest("db.query", json!({"duration": 7, "query": "select 1"}));
    sleep(Duration::from_millis(10)).await;

    let queries: Vec<Value> = link
        .sent_named("db.query")
        .into_iter()
        .map(|envelope| envelope.data["query"].clone())
        .collect();
    assert_eq!(queries, vec![json!("<redacted>"), json!("select 1")]);
}

#[tokio::test(start_paused = true)]
async fn host_failure_skips_environment_but_keeps_process_info() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::broken_environment());
    let mut events = harvester.subscribe();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(250)).await;

    assert!(link.sent_named("environment").is_empty());
    assert!(!link.sent_named("process.info").is_empty());
}

#[tokio::test(start_paused = true)]
async fn process_info_reports_registered_modules() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    harvester.register_module("knex (pg)", "0.9.0");
    harvester.register_module("knex (pg)", "0.10.0");
    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(150)).await;

    let process_info = link.sent_named("process.info");
    assert_eq!(process_info[0].data["modules"], json!({"knex (pg)": "0.10.0"}));
}

struct BrokenHook;

impl Hook for BrokenHook {
    fn name(&self) -> &str {
        "broken"
    }

    fn install(&self, _instrumentation: Instrumentation) -> Result<(), HookError> {
        Err(HookError::install("broken", "framework not found"))
    }
}

struct PanickingHook;

impl Hook for PanickingHook {
    fn name(&self) -> &str {
        "panicking"
    }

    fn install(&self, _instrumentation: Instrumentation) -> Result<(), HookError> {
        panic!("unexpected framework layout")
    }
}

#[tokio::test(start_paused = true)]
async fn hook_failures_are_isolated() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();
    let queries = QueryHook::new("knex", "pg", "0.9.0");

    let errors = harvester.install_hooks([
        &BrokenHook as &dyn Hook,
        &PanickingHook as &dyn Hook,
        &queries as &dyn Hook,
    ]);

    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[1], HookError::Panicked { ref hook, .. } if hook == "panicking"));
    assert_eq!(harvester.modules().version("knex (pg)").as_deref(), Some("0.9.0"));

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    queries.begin("select * from orders").finish();
    sleep(Duration::from_millis(10)).await;

    let harvested = link.sent_named("db.query");
    assert_eq!(harvested.len(), 1);
    assert_eq!(harvested[0].data["query"], json!("select * from orders"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_jobs_and_disconnects() {
    let link = FakeLink::new(true);
    let harvester = harvester(&link, FakeHost::new());
    let mut events = harvester.subscribe();

    harvester
        .start_harvesting("queue.depth", 100, || Yield::value(json!(3)))
        .unwrap();
    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;

    harvester.shutdown();
    wait_for(&mut events, ConnectionEvent::Disconnected).await;
    assert!(harvester.scheduler().job_names().is_empty());
    assert_eq!(harvester.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_right_after_start_stays_stopped() {
    for _ in 0..32 {
        let link = FakeLink::new(true);
        let harvester = harvester(&link, FakeHost::new());

        harvester.start();
        harvester.shutdown();
        sleep(Duration::from_secs(5)).await;

        assert_eq!(harvester.connection_state(), ConnectionState::Disconnected);
        assert!(!harvester.is_harvesting("process.info"));
        assert!(link.sent().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn environment_snapshot_is_taken_off_the_event_loop() {
    let link = FakeLink::new(true);
    let host = FakeHost::new();
    let harvester = harvester(&link, host.clone());
    let mut events = harvester.subscribe();

    harvester.start();
    wait_for(&mut events, ConnectionEvent::Connected).await;
    sleep(Duration::from_millis(10)).await;

    let threads = host.environment_threads();
    assert_eq!(threads.len(), 1);
    assert_ne!(threads[0], std::thread::current().id());
    assert_eq!(link.sent_named("environment").len(), 1);
}

#[tokio::test]
async fn new_rejects_invalid_host() {
    let result = Harvester::new(AgentConfig::default().with_host("ftp://collector"));
    assert!(matches!(result, Err(HarvestError::Config(_))));
}

#[test]
fn new_requires_a_runtime() {
    let result = Harvester::new(AgentConfig::default());
    assert!(matches!(result, Err(HarvestError::NoRuntime)));
}

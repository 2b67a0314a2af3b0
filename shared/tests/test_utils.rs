// ============================================================================
// Test Utilities for the Queue Engine
// ============================================================================
//
// Builds a complete engine (service + workers + scheduler pieces) on top of
// the in-memory queue store with scripted provider drivers, so every test
// runs without Redis or a network.
//
// ============================================================================

#![allow(dead_code)]

use courier_config::Config;
use courier_server_shared::auth::ServiceIdentity;
use courier_server_shared::providers::{DriverSet, EmailDriver, OutboundEmail, SendOutcome};
use courier_server_shared::queue::{MemoryQueueStore, QueueStore};
use courier_server_shared::render::FileTemplates;
use courier_server_shared::service::{EmailService, EnqueueRequest};
use courier_server_shared::worker::{Worker, WorkerContext};
use courier_types::{Priority, ProviderKind};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Driver stub with a scripted outcome sequence; once the script runs out
/// every further send succeeds. Records every call.
pub struct StubDriver {
    kind: ProviderKind,
    outcomes: Mutex<VecDeque<SendOutcome>>,
    calls: Mutex<Vec<OutboundEmail>>,
    delay: Duration,
}

impl StubDriver {
    pub fn new(kind: ProviderKind, outcomes: Vec<SendOutcome>) -> Self {
        Self {
            kind,
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(kind: ProviderKind, outcomes: Vec<SendOutcome>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(kind, outcomes)
        }
    }

    pub fn calls(&self) -> Vec<OutboundEmail> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl EmailDriver for StubDriver {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(email.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Ok)
    }
}

/// A full engine over the in-memory store with one scripted SMTP driver.
pub struct TestEngine {
    pub store: Arc<MemoryQueueStore>,
    pub config: Arc<Config>,
    pub driver: Arc<StubDriver>,
    pub ctx: WorkerContext,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TestEngine {
    pub fn new(config: Config, outcomes: Vec<SendOutcome>) -> Self {
        Self::with_driver(config, StubDriver::new(ProviderKind::Smtp, outcomes))
    }

    pub fn with_driver(config: Config, driver: StubDriver) -> Self {
        let store = Arc::new(MemoryQueueStore::new());
        let config = Arc::new(config);
        let driver = Arc::new(driver);

        let mut drivers: HashMap<ProviderKind, Arc<dyn EmailDriver>> = HashMap::new();
        drivers.insert(driver.kind(), driver.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = WorkerContext {
            store: store.clone(),
            config: config.clone(),
            drivers: Arc::new(DriverSet::new(drivers)),
            renderer: Arc::new(FileTemplates::from_parts([(
                "welcome".to_string(),
                Some("Welcome, {{ name }}".to_string()),
                Some("<p>Hello {{ name }}</p>".to_string()),
                Some("Hello {{ name }}".to_string()),
            )])),
            worker_id: "test-proc".to_string(),
        };

        Self {
            store,
            config,
            driver,
            ctx,
            shutdown_tx,
            shutdown_rx,
            workers: Vec::new(),
        }
    }

    pub fn service(&self) -> EmailService {
        EmailService::new(self.store.clone(), self.config.clone())
    }

    /// Spawn one worker task into the engine's consumer group.
    pub fn spawn_worker(&mut self, label: &str) {
        let mut worker = Worker::new(label, self.ctx.clone(), self.shutdown_rx.clone());
        self.workers.push(tokio::spawn(async move {
            let _ = worker.run().await;
        }));
    }

    /// Enqueue through the public service path.
    pub async fn enqueue(&self, request: EnqueueRequest) -> String {
        self.service()
            .enqueue(request, &ServiceIdentity::anonymous(), "/send")
            .await
            .expect("enqueue failed")
            .job_id
    }

    /// Promote everything currently parked, regardless of its due time.
    pub async fn promote_all(&self) -> Vec<String> {
        self.store
            .promote_due(i64::MAX / 2, 1024)
            .await
            .expect("promote failed")
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.workers {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

/// Poll an async condition until it holds or the timeout passes.
pub async fn eventually<Fut>(timeout: Duration, mut condition: impl FnMut() -> Fut) -> bool
where
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the job's audit record reaches the given terminal status.
pub async fn wait_for_final_status(
    engine: &TestEngine,
    job_id: &str,
    status: courier_types::JobStatus,
) -> bool {
    let service = engine.service();
    let job_id = job_id.to_string();
    eventually(Duration::from_secs(3), move || {
        let service = service.clone();
        let job_id = job_id.clone();
        async move {
            service
                .job_audit(&job_id)
                .await
                .ok()
                .flatten()
                .map(|record| record.final_status == status)
                .unwrap_or(false)
        }
    })
    .await
}

pub fn send_request(recipients: Vec<&str>, priority: Priority) -> EnqueueRequest {
    EnqueueRequest {
        recipients: recipients.into_iter().map(str::to_string).collect(),
        template: "welcome".to_string(),
        context: HashMap::from([("name".to_string(), Value::String("Ada".to_string()))]),
        subject: None,
        priority: Some(priority),
        provider: Some(ProviderKind::Smtp),
        scheduled_for: None,
        endpoint_label: None,
    }
}

/// Config tuned for fast tests: one worker, 1s retry base, no rate waits.
pub fn fast_config() -> Config {
    let mut config = Config::test_defaults();
    config.worker.worker_count = 1;
    config.worker.base_retry_delay_s = 1;
    config.worker.rate_wait_max_s = 0;
    config.worker.pending_timeout_s = 1;
    config.worker.reclaim_interval_s = 1;
    config.worker.drain_timeout_s = 5;
    config
}

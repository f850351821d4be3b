//! [`ShieldService`] – the public face of the admission layer.
//!
//! Owns every subsystem the shield needs: the validator, the bounded
//! admission queue, the status bus, and the two background loops (dispatch
//! and retention sweep).  Construct it once with
//! [`ShieldService::spawn`] and share it freely; submission, cancellation,
//! and snapshots are cheap synchronous calls that never wait on the dispatch
//! loop's sleeps.
//!
//! Submission is fire-and-forget once accepted: the caller gets an immediate
//! id and queue position, and the request's eventual outcome is visible only
//! through [`ShieldService::subscribe`] events or
//! [`ShieldService::snapshot`] polls.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gridshield_runtime::{HttpCloudClient, ShieldConfig, ShieldService};
//! use gridshield_types::RequestKind;
//! use serde_json::json;
//!
//! # async fn demo() {
//! let client = Arc::new(HttpCloudClient::new("https://api.example-energy.io", "key"));
//! let service = ShieldService::spawn(ShieldConfig::default(), client);
//!
//! let receipt = service
//!     .submit(RequestKind::OperatingMode, &json!({ "mode": "eco", "confirm": true }))
//!     .unwrap();
//! println!("queued at position {}", receipt.position);
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use gridshield_kernel::{AdmissionQueue, Validator};
use gridshield_middleware::{EventStream, StatusBus};
use gridshield_types::{QueueSnapshot, RequestKind, ShieldError, ShieldEvent};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::client::CloudClient;
use crate::config::ShieldConfig;
use crate::dispatch;

/// Returned from a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: Uuid,
    /// 1-based queue position at admission time.
    pub position: usize,
}

/// Single time base for queue records.
///
/// Anchored to UTC at service start and advanced by the monotonic Tokio
/// clock, so every timestamp the queue records (and every retention-age
/// comparison) moves with `tokio::time` rather than the wall clock.
pub(crate) struct ServiceClock {
    wall_start: DateTime<Utc>,
    mono_start: tokio::time::Instant,
}

impl ServiceClock {
    fn start() -> Self {
        Self {
            wall_start: Utc::now(),
            mono_start: tokio::time::Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono_start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_start + elapsed
    }
}

/// State shared between the service handle and its background loops.
pub(crate) struct ServiceState {
    pub(crate) config: ShieldConfig,
    pub(crate) queue: Mutex<AdmissionQueue>,
    pub(crate) bus: StatusBus,
    pub(crate) validator: Validator,
    pub(crate) clock: ServiceClock,
    /// Wakes the dispatch loop when a request is admitted.
    pub(crate) notify: Notify,
    pub(crate) shutdown: AtomicBool,
}

impl ServiceState {
    /// Lock the queue, recovering from a poisoned mutex: the queue's own
    /// invariants are re-established by renumbering, so a panicked writer
    /// does not leave it unusable.
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, AdmissionQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running shield.  Dropping it stops both background loops.
pub struct ShieldService {
    state: Arc<ServiceState>,
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ShieldService {
    /// Build the service and start its dispatch and retention loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: ShieldConfig, client: Arc<dyn CloudClient>) -> Self {
        let state = Arc::new(ServiceState {
            queue: Mutex::new(AdmissionQueue::new(config.capacity)),
            bus: StatusBus::new(config.bus_capacity),
            validator: Validator::new(config.validator_config()),
            clock: ServiceClock::start(),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            config,
        });

        let dispatcher = tokio::spawn(dispatch::run(Arc::clone(&state), client));
        let sweeper = tokio::spawn(dispatch::sweep(Arc::clone(&state)));

        Self {
            state,
            dispatcher,
            sweeper,
        }
    }

    /// Validate and admit a control request.
    ///
    /// Returns the request id and its 1-based queue position.  Rejections
    /// ([`ShieldError::Validation`], [`ShieldError::QueueFull`]) surface
    /// synchronously and leave the queue untouched.
    pub fn submit(&self, kind: RequestKind, params: &Value) -> Result<SubmitReceipt, ShieldError> {
        let intent = self.state.validator.validate(kind, params)?;

        let (id, position, snapshot) = {
            let mut queue = self.state.lock_queue();
            let (id, position) = queue.enqueue(intent, self.state.clock.now())?;
            (id, position, queue.snapshot())
        };

        info!(%id, %kind, position, "control request accepted");
        self.state.bus.publish(ShieldEvent::QueueChanged { snapshot });
        self.state.notify.notify_one();

        Ok(SubmitReceipt { id, position })
    }

    /// Cancel the pending request at `position`.
    ///
    /// The running request and settled requests cannot be cancelled; the
    /// caller must wait for them to settle or be purged.
    pub fn cancel(&self, position: usize) -> Result<(), ShieldError> {
        let (removed, snapshot) = {
            let mut queue = self.state.lock_queue();
            let removed = queue.cancel(position)?;
            (removed, queue.snapshot())
        };

        info!(id = %removed.id, kind = %removed.kind, position, "pending request cancelled");
        self.state.bus.publish(ShieldEvent::QueueChanged { snapshot });
        Ok(())
    }

    /// Point-in-time view of the visible queue.  Safe to call at any
    /// frequency; holds the queue lock only long enough to clone.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.lock_queue().snapshot()
    }

    /// Subscribe to queue-change, completion, and failure events.
    pub fn subscribe(&self) -> EventStream {
        self.state.bus.subscribe()
    }

    /// Stop the dispatch and retention loops.  Queued requests are dropped
    /// with the service; the queue is deliberately volatile.
    pub fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
        self.dispatcher.abort();
        self.sweeper.abort();
    }
}

impl Drop for ShieldService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridshield_types::{ControlIntent, RequestStatus, ValidationError};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;

    // ------------------------------------------------------------------ scripted client

    enum Behavior {
        /// Answer Ok after the given latency.
        Succeed { latency: Duration },
        /// Error instantly for the first `failures` attempts, then succeed.
        FailTimes { failures: u32 },
        /// Error instantly on every attempt.
        AlwaysError,
        /// Never answer; every attempt runs into the dispatch timeout.
        NeverRespond,
    }

    struct ScriptedClient {
        behavior: Behavior,
        attempts: StdMutex<Vec<Instant>>,
    }

    impl ScriptedClient {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                attempts: StdMutex::new(Vec::new()),
            })
        }

        fn attempt_instants(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CloudClient for ScriptedClient {
        async fn invoke(&self, _intent: &ControlIntent) -> Result<(), ShieldError> {
            let attempt_number = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len() as u32
            };
            match self.behavior {
                Behavior::Succeed { latency } => {
                    if !latency.is_zero() {
                        tokio::time::sleep(latency).await;
                    }
                    Ok(())
                }
                Behavior::FailTimes { failures } => {
                    if attempt_number <= failures {
                        Err(ShieldError::Api("injected failure".to_string()))
                    } else {
                        Ok(())
                    }
                }
                Behavior::AlwaysError => Err(ShieldError::Api("injected failure".to_string())),
                Behavior::NeverRespond => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    // ------------------------------------------------------------------ helpers

    fn quick_config() -> ShieldConfig {
        ShieldConfig {
            min_dispatch_interval: Duration::from_secs(2),
            dispatch_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            retention: Duration::from_secs(60),
            purge_interval: Duration::from_secs(5),
            ..ShieldConfig::default()
        }
    }

    fn mode_params() -> Value {
        json!({ "mode": "eco", "confirm": true })
    }

    fn boiler_params() -> Value {
        json!({ "mode": "heat-now", "confirm": true })
    }

    /// Wait (in virtual time) for the next event, panicking if none arrives.
    async fn next_event(stream: &mut EventStream) -> ShieldEvent {
        tokio::time::timeout(Duration::from_secs(3600), stream.recv())
            .await
            .expect("timed out waiting for event")
            .expect("status bus closed")
    }

    /// Drain events until the next completion, returning its id.
    async fn next_completion(stream: &mut EventStream) -> Uuid {
        loop {
            if let ShieldEvent::RequestCompleted { id, .. } = next_event(stream).await {
                return id;
            }
        }
    }

    // ------------------------------------------------------------------ admission

    #[tokio::test(start_paused = true)]
    async fn submit_returns_fifo_positions() {
        let client = ScriptedClient::new(Behavior::NeverRespond);
        let service = ShieldService::spawn(quick_config(), client);

        let r1 = service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        let r2 = service.submit(RequestKind::Boiler, &boiler_params()).unwrap();
        let r3 = service
            .submit(RequestKind::ExportLimit, &json!({ "limit_watts": 3000, "confirm": true }))
            .unwrap();

        assert_eq!((r1.position, r2.position, r3.position), (1, 2, 3));
        assert_ne!(r1.id, r2.id);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_submission_rejected_without_enqueue() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::ZERO });
        let service = ShieldService::spawn(quick_config(), client);

        let result = service.submit(RequestKind::OperatingMode, &json!({ "mode": "eco" }));
        assert!(matches!(
            result,
            Err(ShieldError::Validation(ValidationError::NotConfirmed))
        ));

        let snapshot = service.snapshot();
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.running.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_overflow_rejected_and_never_visible() {
        let client = ScriptedClient::new(Behavior::NeverRespond);
        let service = ShieldService::spawn(quick_config(), client);

        for _ in 0..50 {
            service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        }
        let overflow = service.submit(RequestKind::OperatingMode, &mode_params());
        assert!(matches!(overflow, Err(ShieldError::QueueFull { capacity: 50 })));

        let snapshot = service.snapshot();
        assert_eq!(snapshot.pending.len() + usize::from(snapshot.running.is_some()), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_publishes_queue_changed() {
        let client = ScriptedClient::new(Behavior::NeverRespond);
        let service = ShieldService::spawn(quick_config(), client);
        let mut stream = service.subscribe();

        service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();

        match next_event(&mut stream).await {
            ShieldEvent::QueueChanged { snapshot } => {
                assert_eq!(snapshot.pending.len(), 1);
                assert_eq!(snapshot.pending[0].position, 1);
            }
            other => panic!("expected QueueChanged, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------ happy path

    #[tokio::test(start_paused = true)]
    async fn three_requests_complete_in_order_with_paced_attempts() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::ZERO });
        let service = ShieldService::spawn(quick_config(), Arc::clone(&client) as Arc<dyn CloudClient>);
        let mut stream = service.subscribe();

        let r1 = service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        let r2 = service.submit(RequestKind::Boiler, &boiler_params()).unwrap();
        let r3 = service
            .submit(RequestKind::ForcedCharge, &json!({ "enable": false, "confirm": true }))
            .unwrap();

        let completed = [
            next_completion(&mut stream).await,
            next_completion(&mut stream).await,
            next_completion(&mut stream).await,
        ];
        assert_eq!(completed, [r1.id, r2.id, r3.id]);

        // Attempt starts are spaced by at least the minimum interval.
        let attempts = client.attempt_instants();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= Duration::from_secs(2),
                "attempts closer than the minimum dispatch interval"
            );
        }

        let snapshot = service.snapshot();
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.running.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_recover_within_budget() {
        let client = ScriptedClient::new(Behavior::FailTimes { failures: 2 });
        let service = ShieldService::spawn(quick_config(), Arc::clone(&client) as Arc<dyn CloudClient>);
        let mut stream = service.subscribe();

        let receipt = service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        let completed = next_completion(&mut stream).await;

        assert_eq!(completed, receipt.id);
        // Two failures, then the successful third attempt.
        assert_eq!(client.attempt_instants().len(), 3);
    }

    // ------------------------------------------------------------------ terminal failure

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_after_exact_attempt_budget() {
        let client = ScriptedClient::new(Behavior::AlwaysError);
        let service = ShieldService::spawn(quick_config(), Arc::clone(&client) as Arc<dyn CloudClient>);
        let mut stream = service.subscribe();

        let receipt = service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();

        let (failed_id, error, retries) = loop {
            if let ShieldEvent::RequestFailed { id, error, retries, .. } = next_event(&mut stream).await {
                break (id, error, retries);
            }
        };
        assert_eq!(failed_id, receipt.id);
        assert_eq!(retries, 3);
        assert!(error.contains("injected failure"));

        // max_retries + 1 attempts, each backoff growing with the attempt
        // number (5 s, 10 s, 15 s).
        let attempts = client.attempt_instants();
        assert_eq!(attempts.len(), 4);
        for (i, pair) in attempts.windows(2).enumerate() {
            let backoff = Duration::from_secs(5) * (i as u32 + 1);
            assert!(
                pair[1].duration_since(pair[0]) >= backoff,
                "attempt {} retried before its backoff elapsed",
                i + 2
            );
        }

        // Never dispatched again without a fresh submit.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.attempt_instants().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_a_failed_attempt() {
        let config = ShieldConfig {
            dispatch_timeout: Duration::from_secs(1),
            max_retries: 1,
            backoff_base: Duration::from_secs(1),
            ..quick_config()
        };
        let client = ScriptedClient::new(Behavior::NeverRespond);
        let service = ShieldService::spawn(config, Arc::clone(&client) as Arc<dyn CloudClient>);
        let mut stream = service.subscribe();

        service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();

        let (error, retries) = loop {
            if let ShieldEvent::RequestFailed { error, retries, .. } = next_event(&mut stream).await {
                break (error, retries);
            }
        };
        assert_eq!(retries, 1);
        assert!(error.contains("timed out"));
        assert_eq!(client.attempt_instants().len(), 2);
    }

    // ------------------------------------------------------------------ cancellation

    #[tokio::test(start_paused = true)]
    async fn cancelled_pending_request_never_runs() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::from_secs(10) });
        let service = ShieldService::spawn(quick_config(), Arc::clone(&client) as Arc<dyn CloudClient>);
        let mut stream = service.subscribe();

        let first = service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        let second = service.submit(RequestKind::Boiler, &boiler_params()).unwrap();

        // Let the dispatcher pick up the first request.
        while service.snapshot().running.is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // The running head cannot be cancelled; the pending one can.
        assert!(matches!(
            service.cancel(1),
            Err(ShieldError::NotCancelable { position: 1, .. })
        ));
        service.cancel(2).unwrap();

        let snapshot = service.snapshot();
        assert_eq!(snapshot.running.as_ref().map(|r| r.id), Some(first.id));
        assert!(snapshot.pending.is_empty());

        // The first request still completes; the cancelled one never appears.
        let completed = next_completion(&mut stream).await;
        assert_eq!(completed, first.id);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.attempt_instants().len(), 1);
        while let Some(event) = stream.try_recv() {
            if let ShieldEvent::RequestCompleted { id, .. } = event {
                assert_ne!(id, second.id, "cancelled request must never complete");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_renumbers_requests_behind_the_gap() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::from_secs(30) });
        let service = ShieldService::spawn(quick_config(), client);

        service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        let second = service.submit(RequestKind::Boiler, &boiler_params()).unwrap();
        let third = service
            .submit(RequestKind::ExportLimit, &json!({ "limit_watts": 2000, "confirm": true }))
            .unwrap();

        while service.snapshot().running.is_none() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        service.cancel(2).unwrap();

        let snapshot = service.snapshot();
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].id, third.id);
        assert_eq!(snapshot.pending[0].position, 2);
        assert!(snapshot.pending.iter().all(|r| r.id != second.id));
    }

    // ------------------------------------------------------------------ retention

    #[tokio::test(start_paused = true)]
    async fn settled_requests_purged_after_retention_window() {
        let config = ShieldConfig {
            capacity: 1,
            max_retries: 0,
            ..quick_config()
        };
        let client = ScriptedClient::new(Behavior::AlwaysError);
        let service = ShieldService::spawn(config, client);
        let mut stream = service.subscribe();

        service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        loop {
            if let ShieldEvent::RequestFailed { .. } = next_event(&mut stream).await {
                break;
            }
        }

        // The failed request still occupies its retention slot.
        assert!(matches!(
            service.submit(RequestKind::OperatingMode, &mode_params()),
            Err(ShieldError::QueueFull { capacity: 1 })
        ));

        // After the retention window plus a sweep tick, the slot frees up.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(service.submit(RequestKind::OperatingMode, &mode_params()).is_ok());
    }

    // ------------------------------------------------------------------ invariants

    #[tokio::test(start_paused = true)]
    async fn at_most_one_running_at_any_observed_instant() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::from_secs(5) });
        let service = ShieldService::spawn(quick_config(), client);

        for _ in 0..4 {
            service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();
        }

        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let snapshot = service.snapshot();
            assert!(
                snapshot
                    .pending
                    .iter()
                    .all(|r| r.status == RequestStatus::Pending)
            );
            if let Some(running) = &snapshot.running {
                assert_eq!(running.status, RequestStatus::Running);
                assert_eq!(running.position, 1);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_dispatching() {
        let client = ScriptedClient::new(Behavior::Succeed { latency: Duration::ZERO });
        let service = ShieldService::spawn(quick_config(), Arc::clone(&client) as Arc<dyn CloudClient>);

        service.shutdown();
        service.submit(RequestKind::OperatingMode, &mode_params()).unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(client.attempt_instants().is_empty());
        // Still queued; the queue is volatile by design and dies with the
        // process, not with the loops.
        assert_eq!(service.snapshot().pending.len(), 1);
    }
}

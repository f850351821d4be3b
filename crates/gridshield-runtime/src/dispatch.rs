//! Dispatch and retention loops.
//!
//! [`run`] is the single cooperative dispatch loop: exactly one instance per
//! service, so the downstream API never sees overlapping writes.  Each cycle
//! it waits for the pacer, promotes the head pending request to `Running`,
//! invokes the cloud client under a per-attempt timeout, and either settles
//! the request or backs off and retries the same request in place.
//!
//! [`sweep`] is the retention loop: it periodically drops settled requests
//! whose retention window has elapsed, independent of dispatch activity.
//!
//! Both loops suspend only on Tokio timers and the queue wake-up; the queue
//! mutex is held for structural operations only, never across an await.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use gridshield_types::{ControlIntent, ShieldError, ShieldEvent};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::CloudClient;
use crate::pacer::DispatchPacer;
use crate::service::ServiceState;

/// The dispatch loop.  Runs until shutdown; parks on the service's `Notify`
/// whenever no pending request is available.
pub(crate) async fn run(state: Arc<ServiceState>, client: Arc<dyn CloudClient>) {
    let mut pacer = DispatchPacer::new(state.config.min_dispatch_interval);

    loop {
        if state.shutdown.load(Ordering::Acquire) {
            debug!("dispatch loop stopping");
            return;
        }

        let Some((id, intent)) = state.lock_queue().front_pending() else {
            state.notify.notified().await;
            continue;
        };

        // Rate-limit the attempt start; the recorded timestamp covers this
        // attempt whatever its outcome.
        pacer.acquire().await;

        let snapshot = {
            let mut queue = state.lock_queue();
            if !queue.mark_running(id, state.clock.now()) {
                // The head changed while we waited on the pacer (the request
                // was cancelled).  Pick again.
                continue;
            }
            queue.snapshot()
        };
        state.bus.publish(ShieldEvent::QueueChanged { snapshot });
        info!(%id, kind = %intent.kind(), "dispatching control request");

        attempt_until_settled(&state, &mut pacer, client.as_ref(), id, &intent).await;
    }
}

/// Drive one running request through attempts until it settles.
///
/// The request keeps the head of the queue (and stays `Running` for
/// observers) across retries; no other pending request can jump ahead.
async fn attempt_until_settled(
    state: &ServiceState,
    pacer: &mut DispatchPacer,
    client: &dyn CloudClient,
    id: Uuid,
    intent: &ControlIntent,
) {
    let kind = intent.kind();
    let dispatch_started = Instant::now();

    loop {
        let outcome = match timeout(state.config.dispatch_timeout, client.invoke(intent)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ShieldError::DispatchTimeout {
                limit: state.config.dispatch_timeout,
            }),
        };

        match outcome {
            Ok(()) => {
                let snapshot = {
                    let mut queue = state.lock_queue();
                    queue.settle_completed(id, state.clock.now());
                    queue.snapshot()
                };
                let duration = dispatch_started.elapsed();
                info!(
                    %id,
                    %kind,
                    duration_ms = duration.as_millis() as u64,
                    "control request completed"
                );
                state
                    .bus
                    .publish(ShieldEvent::RequestCompleted { id, kind, duration });
                state.bus.publish(ShieldEvent::QueueChanged { snapshot });
                return;
            }
            Err(error) => {
                // The request must still be the running head; otherwise there
                // is nothing left to settle.
                let Some(retries_used) = state.lock_queue().retry_count(id) else {
                    return;
                };

                if retries_used < state.config.max_retries {
                    let attempt = state
                        .lock_queue()
                        .record_retry(id)
                        .unwrap_or(retries_used + 1);
                    let backoff = state.config.backoff_base * attempt;
                    warn!(
                        %id,
                        %kind,
                        %error,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "dispatch attempt failed; backing off before retry"
                    );
                    tokio::time::sleep(backoff).await;
                    pacer.acquire().await;
                } else {
                    let message = error.to_string();
                    let snapshot = {
                        let mut queue = state.lock_queue();
                        queue.settle_failed(id, state.clock.now(), message.clone());
                        queue.snapshot()
                    };
                    warn!(
                        %id,
                        %kind,
                        error = %message,
                        retries = retries_used,
                        "retry budget exhausted; request failed"
                    );
                    state.bus.publish(ShieldEvent::RequestFailed {
                        id,
                        kind,
                        error: message,
                        retries: retries_used,
                    });
                    state.bus.publish(ShieldEvent::QueueChanged { snapshot });
                    return;
                }
            }
        }
    }
}

/// The retention sweep.  Ticks at `purge_interval` and drops settled
/// requests older than the retention window, publishing a queue change when
/// anything was removed.
pub(crate) async fn sweep(state: Arc<ServiceState>) {
    let mut ticker = tokio::time::interval(state.config.purge_interval);
    // The first tick of an interval fires immediately; consume it so the
    // sweep is purely periodic.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if state.shutdown.load(Ordering::Acquire) {
            debug!("retention sweep stopping");
            return;
        }

        let snapshot = {
            let mut queue = state.lock_queue();
            let purged = queue.purge_settled(state.clock.now(), state.config.retention);
            if purged == 0 {
                None
            } else {
                debug!(purged, "purged settled requests past retention");
                Some(queue.snapshot())
            }
        };
        if let Some(snapshot) = snapshot {
            state.bus.publish(ShieldEvent::QueueChanged { snapshot });
        }
    }
}

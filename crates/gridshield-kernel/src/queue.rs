//! [`AdmissionQueue`] – bounded FIFO of admitted control requests.
//!
//! The queue holds every non-purged request: at most one `Running` entry at
//! the head, `Pending` entries behind it in submission order, and settled
//! (`Completed`/`Failed`) entries parked in a retention buffer until
//! [`AdmissionQueue::purge_settled`] drops them.
//!
//! Positions are 1-based ranks in the visible queue and are recomputed inside
//! every structural mutation, so the running item is always position 1 and
//! pending items follow contiguously.
//!
//! The queue has no interior locking and takes explicit timestamps; the
//! owning service wraps it in a mutex and supplies the clock.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use gridshield_kernel::AdmissionQueue;
//! use gridshield_types::{ControlIntent, OperatingMode};
//!
//! let mut queue = AdmissionQueue::new(50);
//! let intent = ControlIntent::SetOperatingMode { mode: OperatingMode::Eco };
//!
//! let (id, position) = queue.enqueue(intent, Utc::now()).unwrap();
//! assert_eq!(position, 1);
//!
//! // Position 1 is still pending, so it can be cancelled.
//! let removed = queue.cancel(1).unwrap();
//! assert_eq!(removed.id, id);
//! assert!(queue.is_empty());
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridshield_types::{
    ControlIntent, QueueSnapshot, QueuedRequest, RequestStatus, ShieldError,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default bound on admitted-but-unsettled requests.
pub const DEFAULT_CAPACITY: usize = 50;

/// Default retention of settled requests before purge.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// Bounded FIFO admission queue.  See the module docs for the invariants.
#[derive(Debug)]
pub struct AdmissionQueue {
    /// Pending requests plus the running head, in dispatch order.
    live: VecDeque<QueuedRequest>,
    /// Settled requests awaiting purge.
    settled: Vec<QueuedRequest>,
    capacity: usize,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: VecDeque::new(),
            settled: Vec::new(),
            capacity,
        }
    }

    /// Total non-purged requests (live + settled); counted against capacity.
    pub fn len(&self) -> usize {
        self.live.len() + self.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.settled.is_empty()
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Append a validated intent at the tail.
    ///
    /// Returns the new request's id and its 1-based position.  Rejects with
    /// [`ShieldError::QueueFull`] without mutating state when the capacity
    /// bound is reached.
    pub fn enqueue(
        &mut self,
        intent: ControlIntent,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, usize), ShieldError> {
        if self.len() >= self.capacity {
            warn!(capacity = self.capacity, "admission queue full; rejecting request");
            return Err(ShieldError::QueueFull {
                capacity: self.capacity,
            });
        }
        let id = Uuid::new_v4();
        let targets = intent.targets();
        let kind = intent.kind();
        self.live.push_back(QueuedRequest {
            id,
            kind,
            intent,
            targets,
            status: RequestStatus::Pending,
            queued_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error: None,
            position: 0,
        });
        self.renumber();
        let position = self.live.len();
        debug!(%id, %kind, position, "request admitted");
        Ok((id, position))
    }

    /// Remove the `Pending` request at `position`.
    ///
    /// Fails explicitly when the position refers to the running item, so a
    /// caller can never silently no-op on a live operation, and when no
    /// request holds the position (settled requests are not addressable).
    pub fn cancel(&mut self, position: usize) -> Result<QueuedRequest, ShieldError> {
        let index = position
            .checked_sub(1)
            .filter(|i| *i < self.live.len())
            .ok_or_else(|| ShieldError::NotCancelable {
                position,
                reason: "no queued request at this position".to_string(),
            })?;
        if self.live[index].status == RequestStatus::Running {
            return Err(ShieldError::NotCancelable {
                position,
                reason: "request is already running; wait for it to settle".to_string(),
            });
        }
        // Guaranteed Some: index is in bounds.
        let removed = self.live.remove(index).ok_or(ShieldError::NotCancelable {
            position,
            reason: "no queued request at this position".to_string(),
        })?;
        self.renumber();
        Ok(removed)
    }

    /// Drop settled requests whose settlement is older than `retention`.
    ///
    /// Runs independently of dispatch activity; returns the number purged.
    pub fn purge_settled(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.settled.len();
        self.settled.retain(|request| {
            request
                .completed_at
                .map(|settled_at| {
                    // A clock step backwards makes the age negative; treat the
                    // entry as fresh rather than purging it early.
                    now.signed_duration_since(settled_at)
                        .to_std()
                        .map(|age| age < retention)
                        .unwrap_or(true)
                })
                .unwrap_or(false)
        });
        before - self.settled.len()
    }

    // -------------------------------------------------------------------------
    // Dispatch-loop accessors
    // -------------------------------------------------------------------------

    /// The head request, if it is `Pending` and ready to dispatch.
    pub fn front_pending(&self) -> Option<(Uuid, ControlIntent)> {
        self.live
            .front()
            .filter(|request| request.status == RequestStatus::Pending)
            .map(|request| (request.id, request.intent.clone()))
    }

    /// Transition the head request to `Running`.
    ///
    /// Returns `false` when the head is no longer the expected request (it
    /// was cancelled while the dispatcher waited for the rate limiter).
    pub fn mark_running(&mut self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.live.front_mut() {
            Some(request) if request.id == id && request.status == RequestStatus::Pending => {
                request.status = RequestStatus::Running;
                request.started_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Current retry count of the running head, if `id` still heads the queue.
    pub fn retry_count(&self, id: Uuid) -> Option<u32> {
        self.running_head(id).map(|request| request.retry_count)
    }

    /// Record one more failed attempt on the running head.  Returns the new
    /// count.  The request stays `Running`; retrying never surrenders the
    /// head position to other pending requests.
    pub fn record_retry(&mut self, id: Uuid) -> Option<u32> {
        match self.live.front_mut() {
            Some(request) if request.id == id && request.status == RequestStatus::Running => {
                request.retry_count += 1;
                Some(request.retry_count)
            }
            _ => None,
        }
    }

    /// Settle the running head as `Completed` and park it for retention.
    pub fn settle_completed(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<QueuedRequest> {
        self.settle(id, now, RequestStatus::Completed, None)
    }

    /// Settle the running head as `Failed`, recording the terminal error.
    pub fn settle_failed(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
        error: String,
    ) -> Option<QueuedRequest> {
        self.settle(id, now, RequestStatus::Failed, Some(error))
    }

    fn settle(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
        status: RequestStatus,
        error: Option<String>,
    ) -> Option<QueuedRequest> {
        let head = self.live.front()?;
        if head.id != id || head.status != RequestStatus::Running {
            return None;
        }
        // Guaranteed Some: front() was Some above.
        let mut request = self.live.pop_front()?;
        request.status = status;
        request.completed_at = Some(now);
        request.error = error;
        self.settled.push(request.clone());
        self.renumber();
        Some(request)
    }

    fn running_head(&self, id: Uuid) -> Option<&QueuedRequest> {
        self.live
            .front()
            .filter(|request| request.id == id && request.status == RequestStatus::Running)
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Point-in-time view: the running item (if any) plus pending requests in
    /// dispatch order.
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::default();
        for request in &self.live {
            match request.status {
                RequestStatus::Running => snapshot.running = Some(request.clone()),
                RequestStatus::Pending => snapshot.pending.push(request.clone()),
                // Settled requests live in the retention buffer, never here.
                RequestStatus::Completed | RequestStatus::Failed => {}
            }
        }
        snapshot
    }

    /// Recompute contiguous 1-based positions across the live queue.
    fn renumber(&mut self) {
        for (index, request) in self.live.iter_mut().enumerate() {
            request.position = index + 1;
        }
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

//! [`StatusBus`] – publish/subscribe channel for queue status.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so every subscriber
//! receives every [`ShieldEvent`] without any single subscriber blocking the
//! others.  Any number of UI surfaces, sensors, or planners can subscribe;
//! publication is best-effort and having zero subscribers is a normal
//! condition, not an error.
//!
//! Slow subscribers that fall behind the channel buffer observe a gap: the
//! wrapping [`EventStream`] logs the lag and resumes with the next event.
//! Since every [`ShieldEvent::QueueChanged`] carries a full snapshot, a
//! lagging consumer resynchronises on the very next queue change.

use gridshield_types::ShieldEvent;
use tokio::sync::broadcast;
use tracing::warn;

/// Default number of buffered events before old ones are dropped for slow
/// subscribers.
const DEFAULT_CAPACITY: usize = 256;

/// Shared status channel.  Clone it cheaply – all clones publish into the
/// same underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct StatusBus {
    sender: broadcast::Sender<ShieldEvent>,
}

impl StatusBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to all current subscribers.
    ///
    /// Returns the number of subscribers that were handed the event.  Zero
    /// subscribers is normal (nobody is watching yet) and returns `0`.
    pub fn publish(&self, event: ShieldEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events.
    ///
    /// Events published before the subscription are not delivered; consumers
    /// that need current state first call the service's snapshot and then
    /// follow the stream.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async event receiver obtained from [`StatusBus::subscribe`].
pub struct EventStream {
    receiver: broadcast::Receiver<ShieldEvent>,
}

impl EventStream {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has shut down and no further events will
    /// arrive.  A lagged subscriber logs the number of missed events and
    /// continues with the next available one.
    pub async fn recv(&mut self) -> Option<ShieldEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "status subscriber lagged; skipping to latest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant: the next already-buffered event, if any.
    pub fn try_recv(&mut self) -> Option<ShieldEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "status subscriber lagged; skipping to latest events");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }
}

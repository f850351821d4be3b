//! [`SimulatedClient`] – an in-process stand-in for the vendor cloud.
//!
//! Answers every control call after a fixed latency and can be scripted to
//! fail every n-th call, which is enough to watch the shield's pacing,
//! retry, and failure behaviour without touching real hardware.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gridshield_runtime::CloudClient;
use gridshield_types::{ControlIntent, ShieldError};
use tracing::debug;

/// Simulated device backend.
pub struct SimulatedClient {
    latency: Duration,
    /// Every n-th call errors; `0` disables injected failures.
    fail_every: u32,
    calls: AtomicU32,
}

impl SimulatedClient {
    pub fn new(latency: Duration, fail_every: u32) -> Self {
        Self {
            latency,
            fail_every,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CloudClient for SimulatedClient {
    async fn invoke(&self, intent: &ControlIntent) -> Result<(), ShieldError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency).await;

        if self.fail_every > 0 && call % self.fail_every == 0 {
            debug!(call, "simulated device fault");
            return Err(ShieldError::Api("simulated device fault".to_string()));
        }
        debug!(call, kind = %intent.kind(), "simulated device applied change");
        Ok(())
    }
}

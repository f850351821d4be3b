//! `gridshield-runtime` – The Dispatch Engine
//!
//! The execution half of gridshield: everything that happens after a request
//! is admitted, up to the single call into the vendor cloud.
//!
//! # Modules
//!
//! - [`service`] – [`ShieldService`][service::ShieldService]:
//!   the public facade.  Validates and admits submissions, owns the queue
//!   and the status bus, and runs the dispatch + retention loops.  Callers
//!   submit, cancel, snapshot, and subscribe through it and nothing else.
//! - [`dispatch`] – the cooperative dispatch loop: one request at a time,
//!   paced attempts, per-attempt timeouts, growing backoff between retries,
//!   and a periodic retention sweep for settled requests.
//! - [`pacer`] – [`DispatchPacer`][pacer::DispatchPacer]:
//!   single-timestamp rate limiter enforcing the minimum spacing between
//!   dispatch attempts, converting the vendor's undocumented throttling into
//!   predictable local backpressure.
//! - [`client`] – [`CloudClient`][client::CloudClient]:
//!   the one seam to the vendor cloud, with
//!   [`HttpCloudClient`][client::HttpCloudClient] as the reqwest-backed
//!   production implementation.
//! - [`config`] – [`ShieldConfig`][config::ShieldConfig]: runtime knobs.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export spans to any
//!   OTLP-compatible collector.

pub mod client;
pub mod config;
pub(crate) mod dispatch;
pub mod pacer;
pub mod service;
pub mod telemetry;

pub use client::{CloudClient, HttpCloudClient};
pub use config::ShieldConfig;
pub use pacer::DispatchPacer;
pub use service::{ShieldService, SubmitReceipt};
pub use telemetry::{init_tracing, TracerProviderGuard};

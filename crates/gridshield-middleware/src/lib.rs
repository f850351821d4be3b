//! `gridshield-middleware` – Status Plumbing
//!
//! Routes queue-status notifications from the dispatch runtime to any number
//! of consumers without caring what they render.
//!
//! # Modules
//!
//! - [`bus`] – [`StatusBus`][bus::StatusBus]: best-effort publish/subscribe
//!   channel for [`ShieldEvent`][gridshield_types::ShieldEvent]s, built on
//!   Tokio broadcast channels.  Consumers that prefer polling read the
//!   service snapshot instead; both views are always derivable from the
//!   events alone because every queue change carries a full snapshot.

pub mod bus;

pub use bus::{EventStream, StatusBus};

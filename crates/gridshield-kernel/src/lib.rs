//! `gridshield-kernel` – Admission Control
//!
//! The protective core of gridshield.  It does not talk to the cloud; it
//! decides what is allowed to.
//!
//! # Modules
//!
//! - [`validator`] – [`Validator`][validator::Validator]:
//!   pure, synchronous per-kind validation of submitted parameters (required
//!   fields, enumerated values, the explicit confirmation flag, configurable
//!   numeric ranges).  Rejections surface to the caller immediately and are
//!   never retried.
//! - [`queue`] – [`AdmissionQueue`][queue::AdmissionQueue]:
//!   the bounded FIFO of admitted requests.  Holds at most one `Running`
//!   entry, renumbers positions on every structural change, rejects
//!   cancellation of live operations, and retains settled requests for a
//!   purge window so consumers can still observe their outcome.

pub mod queue;
pub mod validator;

pub use queue::{AdmissionQueue, DEFAULT_CAPACITY, DEFAULT_RETENTION};
pub use validator::{Validator, ValidatorConfig};

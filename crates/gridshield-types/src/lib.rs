use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// The closed set of control kinds the shield accepts.
///
/// Every mutating request targets exactly one of these device controls.
/// Consumers key per-control UI state ("locked while changing") off this enum
/// rather than string matching on request descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Inverter operating mode (eco / timed / home-UPS).
    OperatingMode,
    /// Grid export behaviour (off / unlimited / limited).
    GridExport,
    /// Standalone grid-export power limit.
    ExportLimit,
    /// Boiler diverter mode.
    Boiler,
    /// Forced battery charge from grid.
    ForcedCharge,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::OperatingMode => "operating-mode",
            RequestKind::GridExport => "grid-export",
            RequestKind::ExportLimit => "export-limit",
            RequestKind::Boiler => "boiler",
            RequestKind::ForcedCharge => "forced-charge",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inverter operating modes accepted by the downstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    Eco,
    Timed,
    HomeUps,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Eco => "eco",
            OperatingMode::Timed => "timed",
            OperatingMode::HomeUps => "home-ups",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eco" => Some(OperatingMode::Eco),
            "timed" => Some(OperatingMode::Timed),
            "home-ups" => Some(OperatingMode::HomeUps),
            _ => None,
        }
    }
}

/// Grid export behaviours.  `Limited` carries a watt limit alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    Off,
    Unlimited,
    Limited,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Off => "off",
            ExportMode::Unlimited => "unlimited",
            ExportMode::Limited => "limited",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ExportMode::Off),
            "unlimited" => Some(ExportMode::Unlimited),
            "limited" => Some(ExportMode::Limited),
            _ => None,
        }
    }
}

/// Boiler diverter modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoilerMode {
    Off,
    HeatNow,
    Schedule,
}

impl BoilerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoilerMode::Off => "off",
            BoilerMode::HeatNow => "heat-now",
            BoilerMode::Schedule => "schedule",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "off" => Some(BoilerMode::Off),
            "heat-now" => Some(BoilerMode::HeatNow),
            "schedule" => Some(BoilerMode::Schedule),
            _ => None,
        }
    }
}

/// Strict definition of the device changes a caller may request.
///
/// Produced only by the validator; once constructed, an intent is known to be
/// well-formed (enumerated values legal, dependent fields present, numeric
/// limits inside the configured range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "change", rename_all = "kebab-case")]
pub enum ControlIntent {
    SetOperatingMode {
        mode: OperatingMode,
    },
    SetGridExport {
        mode: ExportMode,
        /// Present iff `mode == ExportMode::Limited`.
        limit_watts: Option<u32>,
    },
    SetExportLimit {
        limit_watts: u32,
    },
    SetBoilerMode {
        mode: BoilerMode,
    },
    SetForcedCharge {
        enable: bool,
        /// Present iff `enable`.
        duration_minutes: Option<u32>,
    },
}

impl ControlIntent {
    /// The [`RequestKind`] this intent mutates.
    pub fn kind(&self) -> RequestKind {
        match self {
            ControlIntent::SetOperatingMode { .. } => RequestKind::OperatingMode,
            ControlIntent::SetGridExport { .. } => RequestKind::GridExport,
            ControlIntent::SetExportLimit { .. } => RequestKind::ExportLimit,
            ControlIntent::SetBoilerMode { .. } => RequestKind::Boiler,
            ControlIntent::SetForcedCharge { .. } => RequestKind::ForcedCharge,
        }
    }

    /// Derive the ordered `(parameter, value)` target list.
    ///
    /// This list is the canonical, machine-parsable description of the change.
    /// Human-readable labels are derived from it by consumers; never the other
    /// way round.
    pub fn targets(&self) -> Vec<Target> {
        match self {
            ControlIntent::SetOperatingMode { mode } => {
                vec![Target::new("operating_mode", mode.as_str())]
            }
            ControlIntent::SetGridExport { mode, limit_watts } => {
                let mut targets = vec![Target::new("grid_export", mode.as_str())];
                if let Some(watts) = limit_watts {
                    targets.push(Target::new("export_limit_watts", watts.to_string()));
                }
                targets
            }
            ControlIntent::SetExportLimit { limit_watts } => {
                vec![Target::new("export_limit_watts", limit_watts.to_string())]
            }
            ControlIntent::SetBoilerMode { mode } => {
                vec![Target::new("boiler_mode", mode.as_str())]
            }
            ControlIntent::SetForcedCharge {
                enable,
                duration_minutes,
            } => {
                let mut targets = vec![Target::new(
                    "forced_charge",
                    if *enable { "on" } else { "off" },
                )];
                if let Some(minutes) = duration_minutes {
                    targets.push(Target::new("duration_minutes", minutes.to_string()));
                }
                targets
            }
        }
    }
}

/// A single `(parameter, value)` pair describing what a request changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub parameter: String,
    pub value: String,
}

impl Target {
    pub fn new(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    /// Parse a legacy free-text change list into targets.
    ///
    /// Older planner versions describe changes as lines of the form
    /// `parameter: 'old' → 'new'` (an ASCII `->` arrow is also accepted).
    /// Lines that do not match are skipped.  The parsed targets become the
    /// request's canonical representation; the text is discarded at this
    /// boundary and never consulted again.
    pub fn parse_change_list(text: &str) -> Vec<Target> {
        text.lines().filter_map(Self::parse_change_line).collect()
    }

    fn parse_change_line(line: &str) -> Option<Target> {
        let (name, rest) = line.split_once(':')?;
        let (_, new_value) = rest
            .split_once('→')
            .or_else(|| rest.split_once("->"))?;
        let parameter = name.trim();
        let value = new_value.trim().trim_matches(|c| c == '\'' || c == '"');
        if parameter.is_empty() || value.is_empty() {
            return None;
        }
        Some(Target::new(parameter, value))
    }
}

/// Lifecycle state of an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Admitted, waiting its turn.
    Pending,
    /// Currently being dispatched (including between retry attempts).
    Running,
    /// Settled successfully; awaiting purge.
    Completed,
    /// Settled after exhausting the retry budget; awaiting purge.
    Failed,
}

impl RequestStatus {
    /// `true` once the request can no longer change state.
    pub fn is_settled(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// One admitted control request and its full dispatch record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique id assigned at enqueue time; never reused.
    pub id: Uuid,
    pub kind: RequestKind,
    pub intent: ControlIntent,
    /// Canonical change description, derived from `intent` at enqueue.
    pub targets: Vec<Target>,
    pub status: RequestStatus,
    pub queued_at: DateTime<Utc>,
    /// Set when the request first transitions to `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the request settles (`Completed` or `Failed`).
    pub completed_at: Option<DateTime<Utc>>,
    /// Dispatch attempts beyond the first (0-based).
    pub retry_count: u32,
    /// Last failure reason; set only once the request reaches `Failed`.
    pub error: Option<String>,
    /// 1-based rank in the visible queue; the running item is always 1.
    pub position: usize,
}

/// Point-in-time view of the visible queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending: Vec<QueuedRequest>,
    pub running: Option<QueuedRequest>,
}

impl QueueSnapshot {
    /// `true` when any request for `kind` is pending or running, i.e. the
    /// corresponding control should be rendered as locked.
    pub fn is_kind_busy(&self, kind: RequestKind) -> bool {
        self.running.as_ref().is_some_and(|r| r.kind == kind)
            || self.pending.iter().any(|r| r.kind == kind)
    }
}

/// Notifications emitted whenever queue composition or a request's status
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShieldEvent {
    /// Queue composition changed; carries the full new snapshot.
    QueueChanged { snapshot: QueueSnapshot },
    /// A request settled successfully.
    RequestCompleted {
        id: Uuid,
        kind: RequestKind,
        /// Wall time from dispatch start to completion, retries included.
        duration: Duration,
    },
    /// A request exhausted its retry budget.
    RequestFailed {
        id: Uuid,
        kind: RequestKind,
        error: String,
        retries: u32,
    },
}

/// Reasons a submission is rejected before it enters the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The explicit confirmation flag was absent or not `true`.  Kept distinct
    /// from every bad-value variant so callers can tell the user "you must
    /// explicitly confirm this change".
    #[error("request not confirmed: set \"confirm\": true to apply this change")]
    NotConfirmed,

    #[error("missing required field \"{field}\"")]
    MissingField { field: &'static str },

    #[error("field \"{field}\" must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field \"{field}\" has unknown value \"{value}\"")]
    UnknownValue { field: &'static str, value: String },

    #[error("field \"{field}\" value {value} outside allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },
}

/// Global error type spanning validation rejections, admission failures, and
/// dispatch faults.
#[derive(Error, Debug)]
pub enum ShieldError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("queue is full ({capacity} requests)")]
    QueueFull { capacity: usize },

    #[error("request at position {position} cannot be cancelled: {reason}")]
    NotCancelable { position: usize, reason: String },

    #[error("dispatch attempt timed out after {limit:?}")]
    DispatchTimeout { limit: Duration },

    #[error("cloud API error: {0}")]
    Api(String),
}

//! Record types for the dispatch logbook.
//!
//! Two persisted collections (dispatches, scans) plus the derived
//! per-part summary. Field sets are closed; anything the store writes
//! is represented here explicitly rather than passed through as loose
//! maps.

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use uuid::Uuid;

/// Dispatch lifecycle state. A dispatch never returns to `Draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Accepting scan mutations freely.
    Draft,
    /// Sealed by finalize; scan set and totals are the permanent record.
    Completed,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Recognition status of a scan record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Accepted,
    Rejected,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACCEPTED" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Where a scan record came from.
///
/// Manual corrections are a first-class variant rather than a sentinel
/// value smuggled through the OCR raw-text field.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanProvenance {
    /// Captured via image recognition.
    Ocr { raw_text: String, confidence: f64 },
    /// Hand-entered by the operator.
    Manual,
}

impl ScanProvenance {
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// One outbound shipment batch being assembled and tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Process-generated unique token, immutable.
    pub id: String,
    /// Global monotonic integer surrogate key. Offline drafts carry 0
    /// until the rename path assigns the real number.
    pub dispatch_no: i64,
    /// Human-readable business key (`DSP-YYMMDD-NN`, or `DRAFT-XXXXXXXX`
    /// for drafts created before their final id is known).
    pub dispatch_id: String,
    pub operator_id: String,
    pub customer_name: String,
    pub driver_name: String,
    pub driver_mobile: String,
    pub vehicle_no: String,
    pub lr_no: String,
    pub start_time: DateTime<Utc>,
    /// Set only on finalize.
    pub end_time: Option<DateTime<Utc>>,
    pub status: DispatchStatus,
    /// Derived. Always equals a fresh recomputation from the scan set;
    /// written only by `summary::recompute_totals`.
    pub total_boxes_cached: i64,
    pub total_qty_cached: i64,
    pub parts_count_cached: i64,
    pub sheets_synced: bool,
    pub sheets_synced_at: Option<DateTime<Utc>>,
    /// Set when a COMPLETED dispatch's scans are mutated after finalize;
    /// previously generated exports are no longer trustworthy.
    pub exports_outdated: bool,
}

/// One recorded box, either from image capture or manual entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: String,
    /// References `Dispatch::dispatch_id`.
    pub dispatch_id: String,
    pub timestamp: DateTime<Utc>,
    pub part_no: String,
    pub part_name: String,
    /// Quantity in this box. Box count per part is the count of records
    /// sharing `part_no`; there is no separate box entity.
    pub qty_nos: i64,
    pub status: ScanStatus,
    pub provenance: ScanProvenance,
}

/// Derived per-part rollup within a dispatch. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PartSummary {
    pub part_no: String,
    pub part_name: String,
    pub boxes: i64,
    pub total_qty: i64,
    /// True if any contributing scan was hand-entered.
    pub is_manual: bool,
}

/// Fields an OCR capture or manual form provides for a new scan.
#[derive(Debug, Clone)]
pub struct ScanInput {
    pub part_no: String,
    pub part_name: String,
    pub qty_nos: i64,
    pub provenance: ScanProvenance,
}

/// Prefix for finalized dispatch ids.
pub const DISPATCH_ID_PREFIX: &str = "DSP";

/// Prefix for temporary ids of drafts created before their sequence is known.
pub const DRAFT_ID_PREFIX: &str = "DRAFT-";

/// Date-only counter key (`YYMMDD`).
pub fn day_key(date: NaiveDate) -> String {
    date.format("%y%m%d").to_string()
}

/// Build the human-readable id for a given day and daily sequence,
/// e.g. `DSP-240101-03`.
pub fn dispatch_id_for_day(day_key: &str, seq: i64) -> String {
    format!("{DISPATCH_ID_PREFIX}-{day_key}-{seq:02}")
}

/// Temporary id for a dispatch created before its final id is known.
pub fn draft_dispatch_id(token: Uuid) -> String {
    let hex = token.simple().to_string();
    format!("{DRAFT_ID_PREFIX}{}", hex[..8].to_uppercase())
}

/// Whether a dispatch id is a temporary draft placeholder.
pub fn is_draft_id(dispatch_id: &str) -> bool {
    dispatch_id.starts_with(DRAFT_ID_PREFIX)
}

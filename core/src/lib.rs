//! Dispatch logbook core
//!
//! Persistence and reconciliation engine for a packing-and-dispatch
//! logbook:
//! - Allocates monotonic dispatch numbers and per-day sequences from
//!   SQLite counters (issued numbers are never reused)
//! - Stores dispatches and their box scans with cached totals
//! - Drives the `DRAFT → COMPLETED` lifecycle (finalize, discard,
//!   corrections, manual entries)
//! - Reconciles completed dispatches against a spreadsheet webhook,
//!   with duplicate suppression and draft-identity adoption
//!
//! The UI layer (CLI here) talks only to [`DispatchController`] and the
//! sync module; the store is an implementation detail.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod model;
pub mod store;
pub mod summary;
pub mod sync;

pub use config::{AppConfig, OcrConfig, SyncConfig};
pub use errors::{DispatchError, Result};
pub use lifecycle::{DispatchController, NewDispatch};
pub use model::{
    Dispatch, DispatchStatus, PartSummary, ScanInput, ScanProvenance, ScanRecord, ScanStatus,
    day_key, dispatch_id_for_day, draft_dispatch_id, is_draft_id,
};
pub use store::{DispatchFilter, DispatchStore};
pub use summary::{recompute_totals, summarize};
pub use sync::{AssignedIdentity, SyncClient, SyncOutcome, SyncPayload, build_payload, sync_dispatch};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

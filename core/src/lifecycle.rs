//! Dispatch lifecycle controller.
//!
//! Orchestrates the `DRAFT → COMPLETED` state machine over the store,
//! allocator, and aggregation engine. One screen owns one active
//! dispatch at a time; no two mutations to the same dispatch run
//! concurrently, so the controller awaits each scan mutation before
//! recomputing totals and needs no locking.

use chrono::Duration;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::DispatchError;
use crate::errors::Result;
use crate::model::Dispatch;
use crate::model::DispatchStatus;
use crate::model::PartSummary;
use crate::model::ScanInput;
use crate::model::ScanProvenance;
use crate::model::ScanRecord;
use crate::model::ScanStatus;
use crate::model::day_key;
use crate::model::dispatch_id_for_day;
use crate::model::draft_dispatch_id;
use crate::model::is_draft_id;
use crate::store::DispatchFilter;
use crate::store::DispatchStore;
use crate::summary;

/// Customer and logistics details confirmed by the operator before
/// scanning starts.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub customer_name: String,
    pub operator_id: String,
    pub driver_name: String,
    pub driver_mobile: String,
    pub vehicle_no: String,
    pub lr_no: String,
}

pub struct DispatchController {
    store: DispatchStore,
}

impl DispatchController {
    pub fn new(store: DispatchStore) -> Self {
        Self { store }
    }

    /// Create a DRAFT dispatch: allocates the global dispatch number and
    /// today's daily sequence together, so both identifiers correspond
    /// to the same moment. If anything fails after the number was
    /// issued, the number is simply skipped — gaps are acceptable,
    /// duplicate ids are not.
    pub fn create_draft(&mut self, req: NewDispatch) -> Result<Dispatch> {
        let now = Utc::now();
        let dispatch_no = self.store.next_dispatch_no()?;
        let key = day_key(now.date_naive());
        let seq = self.store.next_daily_seq(&key)?;

        let dispatch = Dispatch {
            id: Uuid::new_v4().to_string(),
            dispatch_no,
            dispatch_id: dispatch_id_for_day(&key, seq),
            operator_id: req.operator_id,
            customer_name: req.customer_name,
            driver_name: req.driver_name,
            driver_mobile: req.driver_mobile,
            vehicle_no: req.vehicle_no,
            lr_no: req.lr_no,
            start_time: now,
            end_time: None,
            status: DispatchStatus::Draft,
            total_boxes_cached: 0,
            total_qty_cached: 0,
            parts_count_cached: 0,
            sheets_synced: false,
            sheets_synced_at: None,
            exports_outdated: false,
        };

        self.store.create_dispatch(&dispatch)?;
        tracing::info!(
            dispatch_id = %dispatch.dispatch_id,
            dispatch_no,
            customer = %dispatch.customer_name,
            "Created draft dispatch"
        );
        Ok(dispatch)
    }

    /// Create a DRAFT dispatch without consuming any counter: it
    /// carries the placeholder number 0 and a `DRAFT-*` id until
    /// `resolve_draft_identity` (or the webhook's assignment on sync)
    /// gives it a final identity. For records that must exist before a
    /// sequence can be issued, e.g. imported batches.
    pub fn create_offline_draft(&mut self, req: NewDispatch) -> Result<Dispatch> {
        let token = Uuid::new_v4();
        let dispatch = Dispatch {
            id: token.to_string(),
            dispatch_no: 0,
            dispatch_id: draft_dispatch_id(token),
            operator_id: req.operator_id,
            customer_name: req.customer_name,
            driver_name: req.driver_name,
            driver_mobile: req.driver_mobile,
            vehicle_no: req.vehicle_no,
            lr_no: req.lr_no,
            start_time: Utc::now(),
            end_time: None,
            status: DispatchStatus::Draft,
            total_boxes_cached: 0,
            total_qty_cached: 0,
            parts_count_cached: 0,
            sheets_synced: false,
            sheets_synced_at: None,
            exports_outdated: false,
        };

        self.store.create_dispatch(&dispatch)?;
        tracing::info!(
            dispatch_id = %dispatch.dispatch_id,
            customer = %dispatch.customer_name,
            "Created offline draft dispatch"
        );
        Ok(dispatch)
    }

    /// Record one scanned box and refresh the cached totals.
    pub fn add_scan(&mut self, dispatch_id: &str, input: ScanInput) -> Result<ScanRecord> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "add a scan to")?;

        let scan = ScanRecord {
            id: Uuid::new_v4().to_string(),
            dispatch_id: dispatch_id.to_string(),
            timestamp: Utc::now(),
            part_no: input.part_no,
            part_name: input.part_name,
            qty_nos: input.qty_nos,
            status: ScanStatus::Accepted,
            provenance: input.provenance,
        };

        self.store.add_scan(&scan)?;
        summary::recompute_totals(&self.store, dispatch_id)?;
        Ok(scan)
    }

    /// Remove the single most recently captured scan for a part — a
    /// "remove 1 box" correction undoes the latest capture, not an
    /// arbitrary one. No-op if the part has no scans.
    pub fn remove_one_scan(&mut self, dispatch_id: &str, part_no: &str) -> Result<()> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "remove a scan from")?;

        let scans = self.store.list_scans(dispatch_id)?;
        let latest = scans
            .iter()
            .filter(|s| s.part_no == part_no)
            .max_by_key(|s| s.timestamp);

        let Some(latest) = latest else {
            return Ok(());
        };

        self.store.delete_scan(&latest.id)?;
        summary::recompute_totals(&self.store, dispatch_id)?;
        Ok(())
    }

    /// Remove every scan for one part and refresh the cached totals.
    pub fn remove_all_scans_for_part(&mut self, dispatch_id: &str, part_no: &str) -> Result<()> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "remove scans from")?;

        let removed = self.store.delete_scans_for_part(dispatch_id, part_no)?;
        if removed > 0 {
            summary::recompute_totals(&self.store, dispatch_id)?;
        }
        Ok(())
    }

    /// Create `boxes` hand-entered scan records of `qty_per_box` each.
    /// Timestamps are strictly increasing so "remove most recent" is
    /// never ambiguous; totals are recomputed once for the whole batch.
    pub fn add_manual_entries(
        &mut self,
        dispatch_id: &str,
        part_no: &str,
        part_name: &str,
        boxes: u32,
        qty_per_box: i64,
    ) -> Result<Vec<ScanRecord>> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "add manual entries to")?;

        if boxes == 0 {
            return Ok(Vec::new());
        }

        let part_no = part_no.trim().to_uppercase();
        let part_name = if part_name.trim().is_empty() {
            part_no.clone()
        } else {
            part_name.trim().to_uppercase()
        };

        let base = Utc::now();
        let mut created = Vec::with_capacity(boxes as usize);
        for i in 0..boxes {
            let scan = ScanRecord {
                id: Uuid::new_v4().to_string(),
                dispatch_id: dispatch_id.to_string(),
                timestamp: base + Duration::milliseconds(i64::from(i)),
                part_no: part_no.clone(),
                part_name: part_name.clone(),
                qty_nos: qty_per_box,
                status: ScanStatus::Accepted,
                provenance: ScanProvenance::Manual,
            };
            self.store.add_scan(&scan)?;
            created.push(scan);
        }

        summary::recompute_totals(&self.store, dispatch_id)?;
        tracing::debug!(dispatch_id, part_no = %part_no, boxes, "Added manual entries");
        Ok(created)
    }

    /// Seal the dispatch: snapshot `end_time` and the three cached
    /// totals from a fresh recompute. Rejects an empty scan set and a
    /// second finalize.
    pub fn finalize(&mut self, dispatch_id: &str) -> Result<Dispatch> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "finalize")?;

        let scans = self.store.list_scans(dispatch_id)?;
        if scans.is_empty() {
            return Err(DispatchError::invalid_transition(format!(
                "dispatch {dispatch_id} has no scans to finalize"
            )));
        }

        // Snapshot from a fresh recompute, never from possibly-stale
        // cached values.
        let mut dispatch = summary::recompute_totals(&self.store, dispatch_id)?;
        dispatch.status = DispatchStatus::Completed;
        dispatch.end_time = Some(Utc::now());
        self.store.update_dispatch(&dispatch)?;

        tracing::info!(
            dispatch_id,
            boxes = dispatch.total_boxes_cached,
            qty = dispatch.total_qty_cached,
            "Finalized dispatch"
        );
        Ok(dispatch)
    }

    /// Delete a DRAFT dispatch and all its scans atomically. Finalized
    /// data is not discardable through this path.
    pub fn discard(&mut self, dispatch_id: &str) -> Result<()> {
        let dispatch = self.require_dispatch(dispatch_id)?;
        ensure_draft(&dispatch, "discard")?;
        self.store.delete_dispatch_cascade(dispatch_id)
    }

    /// Record a successful (or skipped-as-duplicate) sync on the local
    /// dispatch.
    pub fn mark_synced(&mut self, dispatch_id: &str) -> Result<Dispatch> {
        let mut dispatch = self.require_dispatch(dispatch_id)?;
        dispatch.sheets_synced = true;
        dispatch.sheets_synced_at = Some(Utc::now());
        self.store.update_dispatch(&dispatch)?;
        Ok(dispatch)
    }

    /// Adopt an externally assigned identity for a `DRAFT-*` dispatch:
    /// rewrites the business key onto the dispatch and every scan, and
    /// marks it synced, in one transaction.
    pub fn adopt_final_identity(
        &mut self,
        old_id: &str,
        new_id: &str,
        new_no: i64,
    ) -> Result<Dispatch> {
        let dispatch = self.require_dispatch(old_id)?;
        if !is_draft_id(&dispatch.dispatch_id) {
            return Err(DispatchError::invalid_transition(format!(
                "dispatch {old_id} already has a final identity"
            )));
        }

        self.store
            .rename_dispatch(old_id, new_id, new_no, Utc::now())?;
        self.require_dispatch(new_id)
    }

    /// Resolve a `DRAFT-*` dispatch's final identity against the local
    /// allocator (offline-created drafts that never reached the
    /// webhook).
    pub fn resolve_draft_identity(&mut self, old_id: &str) -> Result<Dispatch> {
        let dispatch = self.require_dispatch(old_id)?;
        if !is_draft_id(&dispatch.dispatch_id) {
            return Err(DispatchError::invalid_transition(format!(
                "dispatch {old_id} already has a final identity"
            )));
        }

        let new_no = self.store.next_dispatch_no()?;
        let key = day_key(Utc::now().date_naive());
        let seq = self.store.next_daily_seq(&key)?;
        self.adopt_final_identity(old_id, &dispatch_id_for_day(&key, seq), new_no)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn dispatch(&self, dispatch_id: &str) -> Result<Dispatch> {
        self.require_dispatch(dispatch_id)
    }

    /// Scans for a dispatch in capture order.
    pub fn scans(&self, dispatch_id: &str) -> Result<Vec<ScanRecord>> {
        let mut scans = self.store.list_scans(dispatch_id)?;
        scans.sort_by_key(|s| s.timestamp);
        Ok(scans)
    }

    /// Per-part summaries in capture order of each part's first scan.
    pub fn summaries(&self, dispatch_id: &str) -> Result<Vec<PartSummary>> {
        Ok(summary::summarize(&self.scans(dispatch_id)?))
    }

    pub fn list(&self, filter: &DispatchFilter) -> Result<Vec<Dispatch>> {
        self.store.list_dispatches(filter)
    }

    fn require_dispatch(&self, dispatch_id: &str) -> Result<Dispatch> {
        self.store
            .get_dispatch(dispatch_id)?
            .ok_or_else(|| DispatchError::not_found(format!("dispatch {dispatch_id}")))
    }
}

fn ensure_draft(dispatch: &Dispatch, action: &str) -> Result<()> {
    if dispatch.status == DispatchStatus::Completed {
        return Err(DispatchError::invalid_transition(format!(
            "cannot {action} completed dispatch {}",
            dispatch.dispatch_id
        )));
    }
    Ok(())
}

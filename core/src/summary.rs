//! Per-part aggregation and the cached-totals recompute.
//!
//! `recompute_totals` is the only code path allowed to write the three
//! denormalized totals on a dispatch. Any mutation path that touches
//! scans without going through it is a bug.

use crate::errors::DispatchError;
use crate::errors::Result;
use crate::model::Dispatch;
use crate::model::DispatchStatus;
use crate::model::PartSummary;
use crate::model::ScanRecord;
use crate::store::DispatchStore;

/// Group scans by part number, in first-seen order of the input.
///
/// `boxes` is the record count, `total_qty` the quantity sum. The part
/// name comes from the first-seen record; callers needing deterministic
/// output sort the input first. `is_manual` is set if any contributing
/// scan was hand-entered.
pub fn summarize(scans: &[ScanRecord]) -> Vec<PartSummary> {
    let mut summaries: Vec<PartSummary> = Vec::new();

    for scan in scans {
        match summaries.iter_mut().find(|s| s.part_no == scan.part_no) {
            Some(entry) => {
                entry.boxes += 1;
                entry.total_qty += scan.qty_nos;
                entry.is_manual |= scan.provenance.is_manual();
            }
            None => summaries.push(PartSummary {
                part_no: scan.part_no.clone(),
                part_name: scan.part_name.clone(),
                boxes: 1,
                total_qty: scan.qty_nos,
                is_manual: scan.provenance.is_manual(),
            }),
        }
    }

    summaries
}

/// Refresh a dispatch's cached totals from its current scan set and
/// persist them. Returns the updated dispatch.
///
/// If the dispatch is already COMPLETED, the mutation that triggered
/// this recompute happened after finalize, so any previously generated
/// export is flagged outdated.
pub fn recompute_totals(store: &DispatchStore, dispatch_id: &str) -> Result<Dispatch> {
    let mut dispatch = store
        .get_dispatch(dispatch_id)?
        .ok_or_else(|| DispatchError::not_found(format!("dispatch {dispatch_id}")))?;

    let scans = store.list_scans(dispatch_id)?;

    let mut parts: Vec<&str> = scans.iter().map(|s| s.part_no.as_str()).collect();
    parts.sort_unstable();
    parts.dedup();

    dispatch.total_boxes_cached = scans.len() as i64;
    dispatch.total_qty_cached = scans.iter().map(|s| s.qty_nos).sum();
    dispatch.parts_count_cached = parts.len() as i64;

    if dispatch.status == DispatchStatus::Completed {
        dispatch.exports_outdated = true;
    }

    store.update_dispatch(&dispatch)?;

    tracing::debug!(
        dispatch_id,
        boxes = dispatch.total_boxes_cached,
        qty = dispatch.total_qty_cached,
        parts = dispatch.parts_count_cached,
        "Recomputed dispatch totals"
    );

    Ok(dispatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScanProvenance;
    use crate::model::ScanStatus;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn draft_in(store: &DispatchStore, dispatch_id: &str, dispatch_no: i64) -> Dispatch {
        let dispatch = Dispatch {
            id: uuid::Uuid::new_v4().to_string(),
            dispatch_no,
            dispatch_id: dispatch_id.to_string(),
            operator_id: "OP1".to_string(),
            customer_name: "ACME".to_string(),
            driver_name: "R. Kumar".to_string(),
            driver_mobile: "9000000000".to_string(),
            vehicle_no: "MH14AB1234".to_string(),
            lr_no: "LR-77".to_string(),
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
        store.create_dispatch(&dispatch).expect("create dispatch");
        dispatch
    }

    fn scan(part_no: &str, qty: i64, manual: bool) -> ScanRecord {
        ScanRecord {
            id: uuid::Uuid::new_v4().to_string(),
            dispatch_id: "DSP-240101-01".to_string(),
            timestamp: Utc::now(),
            part_no: part_no.to_string(),
            part_name: format!("{part_no} NAME"),
            qty_nos: qty,
            status: ScanStatus::Accepted,
            provenance: if manual {
                ScanProvenance::Manual
            } else {
                ScanProvenance::Ocr {
                    raw_text: String::new(),
                    confidence: 0.9,
                }
            },
        }
    }

    #[test]
    fn test_summarize_groups_in_first_seen_order() {
        let scans = vec![
            scan("P100", 10, false),
            scan("P200", 5, false),
            scan("P100", 10, false),
            scan("P100", 10, false),
        ];

        let summaries = summarize(&scans);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].part_no, "P100");
        assert_eq!(summaries[0].boxes, 3);
        assert_eq!(summaries[0].total_qty, 30);
        assert_eq!(summaries[1].part_no, "P200");
        assert_eq!(summaries[1].boxes, 1);
        assert_eq!(summaries[1].total_qty, 5);
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(&[]).is_empty());
    }

    #[test]
    fn test_manual_flag_set_by_any_contributor() {
        // Manual scan is not first in the group; the flag must still be set
        let scans = vec![scan("P100", 10, false), scan("P100", 10, true)];
        let summaries = summarize(&scans);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].is_manual);

        let scans = vec![scan("P100", 10, false), scan("P100", 10, false)];
        assert!(!summarize(&scans)[0].is_manual);
    }

    #[test]
    fn test_recompute_totals_matches_scan_set() {
        let store = DispatchStore::open_in_memory().expect("open");
        let dispatch = draft_in(&store, "DSP-240101-01", 1);

        for s in [
            scan("P100", 10, false),
            scan("P100", 10, false),
            scan("P200", 5, true),
        ] {
            store.add_scan(&s).expect("add");
        }

        let updated = recompute_totals(&store, &dispatch.dispatch_id).expect("recompute");
        assert_eq!(updated.total_boxes_cached, 3);
        assert_eq!(updated.total_qty_cached, 25);
        assert_eq!(updated.parts_count_cached, 2);
        assert!(!updated.exports_outdated);

        // And again after a removal
        let scans = store.list_scans("DSP-240101-01").expect("list");
        let victim = scans.iter().find(|s| s.part_no == "P200").expect("scan");
        store.delete_scan(&victim.id).expect("delete");

        let updated = recompute_totals(&store, "DSP-240101-01").expect("recompute");
        assert_eq!(updated.total_boxes_cached, 2);
        assert_eq!(updated.total_qty_cached, 20);
        assert_eq!(updated.parts_count_cached, 1);
    }

    #[test]
    fn test_recompute_on_completed_flags_exports_outdated() {
        let store = DispatchStore::open_in_memory().expect("open");
        let mut dispatch = draft_in(&store, "DSP-240101-01", 1);
        dispatch.status = DispatchStatus::Completed;
        dispatch.end_time = Some(Utc::now());
        store.update_dispatch(&dispatch).expect("update");

        // A store-level edit after finalize, then recompute
        store.add_scan(&scan("P100", 10, false)).expect("add");
        let updated = recompute_totals(&store, "DSP-240101-01").expect("recompute");
        assert!(updated.exports_outdated);
        assert_eq!(updated.total_boxes_cached, 1);
    }

    #[test]
    fn test_recompute_missing_dispatch_is_not_found() {
        let store = DispatchStore::open_in_memory().expect("open");
        let err = recompute_totals(&store, "DSP-999999-01").expect_err("missing");
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}

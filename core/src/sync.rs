//! Spreadsheet-webhook sync reconciler.
//!
//! Builds the outbound payload for a completed dispatch and uploads it
//! with a hard deadline. Idempotency is a key check on `dispatch_id`,
//! tracked locally through `sheets_synced`: a dispatch already marked
//! synced is never re-uploaded, and the repeat attempt reports
//! `SyncOutcome::Duplicate` rather than an error. A remote
//! `duplicate: true` verdict (the endpoint's own same-day content
//! check) maps to the same outcome.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::DispatchError;
use crate::errors::Result;
use crate::lifecycle::DispatchController;
use crate::model::Dispatch;
use crate::model::DispatchStatus;
use crate::model::PartSummary;
use crate::model::is_draft_id;

/// One row-to-be of the remote sheet.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryEntry {
    pub part_no: String,
    pub part_name: String,
    pub boxes: i64,
    pub total_qty: i64,
}

/// Wire shape sent to the spreadsheet-append endpoint. The endpoint
/// appends one row per `summary` entry.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    pub dispatch_no: i64,
    pub dispatch_id: String,
    pub completed_at: String,
    pub customer_name: String,
    pub dispatch_executive: String,
    pub driver_name: String,
    pub driver_mobile: String,
    pub vehicle_no: String,
    pub lr_no: String,
    pub summary: Vec<SummaryEntry>,
}

/// Response envelope from the webhook. The body may be absent,
/// unreadable, or a foreign JSON shape entirely; every field is
/// optional for that reason. Only an explicit `ok: false` is a
/// remote-reported failure.
#[derive(Debug, Deserialize)]
struct WebhookResponse {
    ok: Option<bool>,
    #[serde(default)]
    duplicate: bool,
    dispatch_no: Option<i64>,
    dispatch_id: Option<String>,
    error: Option<String>,
}

/// Identity the remote endpoint assigned to this upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedIdentity {
    pub dispatch_no: i64,
    pub dispatch_id: String,
}

/// Result of an upload attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The payload was delivered (response may have been opaque).
    Uploaded { assigned: Option<AssignedIdentity> },
    /// The idempotency check found an existing match; nothing was sent
    /// or the remote skipped the append. Not an error.
    Duplicate,
}

/// Build the outbound payload. Pure transform, no I/O.
pub fn build_payload(dispatch: &Dispatch, summaries: &[PartSummary]) -> SyncPayload {
    SyncPayload {
        dispatch_no: dispatch.dispatch_no,
        dispatch_id: dispatch.dispatch_id.clone(),
        completed_at: dispatch
            .end_time
            .unwrap_or_else(Utc::now)
            .to_rfc3339(),
        customer_name: dispatch.customer_name.clone(),
        dispatch_executive: dispatch.operator_id.clone(),
        driver_name: dispatch.driver_name.clone(),
        driver_mobile: dispatch.driver_mobile.clone(),
        vehicle_no: dispatch.vehicle_no.clone(),
        lr_no: dispatch.lr_no.clone(),
        summary: summaries
            .iter()
            .map(|s| SummaryEntry {
                part_no: s.part_no.clone(),
                part_name: s.part_name.clone(),
                boxes: s.boxes,
                total_qty: s.total_qty,
            })
            .collect(),
    }
}

/// Webhook client with a per-request deadline. A timed-out request is
/// cancelled, not abandoned, and surfaces as `SyncTimeout` so callers
/// can tell it apart from a data error.
pub struct SyncClient {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Duration,
}

impl SyncClient {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            timeout,
        }
    }

    /// POST the payload. Distinguishes three non-success shapes:
    /// timeout (`SyncTimeout`), transport/HTTP failure (`SyncFailure`),
    /// and a remote duplicate verdict (`Ok(Duplicate)`). A delivered
    /// request with an unreadable body counts as uploaded — only
    /// "failed to send" blocks marking the dispatch synced.
    pub async fn upload(&self, payload: &SyncPayload) -> Result<SyncOutcome> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::SyncTimeout(self.timeout)
                } else {
                    DispatchError::sync_failure_with_source("failed to send upload", e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::sync_failure(format!(
                "webhook returned {status}"
            )));
        }

        // Delivered. The endpoint may answer with an opaque body.
        match resp.json::<WebhookResponse>().await {
            Ok(env) if env.duplicate => {
                tracing::info!(dispatch_id = %payload.dispatch_id, "Webhook skipped duplicate");
                Ok(SyncOutcome::Duplicate)
            }
            Ok(env) if env.ok == Some(false) => Err(DispatchError::sync_failure(
                env.error.unwrap_or_else(|| "webhook reported failure".to_string()),
            )),
            Ok(env) => {
                let assigned = match (env.dispatch_no, env.dispatch_id) {
                    (Some(dispatch_no), Some(dispatch_id)) => Some(AssignedIdentity {
                        dispatch_no,
                        dispatch_id,
                    }),
                    _ => None,
                };
                Ok(SyncOutcome::Uploaded { assigned })
            }
            Err(e) => {
                tracing::debug!(error = %e, "Webhook response unreadable, assuming delivered");
                Ok(SyncOutcome::Uploaded { assigned: None })
            }
        }
    }
}

/// Upload a completed dispatch and reconcile the local sync state.
///
/// On `Uploaded` or `Duplicate` the dispatch is marked synced; on any
/// failure the flags are left untouched so the user can retry. If the
/// endpoint assigned a final identity to a `DRAFT-*` dispatch, the new
/// business key is adopted atomically (dispatch plus all scans).
pub async fn sync_dispatch(
    controller: &mut DispatchController,
    client: &SyncClient,
    dispatch_id: &str,
) -> Result<SyncOutcome> {
    let dispatch = controller.dispatch(dispatch_id)?;
    if dispatch.status != DispatchStatus::Completed {
        return Err(DispatchError::invalid_transition(format!(
            "cannot sync dispatch {dispatch_id} before finalize"
        )));
    }

    if dispatch.sheets_synced {
        tracing::info!(dispatch_id, "Dispatch already synced, skipping upload");
        return Ok(SyncOutcome::Duplicate);
    }

    let summaries = controller.summaries(dispatch_id)?;
    let payload = build_payload(&dispatch, &summaries);

    tracing::info!(
        dispatch_id,
        parts = payload.summary.len(),
        "Uploading dispatch summary"
    );
    let outcome = client.upload(&payload).await?;

    match &outcome {
        SyncOutcome::Uploaded {
            assigned: Some(assigned),
        } if is_draft_id(&dispatch.dispatch_id) => {
            // Rename marks the dispatch synced in the same transaction.
            controller.adopt_final_identity(
                dispatch_id,
                &assigned.dispatch_id,
                assigned.dispatch_no,
            )?;
        }
        _ => {
            controller.mark_synced(dispatch_id)?;
        }
    }

    Ok(outcome)
}

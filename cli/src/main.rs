//! `dispatchlog` entry point.
//!
//! Thin command-line surface over `dispatchlog-core`: create and fill a
//! draft dispatch, correct it, finalize it, and sync the summary to the
//! configured spreadsheet webhook.

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use dispatchlog_core::AppConfig;
use dispatchlog_core::Dispatch;
use dispatchlog_core::DispatchController;
use dispatchlog_core::DispatchStatus;
use dispatchlog_core::DispatchStore;
use dispatchlog_core::NewDispatch;
use dispatchlog_core::ScanInput;
use dispatchlog_core::ScanProvenance;
use dispatchlog_core::SyncClient;
use dispatchlog_core::SyncOutcome;
use dispatchlog_core::DispatchFilter;
use dispatchlog_core::sync_dispatch;

#[derive(Debug, Parser)]
#[command(name = "dispatchlog", version, about = "Packing and dispatch logbook")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new draft dispatch
    New {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        operator: String,
        #[arg(long, default_value = "")]
        driver: String,
        #[arg(long, default_value = "")]
        mobile: String,
        #[arg(long, default_value = "")]
        vehicle: String,
        #[arg(long = "lr", default_value = "")]
        lr_no: String,
        /// Create with a temporary DRAFT-* id without consuming a
        /// dispatch number; resolve later with `resolve` or `sync`
        #[arg(long)]
        offline: bool,
    },
    /// Record one scanned box
    Scan {
        dispatch_id: String,
        #[arg(long)]
        part_no: String,
        #[arg(long, default_value = "")]
        part_name: String,
        #[arg(long)]
        qty: i64,
        /// Raw OCR text the part label was read from
        #[arg(long)]
        ocr_text: Option<String>,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
    },
    /// Hand-enter a batch of identical boxes for one part
    Manual {
        dispatch_id: String,
        #[arg(long)]
        part_no: String,
        #[arg(long, default_value = "")]
        part_name: String,
        #[arg(long)]
        boxes: u32,
        #[arg(long)]
        qty_per_box: i64,
    },
    /// Remove the most recently captured box for a part
    RemoveOne {
        dispatch_id: String,
        #[arg(long)]
        part_no: String,
    },
    /// Remove every box for a part
    RemoveAll {
        dispatch_id: String,
        #[arg(long)]
        part_no: String,
    },
    /// List dispatches, newest first
    List {
        #[arg(long)]
        operator: Option<String>,
        /// DRAFT or COMPLETED
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one dispatch with its per-part summary
    Show {
        dispatch_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Seal a draft dispatch
    Finalize { dispatch_id: String },
    /// Delete a draft dispatch and all its scans
    Discard { dispatch_id: String },
    /// Upload a completed dispatch summary to the spreadsheet webhook
    Sync { dispatch_id: String },
    /// Assign a local final identity to an offline-created draft
    Resolve { dispatch_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let mut controller = open_controller(&config)?;

    match cli.cmd {
        Command::New {
            customer,
            operator,
            driver,
            mobile,
            vehicle,
            lr_no,
            offline,
        } => {
            let req = NewDispatch {
                customer_name: customer,
                operator_id: operator,
                driver_name: driver,
                driver_mobile: mobile,
                vehicle_no: vehicle,
                lr_no,
            };
            let dispatch = if offline {
                controller.create_offline_draft(req)?
            } else {
                controller.create_draft(req)?
            };
            if offline {
                println!("Created {} (number pending)", dispatch.dispatch_id);
            } else {
                println!(
                    "Created {} (dispatch #{})",
                    dispatch.dispatch_id, dispatch.dispatch_no
                );
            }
        }
        Command::Scan {
            dispatch_id,
            part_no,
            part_name,
            qty,
            ocr_text,
            confidence,
        } => {
            let provenance = match ocr_text {
                Some(raw_text) => ScanProvenance::Ocr {
                    raw_text,
                    confidence,
                },
                None => ScanProvenance::Manual,
            };
            let part_no = part_no.trim().to_uppercase();
            let part_name = if part_name.trim().is_empty() {
                part_no.clone()
            } else {
                part_name.trim().to_uppercase()
            };
            controller.add_scan(
                &dispatch_id,
                ScanInput {
                    part_no,
                    part_name,
                    qty_nos: qty,
                    provenance,
                },
            )?;
            print_totals(&controller.dispatch(&dispatch_id)?);
        }
        Command::Manual {
            dispatch_id,
            part_no,
            part_name,
            boxes,
            qty_per_box,
        } => {
            let created =
                controller.add_manual_entries(&dispatch_id, &part_no, &part_name, boxes, qty_per_box)?;
            println!("Added {} manual box(es)", created.len());
            print_totals(&controller.dispatch(&dispatch_id)?);
        }
        Command::RemoveOne {
            dispatch_id,
            part_no,
        } => {
            controller.remove_one_scan(&dispatch_id, &part_no)?;
            print_totals(&controller.dispatch(&dispatch_id)?);
        }
        Command::RemoveAll {
            dispatch_id,
            part_no,
        } => {
            controller.remove_all_scans_for_part(&dispatch_id, &part_no)?;
            print_totals(&controller.dispatch(&dispatch_id)?);
        }
        Command::List {
            operator,
            status,
            json,
        } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    DispatchStatus::parse(&s.to_uppercase())
                        .with_context(|| format!("unknown status {s:?}, expected DRAFT or COMPLETED"))?,
                ),
                None => None,
            };
            let dispatches = controller.list(&DispatchFilter {
                operator_id: operator,
                status,
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list_json(&dispatches))?);
            } else {
                for d in &dispatches {
                    println!(
                        "{}  {:>9}  {:<20}  {} boxes  {} nos  {}",
                        d.dispatch_id,
                        d.status.as_str(),
                        d.customer_name,
                        d.total_boxes_cached,
                        d.total_qty_cached,
                        d.start_time.format("%Y-%m-%d %H:%M"),
                    );
                }
            }
        }
        Command::Show { dispatch_id, json } => {
            let dispatch = controller.dispatch(&dispatch_id)?;
            let summaries = controller.summaries(&dispatch_id)?;
            if json {
                let mut value = dispatch_json(&dispatch);
                value["summary"] = serde_json::Value::Array(
                    summaries
                        .iter()
                        .map(|s| {
                            serde_json::json!({
                                "part_no": s.part_no,
                                "part_name": s.part_name,
                                "boxes": s.boxes,
                                "total_qty": s.total_qty,
                                "is_manual": s.is_manual,
                            })
                        })
                        .collect(),
                );
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!(
                    "{}  #{}  {}  {}",
                    dispatch.dispatch_id,
                    dispatch.dispatch_no,
                    dispatch.status.as_str(),
                    dispatch.customer_name
                );
                for s in &summaries {
                    let flag = if s.is_manual { "  [manual]" } else { "" };
                    println!(
                        "  {:<16} {:<24} {:>4} boxes {:>6} nos{flag}",
                        s.part_no, s.part_name, s.boxes, s.total_qty
                    );
                }
                print_totals(&dispatch);
                if dispatch.sheets_synced {
                    println!("Synced to sheet");
                }
            }
        }
        Command::Finalize { dispatch_id } => {
            let dispatch = controller.finalize(&dispatch_id)?;
            println!(
                "Finalized {}: {} boxes, {} nos, {} part(s)",
                dispatch.dispatch_id,
                dispatch.total_boxes_cached,
                dispatch.total_qty_cached,
                dispatch.parts_count_cached
            );
        }
        Command::Discard { dispatch_id } => {
            controller.discard(&dispatch_id)?;
            println!("Discarded {dispatch_id}");
        }
        Command::Sync { dispatch_id } => {
            if !config.sync.enabled {
                bail!("sync is disabled in the configuration");
            }
            if config.sync.webhook_url.is_empty() {
                bail!("sync.webhook_url is not configured");
            }
            let client = SyncClient::new(config.sync.webhook_url.clone(), config.sync_timeout());
            match sync_dispatch(&mut controller, &client, &dispatch_id).await? {
                SyncOutcome::Uploaded { .. } => {
                    println!("Uploaded {dispatch_id}");
                    if !config.sync.spreadsheet_url.is_empty() {
                        println!("Sheet: {}", config.sync.spreadsheet_url);
                    }
                }
                SyncOutcome::Duplicate => {
                    println!("{dispatch_id} was already synced, nothing uploaded");
                }
            }
        }
        Command::Resolve { dispatch_id } => {
            let dispatch = controller.resolve_draft_identity(&dispatch_id)?;
            println!(
                "Resolved {dispatch_id} to {} (dispatch #{})",
                dispatch.dispatch_id, dispatch.dispatch_no
            );
        }
    }

    Ok(())
}

fn open_controller(config: &AppConfig) -> Result<DispatchController> {
    let db_path = config.resolved_db_path();
    tracing::debug!(path = %db_path.display(), "Opening logbook");
    let store = DispatchStore::open(&db_path)
        .with_context(|| format!("failed to open logbook at {}", db_path.display()))?;
    Ok(DispatchController::new(store))
}

fn print_totals(dispatch: &Dispatch) {
    println!(
        "Totals: {} boxes, {} nos, {} part(s)",
        dispatch.total_boxes_cached, dispatch.total_qty_cached, dispatch.parts_count_cached
    );
}

fn dispatch_json(d: &Dispatch) -> serde_json::Value {
    serde_json::json!({
        "dispatch_no": d.dispatch_no,
        "dispatch_id": d.dispatch_id,
        "status": d.status.as_str(),
        "customer_name": d.customer_name,
        "operator_id": d.operator_id,
        "driver_name": d.driver_name,
        "driver_mobile": d.driver_mobile,
        "vehicle_no": d.vehicle_no,
        "lr_no": d.lr_no,
        "start_time": d.start_time.to_rfc3339(),
        "end_time": d.end_time.map(|t| t.to_rfc3339()),
        "total_boxes": d.total_boxes_cached,
        "total_qty": d.total_qty_cached,
        "parts_count": d.parts_count_cached,
        "sheets_synced": d.sheets_synced,
    })
}

fn list_json(dispatches: &[Dispatch]) -> serde_json::Value {
    serde_json::Value::Array(dispatches.iter().map(dispatch_json).collect())
}

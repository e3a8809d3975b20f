//! SQLite record store and identifier allocator.
//!
//! Owns the three persisted collections: `counters` (id allocation),
//! `dispatches` and `scans`. Counter increments are single upsert
//! statements so an issued number is durable before the caller sees it.
//! The two multi-table mutations (cascade delete, rename-on-sync) run
//! inside one transaction each; a reader never observes a scan whose
//! dispatch is gone, or a dispatch mid-rename.

use std::path::Path;

use chrono::DateTime;
use chrono::Utc;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;

use crate::errors::DispatchError;
use crate::errors::Result;
use crate::model::Dispatch;
use crate::model::DispatchStatus;
use crate::model::ScanProvenance;
use crate::model::ScanRecord;
use crate::model::ScanStatus;

/// Embedded schema SQL
const SCHEMA_SQL: &str = include_str!("../SCHEMA.sql");

/// Counter row for the global dispatch number.
const GLOBAL_COUNTER_KEY: &str = "dispatch_no";

const DISPATCH_COLUMNS: &str = "dispatch_id, id, dispatch_no, operator_id, customer_name, \
     driver_name, driver_mobile, vehicle_no, lr_no, start_time, end_time, status, \
     total_boxes_cached, total_qty_cached, parts_count_cached, \
     sheets_synced, sheets_synced_at, exports_outdated";

const SCAN_COLUMNS: &str =
    "id, dispatch_id, timestamp, part_no, part_name, qty_nos, status, source, \
     ocr_text_raw, ocr_confidence";

/// Optional filter for dispatch listing.
#[derive(Debug, Clone, Default)]
pub struct DispatchFilter {
    pub operator_id: Option<String>,
    pub status: Option<DispatchStatus>,
}

/// Store wrapper over one SQLite connection.
pub struct DispatchStore {
    conn: Connection,
}

impl DispatchStore {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DispatchError::store_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            DispatchError::store_with_source(
                format!("failed to open db at {}", path.display()),
                e,
            )
        })?;

        let store = Self::init(conn)?;
        tracing::debug!(path = %path.display(), "Dispatch store initialized");
        Ok(store)
    }

    /// Open an in-memory store (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DispatchError::store_with_source("failed to open in-memory db", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| DispatchError::store_with_source("failed to apply schema", e))?;
        let store = Self { conn };
        store.seed_counter_from_existing()?;
        Ok(store)
    }

    /// Repair path for databases that predate the counters table: seed
    /// the global counter from the records themselves. Must be
    /// `max(existing) + 1`, never `count + 1` — discarded dispatches
    /// leave gaps.
    fn seed_counter_from_existing(&self) -> Result<()> {
        let have_counter: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM counters WHERE id = ?1)",
                params![GLOBAL_COUNTER_KEY],
                |row| row.get(0),
            )
            .map_err(|e| DispatchError::store_with_source("failed to inspect counters", e))?;

        if have_counter {
            return Ok(());
        }

        let next = self.infer_next_dispatch_no()?;
        if next > 1 {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO counters (id, next_value) VALUES (?1, ?2)",
                    params![GLOBAL_COUNTER_KEY, next],
                )
                .map_err(|e| DispatchError::store_with_source("failed to seed counter", e))?;
            tracing::info!(next, "Seeded dispatch counter from existing records");
        }
        Ok(())
    }

    /// Next global dispatch number inferred from existing rows.
    pub fn infer_next_dispatch_no(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(dispatch_no), 0) + 1 FROM dispatches",
                [],
                |row| row.get(0),
            )
            .map_err(|e| DispatchError::store_with_source("failed to infer dispatch number", e))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Counters
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue the next global dispatch number.
    ///
    /// Read-then-increment is a single upsert statement, so two logical
    /// operations in flight can never observe the same value.
    pub fn next_dispatch_no(&self) -> Result<i64> {
        self.next_counter(GLOBAL_COUNTER_KEY)
    }

    /// Issue the next sequence number for a calendar day key (`YYMMDD`).
    /// Each day starts its own sequence at 1.
    pub fn next_daily_seq(&self, day_key: &str) -> Result<i64> {
        self.next_counter(&format!("daily:{day_key}"))
    }

    fn next_counter(&self, key: &str) -> Result<i64> {
        self.conn
            .query_row(
                r#"
                INSERT INTO counters (id, next_value) VALUES (?1, 2)
                ON CONFLICT(id) DO UPDATE SET next_value = next_value + 1
                RETURNING next_value - 1
                "#,
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| {
                DispatchError::store_with_source(format!("failed to advance counter {key}"), e)
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatches
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new dispatch. Fails with `DuplicateKey` if the business
    /// id (or a non-placeholder dispatch number) already exists.
    pub fn create_dispatch(&self, d: &Dispatch) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO dispatches ({DISPATCH_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    d.dispatch_id,
                    d.id,
                    d.dispatch_no,
                    d.operator_id,
                    d.customer_name,
                    d.driver_name,
                    d.driver_mobile,
                    d.vehicle_no,
                    d.lr_no,
                    d.start_time.to_rfc3339(),
                    d.end_time.map(|t| t.to_rfc3339()),
                    d.status.as_str(),
                    d.total_boxes_cached,
                    d.total_qty_cached,
                    d.parts_count_cached,
                    d.sheets_synced,
                    d.sheets_synced_at.map(|t| t.to_rfc3339()),
                    d.exports_outdated,
                ],
            )
            .map_err(|e| map_constraint(e, format!("dispatch {}", d.dispatch_id)))?;
        Ok(())
    }

    /// Look up a dispatch by its business id.
    pub fn get_dispatch(&self, dispatch_id: &str) -> Result<Option<Dispatch>> {
        self.conn
            .query_row(
                &format!("SELECT {DISPATCH_COLUMNS} FROM dispatches WHERE dispatch_id = ?1"),
                params![dispatch_id],
                dispatch_from_row,
            )
            .optional()
            .map_err(|e| DispatchError::store_with_source("failed to get dispatch", e))
    }

    /// All dispatches matching the filter, most recently started first.
    pub fn list_dispatches(&self, filter: &DispatchFilter) -> Result<Vec<Dispatch>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {DISPATCH_COLUMNS} FROM dispatches \
                 WHERE (?1 IS NULL OR operator_id = ?1) \
                   AND (?2 IS NULL OR status = ?2) \
                 ORDER BY start_time DESC"
            ))
            .map_err(|e| DispatchError::store_with_source("failed to prepare query", e))?;

        let rows = stmt
            .query_map(
                params![
                    filter.operator_id,
                    filter.status.map(|s| s.as_str()),
                ],
                dispatch_from_row,
            )
            .map_err(|e| DispatchError::store_with_source("failed to query dispatches", e))?;

        let mut dispatches = Vec::new();
        for row in rows {
            dispatches.push(
                row.map_err(|e| DispatchError::store_with_source("failed to read dispatch", e))?,
            );
        }
        Ok(dispatches)
    }

    /// Full replace by business id. Fails with `NotFound` if absent.
    pub fn update_dispatch(&self, d: &Dispatch) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE dispatches SET \
                 id = ?2, dispatch_no = ?3, operator_id = ?4, customer_name = ?5, \
                 driver_name = ?6, driver_mobile = ?7, vehicle_no = ?8, lr_no = ?9, \
                 start_time = ?10, end_time = ?11, status = ?12, \
                 total_boxes_cached = ?13, total_qty_cached = ?14, parts_count_cached = ?15, \
                 sheets_synced = ?16, sheets_synced_at = ?17, exports_outdated = ?18 \
                 WHERE dispatch_id = ?1",
                params![
                    d.dispatch_id,
                    d.id,
                    d.dispatch_no,
                    d.operator_id,
                    d.customer_name,
                    d.driver_name,
                    d.driver_mobile,
                    d.vehicle_no,
                    d.lr_no,
                    d.start_time.to_rfc3339(),
                    d.end_time.map(|t| t.to_rfc3339()),
                    d.status.as_str(),
                    d.total_boxes_cached,
                    d.total_qty_cached,
                    d.parts_count_cached,
                    d.sheets_synced,
                    d.sheets_synced_at.map(|t| t.to_rfc3339()),
                    d.exports_outdated,
                ],
            )
            .map_err(|e| DispatchError::store_with_source("failed to update dispatch", e))?;

        if updated == 0 {
            return Err(DispatchError::not_found(format!(
                "dispatch {}",
                d.dispatch_id
            )));
        }
        Ok(())
    }

    /// Atomically remove a dispatch and every scan referencing it.
    pub fn delete_dispatch_cascade(&mut self, dispatch_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DispatchError::store_with_source("failed to begin transaction", e))?;

        let deleted = tx
            .execute(
                "DELETE FROM dispatches WHERE dispatch_id = ?1",
                params![dispatch_id],
            )
            .map_err(|e| DispatchError::store_with_source("failed to delete dispatch", e))?;
        if deleted == 0 {
            return Err(DispatchError::not_found(format!("dispatch {dispatch_id}")));
        }

        let scans = tx
            .execute(
                "DELETE FROM scans WHERE dispatch_id = ?1",
                params![dispatch_id],
            )
            .map_err(|e| DispatchError::store_with_source("failed to delete scans", e))?;

        tx.commit()
            .map_err(|e| DispatchError::store_with_source("failed to commit cascade delete", e))?;

        tracing::debug!(dispatch_id, scans, "Discarded dispatch with scans");
        Ok(())
    }

    /// Rewrite a dispatch's business id and number, cascading the new
    /// foreign key onto every scan, and mark it synced — all in one
    /// transaction. Used when a `DRAFT-*` dispatch resolves its final
    /// identity.
    pub fn rename_dispatch(
        &mut self,
        old_id: &str,
        new_id: &str,
        new_no: i64,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DispatchError::store_with_source("failed to begin transaction", e))?;

        let updated = tx
            .execute(
                "UPDATE dispatches SET dispatch_id = ?2, dispatch_no = ?3, \
                 status = ?4, sheets_synced = 1, sheets_synced_at = ?5 \
                 WHERE dispatch_id = ?1",
                params![
                    old_id,
                    new_id,
                    new_no,
                    DispatchStatus::Completed.as_str(),
                    synced_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_constraint(e, format!("dispatch {new_id}")))?;
        if updated == 0 {
            return Err(DispatchError::not_found(format!("dispatch {old_id}")));
        }

        tx.execute(
            "UPDATE scans SET dispatch_id = ?2 WHERE dispatch_id = ?1",
            params![old_id, new_id],
        )
        .map_err(|e| DispatchError::store_with_source("failed to re-key scans", e))?;

        tx.commit()
            .map_err(|e| DispatchError::store_with_source("failed to commit rename", e))?;

        tracing::info!(old_id, new_id, new_no, "Adopted final dispatch identity");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scans
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a scan record. Id collisions are a caller bug.
    pub fn add_scan(&self, s: &ScanRecord) -> Result<()> {
        let (source, raw_text, confidence) = match &s.provenance {
            ScanProvenance::Ocr {
                raw_text,
                confidence,
            } => ("ocr", Some(raw_text.as_str()), Some(*confidence)),
            ScanProvenance::Manual => ("manual", None, None),
        };

        self.conn
            .execute(
                &format!(
                    "INSERT INTO scans ({SCAN_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    s.id,
                    s.dispatch_id,
                    s.timestamp.to_rfc3339(),
                    s.part_no,
                    s.part_name,
                    s.qty_nos,
                    s.status.as_str(),
                    source,
                    raw_text,
                    confidence,
                ],
            )
            .map_err(|e| map_constraint(e, format!("scan {}", s.id)))?;
        Ok(())
    }

    /// All scans for a dispatch. Unordered; callers sort for display.
    pub fn list_scans(&self, dispatch_id: &str) -> Result<Vec<ScanRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SCAN_COLUMNS} FROM scans WHERE dispatch_id = ?1"
            ))
            .map_err(|e| DispatchError::store_with_source("failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![dispatch_id], scan_from_row)
            .map_err(|e| DispatchError::store_with_source("failed to query scans", e))?;

        let mut scans = Vec::new();
        for row in rows {
            scans
                .push(row.map_err(|e| DispatchError::store_with_source("failed to read scan", e))?);
        }
        Ok(scans)
    }

    /// Delete one scan by id. Fails with `NotFound` if absent.
    pub fn delete_scan(&self, id: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM scans WHERE id = ?1", params![id])
            .map_err(|e| DispatchError::store_with_source("failed to delete scan", e))?;
        if deleted == 0 {
            return Err(DispatchError::not_found(format!("scan {id}")));
        }
        Ok(())
    }

    /// Delete every scan for a dispatch. Returns the number removed.
    pub fn delete_scans_for_dispatch(&self, dispatch_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM scans WHERE dispatch_id = ?1",
                params![dispatch_id],
            )
            .map_err(|e| DispatchError::store_with_source("failed to delete scans", e))
    }

    /// Delete every scan for one part within a dispatch. Returns the
    /// number removed.
    pub fn delete_scans_for_part(&self, dispatch_id: &str, part_no: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM scans WHERE dispatch_id = ?1 AND part_no = ?2",
                params![dispatch_id, part_no],
            )
            .map_err(|e| DispatchError::store_with_source("failed to delete part scans", e))
    }
}

/// Map a constraint violation on insert/update to `DuplicateKey`.
fn map_constraint(e: rusqlite::Error, what: String) -> DispatchError {
    match &e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DispatchError::duplicate_key(what)
        }
        _ => DispatchError::store_with_source(format!("failed to write {what}"), e),
    }
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_timestamp(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn dispatch_from_row(row: &Row<'_>) -> rusqlite::Result<Dispatch> {
    let status_raw: String = row.get(11)?;
    let status = DispatchStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            11,
            rusqlite::types::Type::Text,
            format!("unknown dispatch status: {status_raw}").into(),
        )
    })?;

    Ok(Dispatch {
        dispatch_id: row.get(0)?,
        id: row.get(1)?,
        dispatch_no: row.get(2)?,
        operator_id: row.get(3)?,
        customer_name: row.get(4)?,
        driver_name: row.get(5)?,
        driver_mobile: row.get(6)?,
        vehicle_no: row.get(7)?,
        lr_no: row.get(8)?,
        start_time: parse_timestamp(9, &row.get::<_, String>(9)?)?,
        end_time: parse_opt_timestamp(10, row.get(10)?)?,
        status,
        total_boxes_cached: row.get(12)?,
        total_qty_cached: row.get(13)?,
        parts_count_cached: row.get(14)?,
        sheets_synced: row.get(15)?,
        sheets_synced_at: parse_opt_timestamp(16, row.get(16)?)?,
        exports_outdated: row.get(17)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let status_raw: String = row.get(6)?;
    let status = ScanStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown scan status: {status_raw}").into(),
        )
    })?;

    let source: String = row.get(7)?;
    let provenance = match source.as_str() {
        "manual" => ScanProvenance::Manual,
        _ => ScanProvenance::Ocr {
            raw_text: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            confidence: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
        },
    };

    Ok(ScanRecord {
        id: row.get(0)?,
        dispatch_id: row.get(1)?,
        timestamp: parse_timestamp(2, &row.get::<_, String>(2)?)?,
        part_no: row.get(3)?,
        part_name: row.get(4)?,
        qty_nos: row.get(5)?,
        status,
        provenance,
    })
}

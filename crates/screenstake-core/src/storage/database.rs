//! SQLite-backed engine store.
//!
//! Persists the stake collection, the day's usage ledger snapshot, the
//! append-only charge history and violation audit trail, and pending
//! step-up authentications. Timestamps are stored as RFC 3339 text.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::data_dir;
use crate::error::StoreError;
use crate::history::{ChargeRecord, ChargeStatus, PendingAuthentication, Violation};
use crate::ledger::UsageLedger;
use crate::stake::{Stake, StakeStatus};
use crate::storage::store::EngineStore;

/// SQLite database at `~/.config/screenstake/screenstake.db`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at the default location, creating the schema if
    /// needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let path = data_dir()
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?
            .join("screenstake.db");
        Self::open_path(&path)
    }

    /// Open a database at an explicit path.
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .expect("db poisoned")
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS stakes (
                    id                 TEXT PRIMARY KEY,
                    apps               TEXT NOT NULL,
                    daily_limit_secs   INTEGER NOT NULL,
                    amount             REAL NOT NULL,
                    start_at           TEXT NOT NULL,
                    end_at             TEXT NOT NULL,
                    status             TEXT NOT NULL,
                    current_usage_secs INTEGER NOT NULL,
                    last_updated       TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS charges (
                    id          TEXT PRIMARY KEY,
                    stake_id    TEXT NOT NULL,
                    amount      REAL NOT NULL,
                    charged_at  TEXT NOT NULL,
                    reason      TEXT NOT NULL,
                    status      TEXT NOT NULL,
                    receipt_url TEXT
                );

                CREATE TABLE IF NOT EXISTS violations (
                    id               INTEGER PRIMARY KEY AUTOINCREMENT,
                    stake_id         TEXT NOT NULL,
                    occurred_at      TEXT NOT NULL,
                    exceeded_by_secs INTEGER NOT NULL,
                    total_usage_secs INTEGER NOT NULL,
                    daily_limit_secs INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pending_auth (
                    stake_id      TEXT PRIMARY KEY,
                    client_secret TEXT NOT NULL,
                    amount        REAL NOT NULL,
                    created_at    TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ledger (
                    day  TEXT NOT NULL,
                    app  TEXT NOT NULL,
                    secs INTEGER NOT NULL,
                    PRIMARY KEY (day, app)
                );

                CREATE INDEX IF NOT EXISTS idx_charges_stake ON charges(stake_id);
                CREATE INDEX IF NOT EXISTS idx_violations_stake ON violations(stake_id);",
            )
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad uuid '{raw}': {e}")))
}

fn row_to_stake(
    id: String,
    apps: String,
    daily_limit_secs: u64,
    amount: f64,
    start_at: String,
    end_at: String,
    status: String,
    current_usage_secs: u64,
    last_updated: String,
) -> Result<Stake, StoreError> {
    Ok(Stake {
        id: parse_uuid(&id)?,
        apps: serde_json::from_str(&apps)
            .map_err(|e| StoreError::Corrupt(format!("bad app list: {e}")))?,
        daily_limit_secs,
        amount,
        start_at: parse_ts(&start_at)?,
        end_at: parse_ts(&end_at)?,
        status: StakeStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        current_usage_secs,
        last_updated: parse_ts(&last_updated)?,
    })
}

fn row_to_charge(
    id: String,
    stake_id: String,
    amount: f64,
    charged_at: String,
    reason: String,
    status: String,
    receipt_url: Option<String>,
) -> Result<ChargeRecord, StoreError> {
    Ok(ChargeRecord {
        id,
        stake_id: parse_uuid(&stake_id)?,
        amount,
        charged_at: parse_ts(&charged_at)?,
        reason,
        status: ChargeStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        receipt_url,
    })
}

impl EngineStore for Database {
    fn load_stakes(&self) -> Result<Vec<Stake>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, apps, daily_limit_secs, amount, start_at, end_at, status,
                    current_usage_secs, last_updated
             FROM stakes ORDER BY start_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, u64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut stakes = Vec::new();
        for row in rows {
            let (id, apps, limit, amount, start, end, status, usage, updated) = row?;
            stakes.push(row_to_stake(
                id, apps, limit, amount, start, end, status, usage, updated,
            )?);
        }
        Ok(stakes)
    }

    fn upsert_stake(&self, stake: &Stake) -> Result<(), StoreError> {
        let apps = serde_json::to_string(&stake.apps)
            .map_err(|e| StoreError::Corrupt(format!("bad app list: {e}")))?;
        self.conn.lock().expect("db poisoned").execute(
            "INSERT INTO stakes (id, apps, daily_limit_secs, amount, start_at, end_at,
                                 status, current_usage_secs, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 apps = excluded.apps,
                 daily_limit_secs = excluded.daily_limit_secs,
                 amount = excluded.amount,
                 start_at = excluded.start_at,
                 end_at = excluded.end_at,
                 status = excluded.status,
                 current_usage_secs = excluded.current_usage_secs,
                 last_updated = excluded.last_updated",
            params![
                stake.id.to_string(),
                apps,
                stake.daily_limit_secs,
                stake.amount,
                stake.start_at.to_rfc3339(),
                stake.end_at.to_rfc3339(),
                stake.status.as_str(),
                stake.current_usage_secs,
                stake.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let pruned = self.conn.lock().expect("db poisoned").execute(
            "DELETE FROM stakes
             WHERE status IN ('completed', 'failed') AND end_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(pruned)
    }

    fn load_ledger(&self) -> Result<Option<UsageLedger>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare("SELECT day, app, secs FROM ledger")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;

        let mut day: Option<NaiveDate> = None;
        let mut usage = std::collections::HashMap::new();
        for row in rows {
            let (raw_day, app, secs) = row?;
            let parsed = NaiveDate::parse_from_str(&raw_day, "%Y-%m-%d")
                .map_err(|e| StoreError::Corrupt(format!("bad ledger day '{raw_day}': {e}")))?;
            day = Some(parsed);
            usage.insert(app, secs);
        }
        Ok(day.map(|day| UsageLedger { day, usage }))
    }

    fn save_ledger(&self, ledger: &UsageLedger) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("db poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM ledger", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO ledger (day, app, secs) VALUES (?1, ?2, ?3)")?;
            let day = ledger.day.format("%Y-%m-%d").to_string();
            for (app, secs) in &ledger.usage {
                stmt.execute(params![day, app, secs])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn append_charge(&self, record: &ChargeRecord) -> Result<(), StoreError> {
        self.conn.lock().expect("db poisoned").execute(
            "INSERT INTO charges (id, stake_id, amount, charged_at, reason, status, receipt_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.stake_id.to_string(),
                record.amount,
                record.charged_at.to_rfc3339(),
                record.reason,
                record.status.as_str(),
                record.receipt_url,
            ],
        )?;
        Ok(())
    }

    fn update_charge_status(
        &self,
        charge_id: &str,
        status: ChargeStatus,
    ) -> Result<(), StoreError> {
        let updated = self.conn.lock().expect("db poisoned").execute(
            "UPDATE charges SET status = ?1 WHERE id = ?2",
            params![status.as_str(), charge_id],
        )?;
        if updated == 0 {
            return Err(StoreError::QueryFailed(format!(
                "no charge with id {charge_id}"
            )));
        }
        Ok(())
    }

    fn charge(&self, charge_id: &str) -> Result<Option<ChargeRecord>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, stake_id, amount, charged_at, reason, status, receipt_url
             FROM charges WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![charge_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        match rows.next() {
            Some(row) => {
                let (id, stake_id, amount, charged_at, reason, status, receipt_url) = row?;
                Ok(Some(row_to_charge(
                    id,
                    stake_id,
                    amount,
                    charged_at,
                    reason,
                    status,
                    receipt_url,
                )?))
            }
            None => Ok(None),
        }
    }

    fn charges_for_stake(&self, stake_id: Uuid) -> Result<Vec<ChargeRecord>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, stake_id, amount, charged_at, reason, status, receipt_url
             FROM charges WHERE stake_id = ?1 ORDER BY charged_at",
        )?;
        let rows = stmt.query_map(params![stake_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut charges = Vec::new();
        for row in rows {
            let (id, sid, amount, charged_at, reason, status, receipt_url) = row?;
            charges.push(row_to_charge(
                id,
                sid,
                amount,
                charged_at,
                reason,
                status,
                receipt_url,
            )?);
        }
        Ok(charges)
    }

    fn charge_history(&self) -> Result<Vec<ChargeRecord>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, stake_id, amount, charged_at, reason, status, receipt_url
             FROM charges ORDER BY charged_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut charges = Vec::new();
        for row in rows {
            let (id, sid, amount, charged_at, reason, status, receipt_url) = row?;
            charges.push(row_to_charge(
                id,
                sid,
                amount,
                charged_at,
                reason,
                status,
                receipt_url,
            )?);
        }
        Ok(charges)
    }

    fn append_violation(&self, violation: &Violation) -> Result<(), StoreError> {
        self.conn.lock().expect("db poisoned").execute(
            "INSERT INTO violations (stake_id, occurred_at, exceeded_by_secs,
                                     total_usage_secs, daily_limit_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                violation.stake_id.to_string(),
                violation.occurred_at.to_rfc3339(),
                violation.exceeded_by_secs,
                violation.total_usage_secs,
                violation.daily_limit_secs,
            ],
        )?;
        Ok(())
    }

    fn put_pending_auth(&self, pending: &PendingAuthentication) -> Result<(), StoreError> {
        self.conn.lock().expect("db poisoned").execute(
            "INSERT INTO pending_auth (stake_id, client_secret, amount, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(stake_id) DO UPDATE SET
                 client_secret = excluded.client_secret,
                 amount = excluded.amount,
                 created_at = excluded.created_at",
            params![
                pending.stake_id.to_string(),
                pending.client_secret,
                pending.amount,
                pending.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn take_pending_auth(
        &self,
        stake_id: Uuid,
    ) -> Result<Option<PendingAuthentication>, StoreError> {
        let conn = self.conn.lock().expect("db poisoned");
        let mut stmt = conn.prepare(
            "SELECT stake_id, client_secret, amount, created_at
             FROM pending_auth WHERE stake_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![stake_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let pending = match rows.next() {
            Some(row) => {
                let (sid, client_secret, amount, created_at) = row?;
                Some(PendingAuthentication {
                    stake_id: parse_uuid(&sid)?,
                    client_secret,
                    amount,
                    created_at: parse_ts(&created_at)?,
                })
            }
            None => None,
        };
        drop(rows);
        drop(stmt);

        if pending.is_some() {
            conn.execute(
                "DELETE FROM pending_auth WHERE stake_id = ?1",
                params![stake_id.to_string()],
            )?;
        }
        Ok(pending)
    }
}

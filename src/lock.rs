//! Locks on units.
//!
//! A unit is locked while it has at least one row in the lock table. Locks
//! are advisory for readers; storing or inactivating a locked unit is refused.
use chrono::{NaiveDateTime, Utc};
use rusqlite::params;
use tracing::info;

use crate::datatype::{format_time, parse_time};
use crate::error::{RepoError, Result};
use crate::persist::{Persistor, statements};
use crate::unit::UnitRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Read = 1,
    Existence = 2,
    Write = 3,
}

impl LockType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of(code: i64) -> Result<LockType> {
        match code {
            1 => Ok(LockType::Read),
            2 => Ok(LockType::Existence),
            3 => Ok(LockType::Write),
            _ => Err(RepoError::UnknownEnumeration {
                kind: "lock type",
                code,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub purpose: String,
    pub lock_type: LockType,
    pub lock_time: NaiveDateTime,
    pub expire: Option<NaiveDateTime>,
}

/// Takes a lock unless the unit is already locked. Returns whether the lock
/// was taken.
pub fn lock(persistor: &Persistor, unit: UnitRef, lock_type: LockType, purpose: &str) -> Result<bool> {
    let now = format_time(&Utc::now().naive_utc());
    let taken = persistor.write(|tx| {
        let existing: i64 = tx
            .prepare_cached(statements::LOCK_COUNT)?
            .query_row(params![unit.tenant_id, unit.unit_id], |row| row.get(0))?;
        if existing > 0 {
            return Ok(false);
        }
        tx.prepare_cached(statements::LOCK_INSERT)?.execute(params![
            unit.tenant_id,
            unit.unit_id,
            purpose,
            lock_type.code(),
            now
        ])?;
        Ok(true)
    })?;
    if taken {
        info!(unit = %unit, lock_type = ?lock_type, purpose, action = "lock", "unit locked");
    }
    Ok(taken)
}

/// Removes every lock on the unit.
pub fn unlock(persistor: &Persistor, unit: UnitRef) -> Result<()> {
    let removed = persistor.write(|tx| {
        Ok(tx
            .prepare_cached(statements::LOCK_DELETE)?
            .execute(params![unit.tenant_id, unit.unit_id])?)
    })?;
    if removed > 0 {
        info!(unit = %unit, locks = removed, action = "unlock", "unit unlocked");
    }
    Ok(())
}

pub fn is_locked(persistor: &Persistor, unit: UnitRef) -> Result<bool> {
    let count: i64 = persistor.read(|connection| {
        connection
            .prepare_cached(statements::LOCK_COUNT)?
            .query_row(params![unit.tenant_id, unit.unit_id], |row| row.get(0))
    })?;
    Ok(count > 0)
}

pub fn locks(persistor: &Persistor, unit: UnitRef) -> Result<Vec<Lock>> {
    let rows = persistor.read(|connection| {
        let mut statement = connection.prepare_cached(statements::LOCK_LIST)?;
        let rows = statement.query_map(params![unit.tenant_id, unit.unit_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })?;
    rows.into_iter()
        .map(|(purpose, code, time, expire)| {
            Ok(Lock {
                purpose,
                lock_type: LockType::of(code)?,
                lock_time: read_time(&time)?,
                expire: expire.as_deref().map(read_time).transpose()?,
            })
        })
        .collect()
}

fn read_time(text: &str) -> Result<NaiveDateTime> {
    parse_time(text)
        .map_err(|e| RepoError::SystemInconsistency(format!("unreadable lock time '{text}': {e}")))
}

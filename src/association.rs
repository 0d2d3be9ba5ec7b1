//! Typed links from a unit to another unit (relations) or to an opaque
//! external reference (associations).
use rusqlite::params;
use tracing::info;

use crate::error::{RepoError, Result};
use crate::persist::{Persistor, statements};
use crate::unit::UnitRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationType {
    Invalid = 0,
    ParentChildRelation = 1,
    CaseAssociation = 2,
    ReplacementRelation = 3,
}

impl AssociationType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of(code: i64) -> Result<AssociationType> {
        match code {
            0 => Ok(AssociationType::Invalid),
            1 => Ok(AssociationType::ParentChildRelation),
            2 => Ok(AssociationType::CaseAssociation),
            3 => Ok(AssociationType::ReplacementRelation),
            _ => Err(RepoError::UnknownEnumeration {
                kind: "association type",
                code,
            }),
        }
    }

    /// Relations point at units, the rest at external references.
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            AssociationType::ParentChildRelation | AssociationType::ReplacementRelation
        )
    }

    /// Whether a unit may hold more than one link of this type.
    pub fn allows_multiples(self) -> bool {
        matches!(self, AssociationType::ParentChildRelation)
    }

    fn expect_relational(self) -> Result<()> {
        if self == AssociationType::Invalid || !self.is_relational() {
            return Err(RepoError::InvalidParameter(format!(
                "{self:?} is not a relation type"
            )));
        }
        Ok(())
    }

    fn expect_external(self) -> Result<()> {
        if self == AssociationType::Invalid || self.is_relational() {
            return Err(RepoError::InvalidParameter(format!(
                "{self:?} is not an external association type"
            )));
        }
        Ok(())
    }
}

// ------------- Relations -------------
pub fn add_relation(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
    right: UnitRef,
) -> Result<()> {
    kind.expect_relational()?;
    persistor.write(|tx| {
        if !kind.allows_multiples() {
            tx.prepare_cached(statements::INTERNAL_DELETE_TYPE)?
                .execute(params![left.tenant_id, left.unit_id, kind.code()])?;
        }
        // a duplicate is silently ignored
        tx.prepare_cached(statements::INTERNAL_INSERT)?.execute(params![
            left.tenant_id,
            left.unit_id,
            kind.code(),
            right.tenant_id,
            right.unit_id
        ])?;
        Ok(())
    })?;
    info!(unit = %left, right = %right, kind = ?kind, action = "add relation", "relation added");
    Ok(())
}

pub fn remove_relation(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
    right: UnitRef,
) -> Result<()> {
    kind.expect_relational()?;
    persistor.write(|tx| {
        tx.prepare_cached(statements::INTERNAL_DELETE)?.execute(params![
            left.tenant_id,
            left.unit_id,
            kind.code(),
            right.tenant_id,
            right.unit_id
        ])?;
        Ok(())
    })?;
    info!(unit = %left, right = %right, kind = ?kind, action = "remove relation", "relation removed");
    Ok(())
}

/// Units that `left` points at.
pub fn right_relations(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
) -> Result<Vec<UnitRef>> {
    kind.expect_relational()?;
    persistor.read(|connection| {
        let mut statement = connection.prepare_cached(statements::INTERNAL_RIGHT)?;
        let rows = statement.query_map(
            params![left.tenant_id, left.unit_id, kind.code()],
            unit_ref,
        )?;
        rows.collect()
    })
}

/// Units pointing at `right`.
pub fn left_relations(
    persistor: &Persistor,
    right: UnitRef,
    kind: AssociationType,
) -> Result<Vec<UnitRef>> {
    kind.expect_relational()?;
    persistor.read(|connection| {
        let mut statement = connection.prepare_cached(statements::INTERNAL_LEFT)?;
        let rows = statement.query_map(
            params![right.tenant_id, right.unit_id, kind.code()],
            unit_ref,
        )?;
        rows.collect()
    })
}

// ------------- Associations -------------
pub fn add_association(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
    reference: &str,
) -> Result<()> {
    kind.expect_external()?;
    let reference = checked_reference(reference)?;
    persistor.write(|tx| {
        if !kind.allows_multiples() {
            tx.prepare_cached(statements::EXTERNAL_DELETE_TYPE)?
                .execute(params![left.tenant_id, left.unit_id, kind.code()])?;
        }
        tx.prepare_cached(statements::EXTERNAL_INSERT)?.execute(params![
            left.tenant_id,
            left.unit_id,
            kind.code(),
            reference
        ])?;
        Ok(())
    })?;
    info!(unit = %left, reference, kind = ?kind, action = "add association", "association added");
    Ok(())
}

pub fn remove_association(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
    reference: &str,
) -> Result<()> {
    kind.expect_external()?;
    let reference = checked_reference(reference)?;
    persistor.write(|tx| {
        tx.prepare_cached(statements::EXTERNAL_DELETE)?.execute(params![
            left.tenant_id,
            left.unit_id,
            kind.code(),
            reference
        ])?;
        Ok(())
    })?;
    info!(unit = %left, reference, kind = ?kind, action = "remove association", "association removed");
    Ok(())
}

/// External references held by `left`.
pub fn right_associations(
    persistor: &Persistor,
    left: UnitRef,
    kind: AssociationType,
) -> Result<Vec<String>> {
    kind.expect_external()?;
    persistor.read(|connection| {
        let mut statement = connection.prepare_cached(statements::EXTERNAL_RIGHT)?;
        let rows = statement.query_map(
            params![left.tenant_id, left.unit_id, kind.code()],
            |row| row.get::<_, String>(0),
        )?;
        rows.collect()
    })
}

/// Units holding the external reference.
pub fn left_associations(
    persistor: &Persistor,
    kind: AssociationType,
    reference: &str,
) -> Result<Vec<UnitRef>> {
    kind.expect_external()?;
    let reference = checked_reference(reference)?;
    persistor.read(|connection| {
        let mut statement = connection.prepare_cached(statements::EXTERNAL_LEFT)?;
        let rows = statement.query_map(params![kind.code(), reference], unit_ref)?;
        rows.collect()
    })
}

fn checked_reference(reference: &str) -> Result<&str> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(RepoError::InvalidParameter(
            "association reference must not be empty".into(),
        ));
    }
    Ok(reference)
}

fn unit_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnitRef> {
    Ok(UnitRef {
        tenant_id: row.get(0)?,
        unit_id: row.get(1)?,
    })
}

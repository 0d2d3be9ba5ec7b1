use rusqlite::{Transaction, params};
use tracing::{debug, error};

use crate::catalog::AttributeInfo;
use crate::datatype::{Element, RowCursor, Type, Value, Vector};
use crate::error::{RepoError, Result};
use crate::persist::statements;

// ------------- Attribute -------------
/// A catalog attribute attached to one unit, holding its value vector.
///
/// The value vector id is allocated when the attribute is first stored and
/// reallocated on every later store: values are written, never updated.
#[derive(Debug, Clone)]
pub struct Attribute {
    id: i32,
    name: String,
    forced_scalar: bool,
    value_id: Option<i64>,
    value: Value,
}

impl Attribute {
    pub fn new(info: &AttributeInfo) -> Self {
        Self {
            id: info.id,
            name: info.name.clone(),
            forced_scalar: info.forced_scalar,
            value_id: None,
            value: Value::create(info.kind),
        }
    }

    /// Copies the elements of `other`. The copy has no value vector id and
    /// is new regardless of the state of `other`.
    pub fn copy_of(other: &Attribute) -> Self {
        Self {
            id: other.id,
            name: other.name.clone(),
            forced_scalar: other.forced_scalar,
            value_id: None,
            value: other.value.duplicate(),
        }
    }

    /// Builds an attribute from the rows of one value vector, leaving the
    /// cursor at the first row of the next one.
    pub fn inflate(cursor: &mut RowCursor<'_>) -> Result<Self> {
        let row = cursor.peek().ok_or_else(|| {
            RepoError::SystemInconsistency("no rows left to inflate an attribute from".into())
        })?;
        let kind = Type::of(row.attr_type)?;
        let attribute = Self {
            id: row.attr_id,
            name: row.attr_name.clone(),
            forced_scalar: row.forced_scalar,
            value_id: Some(row.value_id),
            value: Value::inflate(kind, cursor)?,
        };
        Ok(attribute)
    }

    pub fn id(&self) -> i32 {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> Type {
        self.value.kind()
    }
    pub fn forced_scalar(&self) -> bool {
        self.forced_scalar
    }
    pub fn value_id(&self) -> Option<i64> {
        self.value_id
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// The typed elements, or an attribute type error when `T` is not the
    /// declared type.
    pub fn vector<T: Element>(&self) -> Result<&Vector<T>> {
        match self.value.vector::<T>() {
            Ok(vector) => Ok(vector),
            Err(_) => Err(self.type_error(T::TYPE)),
        }
    }

    pub fn vector_mut<T: Element>(&mut self) -> Result<&mut Vector<T>> {
        let error = self.type_error(T::TYPE);
        self.value.vector_mut::<T>().map_err(|_| error)
    }

    fn type_error(&self, requested: Type) -> RepoError {
        RepoError::AttributeType(format!(
            "attribute '{}' is {}, not {requested}",
            self.name,
            self.value.kind()
        ))
    }

    pub fn is_new(&self) -> bool {
        self.value_id.is_none() || self.value.is_new()
    }

    pub fn is_modified(&self) -> bool {
        self.value.is_modified()
    }

    /// Writes a fresh value vector for this attribute on the given unit and
    /// returns its id. Tracking state is left untouched; see [`Self::stored`].
    pub fn write(&self, tx: &Transaction, tenant_id: i32, unit_id: i64) -> Result<i64> {
        if self.forced_scalar && self.value.len() > 1 {
            return Err(RepoError::AttributeValue(format!(
                "attribute '{}' is scalar but holds {} values",
                self.name,
                self.value.len()
            )));
        }
        tx.prepare_cached(statements::ATTRIBUTE_VALUE_DELETE)?
            .execute(params![tenant_id, unit_id, self.id])?;
        tx.prepare_cached(statements::ATTRIBUTE_VALUE_INSERT)?
            .execute(params![tenant_id, unit_id, self.id])?;
        let value_id = tx.last_insert_rowid();
        if value_id <= 0 {
            error!(attribute = %self.name, unit_id, "no value vector id generated");
            return Err(RepoError::SystemInconsistency(format!(
                "could not read back value vector id for attribute '{}'",
                self.name
            )));
        }
        self.value.write(tx, &self.name, value_id)?;
        debug!(attribute = %self.name, tenant_id, unit_id, value_id, elements = self.value.len(), "value vector written");
        Ok(value_id)
    }

    /// Records a committed write.
    pub fn stored(&mut self, value_id: i64) {
        self.value_id = Some(value_id);
        self.value.set_stored();
    }

    /// Writes and records in one go, for callers managing the transaction
    /// themselves. Does nothing when there is nothing new to write.
    pub fn store(&mut self, tx: &Transaction, tenant_id: i32, unit_id: i64) -> Result<()> {
        if !(self.is_new() || self.is_modified()) {
            return Ok(());
        }
        let value_id = self.write(tx, tenant_id, unit_id)?;
        self.stored(value_id);
        Ok(())
    }
}

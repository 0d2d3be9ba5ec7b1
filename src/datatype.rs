// used for persistence
use rusqlite::Transaction;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value as Cell, ValueRef};

// used for timestamps in the database
use chrono::{NaiveDateTime, SubsecRound};

// modification tracking compares a hash taken at load time with the current one
use seahash::SeaHasher;
use std::hash::{Hash, Hasher};

// used to print out readable forms of a data type
use std::fmt;
use std::str::FromStr;

use crate::error::{RepoError, Result};
use crate::persist::statements;

/// Text elements longer than this are refused at store time.
pub const MAX_STRING_LENGTH: usize = 255;

/// Timestamps are persisted as text in this layout, always with
/// milliseconds, so that lexical and temporal order agree. Time elements
/// are cut to milliseconds as they enter a vector, so a stored vector reads
/// back exactly as it was held in memory.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn parse_time(text: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIME_FORMAT)
}

// ------------- Type -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    String = 1,
    Time = 2,
    Integer = 3,
    Long = 4,
    Double = 5,
    Boolean = 6,
    Data = 7,
}

impl Type {
    pub const ALL: [Type; 7] = [
        Type::String,
        Type::Time,
        Type::Integer,
        Type::Long,
        Type::Double,
        Type::Boolean,
        Type::Data,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of(code: i64) -> Result<Type> {
        Type::ALL
            .into_iter()
            .find(|t| i64::from(t.code()) == code)
            .ok_or(RepoError::UnknownEnumeration {
                kind: "attribute type",
                code,
            })
    }

    /// Opaque bytes cannot be compared in a search.
    pub fn is_searchable(self) -> bool {
        self != Type::Data
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::String => "string",
            Type::Time => "time",
            Type::Integer => "integer",
            Type::Long => "long",
            Type::Double => "double",
            Type::Boolean => "boolean",
            Type::Data => "data",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Type {
    type Err = RepoError;
    fn from_str(s: &str) -> Result<Self> {
        Type::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| RepoError::InvalidParameter(format!("unknown attribute type '{s}'")))
    }
}

// ------------- Datum -------------
/// A single element of any type, used where the type is only known at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    String(String),
    Time(NaiveDateTime),
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Data(Vec<u8>),
}

impl Datum {
    pub fn kind(&self) -> Type {
        match self {
            Datum::String(_) => Type::String,
            Datum::Time(_) => Type::Time,
            Datum::Integer(_) => Type::Integer,
            Datum::Long(_) => Type::Long,
            Datum::Double(_) => Type::Double,
            Datum::Boolean(_) => Type::Boolean,
            Datum::Data(_) => Type::Data,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datum::String(s) => write!(f, "{s}"),
            Datum::Time(t) => write!(f, "{}", format_time(t)),
            Datum::Integer(i) => write!(f, "{i}"),
            Datum::Long(l) => write!(f, "{l}"),
            Datum::Double(d) => write!(f, "{d}"),
            Datum::Boolean(b) => write!(f, "{b}"),
            Datum::Data(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

// ------------- Element -------------
pub trait Element: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    // static stuff which needs to be implemented downstream
    const TYPE: Type;
    fn digest<H: Hasher>(&self, state: &mut H);
    fn to_cell(&self) -> Cell;
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self>;
    fn into_datum(self) -> Datum;
    fn from_datum(datum: &Datum) -> Option<Self>;
    fn wrap(vector: Vector<Self>) -> Value;
    fn peek(value: &Value) -> Option<&Vector<Self>>;
    fn peek_mut(value: &mut Value) -> Option<&mut Vector<Self>>;
    // domain constraints checked before anything is written
    fn check(&self, _attribute: &str) -> Result<()> {
        Ok(())
    }
    // the form the element takes in storage
    fn normalized(self) -> Self {
        self
    }
}

macro_rules! element {
    ($variant:ident) => {
        fn into_datum(self) -> Datum {
            Datum::$variant(self)
        }
        fn from_datum(datum: &Datum) -> Option<Self> {
            match datum {
                Datum::$variant(v) => Some(v.clone()),
                _ => None,
            }
        }
        fn wrap(vector: Vector<Self>) -> Value {
            Value::$variant(vector)
        }
        fn peek(value: &Value) -> Option<&Vector<Self>> {
            match value {
                Value::$variant(v) => Some(v),
                _ => None,
            }
        }
        fn peek_mut(value: &mut Value) -> Option<&mut Vector<Self>> {
            match value {
                Value::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

impl Element for String {
    const TYPE: Type = Type::String;
    element!(String);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Text(self.clone())
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value)
    }
    fn check(&self, attribute: &str) -> Result<()> {
        let length = self.chars().count();
        if length > MAX_STRING_LENGTH {
            return Err(RepoError::AttributeValue(format!(
                "value of attribute '{attribute}' is {length} characters, at most {MAX_STRING_LENGTH} allowed"
            )));
        }
        Ok(())
    }
}
impl Element for NaiveDateTime {
    const TYPE: Type = Type::Time;
    element!(Time);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Text(format_time(self))
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        parse_time(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
    fn normalized(self) -> Self {
        self.trunc_subsecs(3)
    }
}
impl Element for i32 {
    const TYPE: Type = Type::Integer;
    element!(Integer);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Integer(i64::from(*self))
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i32::column_result(value)
    }
}
impl Element for i64 {
    const TYPE: Type = Type::Long;
    element!(Long);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Integer(*self)
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value)
    }
}
impl Element for f64 {
    const TYPE: Type = Type::Double;
    element!(Double);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Real(*self)
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        f64::column_result(value)
    }
}
impl Element for bool {
    const TYPE: Type = Type::Boolean;
    element!(Boolean);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Integer(i64::from(*self))
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        bool::column_result(value)
    }
}
impl Element for Vec<u8> {
    const TYPE: Type = Type::Data;
    element!(Data);
    fn digest<H: Hasher>(&self, state: &mut H) {
        self.hash(state);
    }
    fn to_cell(&self) -> Cell {
        Cell::Blob(self.clone())
    }
    fn from_cell(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Blob(bytes) => Ok(bytes.to_vec()),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ------------- Vector -------------
/// The ordered elements of one attribute on one unit. A scalar is simply a
/// vector with at most one element.
#[derive(Debug, Clone)]
pub struct Vector<T: Element> {
    values: Vec<T>,
    initial_hash: u64,
    is_new: bool,
}

impl<T: Element> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Vector<T> {
    pub fn new() -> Self {
        Self::with_state(Vec::new(), true)
    }
    fn with_state(values: Vec<T>, is_new: bool) -> Self {
        let mut vector = Self {
            values: values.into_iter().map(Element::normalized).collect(),
            initial_hash: 0,
            is_new,
        };
        vector.initial_hash = vector.digest();
        vector
    }
    fn digest(&self) -> u64 {
        let mut hasher = SeaHasher::new();
        self.values.len().hash(&mut hasher);
        for value in &self.values {
            value.digest(&mut hasher);
        }
        hasher.finish()
    }
    pub fn get(&self) -> &[T] {
        &self.values
    }
    pub fn values_mut(&mut self) -> &mut Vec<T> {
        &mut self.values
    }
    pub fn set(&mut self, values: Vec<T>) {
        self.values = values.into_iter().map(Element::normalized).collect();
    }
    pub fn push(&mut self, value: T) {
        self.values.push(value.normalized());
    }
    pub fn clear(&mut self) {
        self.values.clear();
    }
    pub fn scalar(&self) -> Option<&T> {
        self.values.first()
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn is_scalar(&self) -> bool {
        self.values.len() <= 1
    }
    pub fn is_vector(&self) -> bool {
        self.values.len() > 1
    }
    pub fn is_new(&self) -> bool {
        self.is_new
    }
    pub fn is_modified(&self) -> bool {
        self.digest() != self.initial_hash
    }
    fn duplicate(&self) -> Self {
        Self::with_state(self.values.clone(), true)
    }
    fn set_stored(&mut self) {
        // catches elements written through values_mut
        for value in self.values.iter_mut() {
            *value = value.clone().normalized();
        }
        self.is_new = false;
        self.initial_hash = self.digest();
    }
    fn write(&self, tx: &Transaction, attribute: &str, value_id: i64) -> Result<()> {
        for value in &self.values {
            value.check(attribute)?;
        }
        if self.values.is_empty() {
            return Ok(());
        }
        let mut insert = tx.prepare_cached(statements::vector_insert(T::TYPE))?;
        for (index, value) in self.values.iter().enumerate() {
            insert.execute(rusqlite::params![value_id, index as i64, value.to_cell()])?;
        }
        Ok(())
    }
    fn inflate(cursor: &mut RowCursor<'_>) -> Result<Self> {
        let value_id = match cursor.peek() {
            Some(row) => row.value_id,
            None => {
                return Err(RepoError::SystemInconsistency(
                    "no rows left to inflate a value from".into(),
                ));
            }
        };
        let mut values = Vec::new();
        while let Some(row) = cursor.peek() {
            if row.value_id != value_id {
                break;
            }
            // a row without index is a declared but empty vector
            if row.index.is_some() {
                let value = T::from_cell(ValueRef::from(&row.cell)).map_err(|e| {
                    RepoError::SystemInconsistency(format!(
                        "could not read {} element of value vector {value_id}: {e}",
                        T::TYPE
                    ))
                })?;
                values.push(value);
            }
            cursor.advance();
        }
        Ok(Self::with_state(values, false))
    }
}

// ------------- Value -------------
#[derive(Debug, Clone)]
pub enum Value {
    String(Vector<String>),
    Time(Vector<NaiveDateTime>),
    Integer(Vector<i32>),
    Long(Vector<i64>),
    Double(Vector<f64>),
    Boolean(Vector<bool>),
    Data(Vector<Vec<u8>>),
}

macro_rules! each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            Value::String($v) => $body,
            Value::Time($v) => $body,
            Value::Integer($v) => $body,
            Value::Long($v) => $body,
            Value::Double($v) => $body,
            Value::Boolean($v) => $body,
            Value::Data($v) => $body,
        }
    };
}

macro_rules! for_type {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            Type::String => {
                type $t = String;
                $body
            }
            Type::Time => {
                type $t = NaiveDateTime;
                $body
            }
            Type::Integer => {
                type $t = i32;
                $body
            }
            Type::Long => {
                type $t = i64;
                $body
            }
            Type::Double => {
                type $t = f64;
                $body
            }
            Type::Boolean => {
                type $t = bool;
                $body
            }
            Type::Data => {
                type $t = Vec<u8>;
                $body
            }
        }
    };
}

impl Value {
    /// An empty, new value of the given type.
    pub fn create(kind: Type) -> Value {
        for_type!(kind, T => T::wrap(Vector::<T>::new()))
    }

    /// Consumes the contiguous rows sharing the value vector id of the
    /// current row, leaving the cursor at the first row of the next vector.
    pub fn inflate(kind: Type, cursor: &mut RowCursor<'_>) -> Result<Value> {
        for_type!(kind, T => Ok(T::wrap(Vector::<T>::inflate(cursor)?)))
    }

    /// Same elements, but new with respect to persistence.
    pub fn duplicate(&self) -> Value {
        each_variant!(self, v => Element::wrap(v.duplicate()))
    }

    pub fn kind(&self) -> Type {
        match self {
            Value::String(_) => Type::String,
            Value::Time(_) => Type::Time,
            Value::Integer(_) => Type::Integer,
            Value::Long(_) => Type::Long,
            Value::Double(_) => Type::Double,
            Value::Boolean(_) => Type::Boolean,
            Value::Data(_) => Type::Data,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }
    pub fn is_empty(&self) -> bool {
        each_variant!(self, v => v.is_empty())
    }
    pub fn is_new(&self) -> bool {
        each_variant!(self, v => v.is_new())
    }
    pub fn is_modified(&self) -> bool {
        each_variant!(self, v => v.is_modified())
    }

    /// Whether `datum` could be an element of this value.
    pub fn verify(&self, datum: &Datum) -> bool {
        datum.kind() == self.kind()
    }

    pub fn push(&mut self, datum: Datum) -> Result<()> {
        if !self.verify(&datum) {
            return Err(RepoError::AttributeType(format!(
                "cannot add {} element to {} value",
                datum.kind(),
                self.kind()
            )));
        }
        each_variant!(self, v => {
            if let Some(element) = Element::from_datum(&datum) {
                v.push(element);
            }
        });
        Ok(())
    }

    pub fn data(&self) -> Vec<Datum> {
        each_variant!(self, v => v.get().iter().cloned().map(Element::into_datum).collect())
    }

    pub fn vector<T: Element>(&self) -> Result<&Vector<T>> {
        let kind = self.kind();
        T::peek(self).ok_or_else(|| mismatch(kind, T::TYPE))
    }

    pub fn vector_mut<T: Element>(&mut self) -> Result<&mut Vector<T>> {
        let kind = self.kind();
        T::peek_mut(self).ok_or_else(|| mismatch(kind, T::TYPE))
    }

    /// Writes the elements under `value_id` without touching the tracking
    /// state, so that a rolled back transaction leaves the value dirty.
    pub fn write(&self, tx: &Transaction, attribute: &str, value_id: i64) -> Result<()> {
        each_variant!(self, v => v.write(tx, attribute, value_id))
    }

    pub fn set_stored(&mut self) {
        each_variant!(self, v => v.set_stored())
    }

    pub fn store(&mut self, tx: &Transaction, attribute: &str, value_id: i64) -> Result<()> {
        if !(self.is_new() || self.is_modified()) {
            return Ok(());
        }
        self.write(tx, attribute, value_id)?;
        self.set_stored();
        Ok(())
    }
}

fn mismatch(declared: Type, requested: Type) -> RepoError {
    RepoError::AttributeType(format!(
        "value is of type {declared}, not {requested}"
    ))
}

// ------------- Rows -------------
/// One row of the attribute fetch: the attribute header repeated on every
/// element row, and the element itself when the vector is not empty.
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub attr_id: i32,
    pub attr_name: String,
    pub attr_type: i64,
    pub forced_scalar: bool,
    pub value_id: i64,
    pub index: Option<i64>,
    pub cell: Cell,
}

/// Rows must arrive sorted by value vector id and then by index.
#[derive(Debug)]
pub struct RowCursor<'r> {
    rows: &'r [VectorRow],
    position: usize,
}

impl<'r> RowCursor<'r> {
    pub fn new(rows: &'r [VectorRow]) -> Self {
        Self { rows, position: 0 }
    }
    pub fn peek(&self) -> Option<&'r VectorRow> {
        self.rows.get(self.position)
    }
    pub fn advance(&mut self) {
        self.position += 1;
    }
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.rows.len()
    }
}

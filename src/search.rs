//! Search constraints: items, expression trees, ordering and paging.
//!
//! A [`SearchData`] is compiled to a single SQL statement by
//! [`crate::compiler::compile`] and executed by
//! [`crate::repository::Repository::search`].
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::AttributeInfo;
use crate::datatype::{Datum, Type};
use crate::error::{RepoError, Result};
use crate::unit::Status;

// compiled once, shared by every operand
lazy_static! {
    static ref TIME_OPERAND: std::result::Result<Regex, regex::Error> = Regex::new(
        r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[ T](\d{1,2}):(\d{2})(?::(\d{2})(?:\.(\d{1,3}))?)?)?$"
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
    Like,
}

impl Operator {
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => " = ",
            Operator::Neq => " <> ",
            Operator::Lt => " < ",
            Operator::Leq => " <= ",
            Operator::Gt => " > ",
            Operator::Geq => " >= ",
            Operator::Like => " LIKE ",
        }
    }
}

/// Columns of the unit table that can be constrained or ordered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitColumn {
    TenantId,
    UnitId,
    CorrId,
    Name,
    Status,
    Created,
}

impl UnitColumn {
    pub fn sql(self) -> &'static str {
        match self {
            UnitColumn::TenantId => "ut.tenantid",
            UnitColumn::UnitId => "ut.unitid",
            UnitColumn::CorrId => "ut.corrid",
            UnitColumn::Name => "ut.name",
            UnitColumn::Status => "ut.status",
            UnitColumn::Created => "ut.created",
        }
    }

    pub fn kind(self) -> Type {
        match self {
            UnitColumn::TenantId | UnitColumn::Status => Type::Integer,
            UnitColumn::UnitId => Type::Long,
            UnitColumn::CorrId | UnitColumn::Name => Type::String,
            UnitColumn::Created => Type::Time,
        }
    }
}

// ------------- Items -------------
#[derive(Debug, Clone, PartialEq)]
pub enum SearchItem {
    /// Compares a column of the unit table.
    Unit {
        column: UnitColumn,
        operator: Operator,
        operand: Datum,
    },
    /// Compares the elements of an attribute. An adjustable time equality
    /// matches the whole span left unspecified by trailing zero components.
    Attribute {
        attr_id: i32,
        operator: Operator,
        operand: Datum,
        adjustable: bool,
    },
}

impl SearchItem {
    pub fn unit(column: UnitColumn, operator: Operator, operand: Datum) -> Result<Self> {
        if operand.kind() != column.kind() {
            return Err(RepoError::InvalidParameter(format!(
                "column {} takes {} operands, not {}",
                column.sql(),
                column.kind(),
                operand.kind()
            )));
        }
        Ok(SearchItem::Unit {
            column,
            operator,
            operand,
        })
    }

    pub fn tenant(tenant_id: i32) -> Self {
        SearchItem::Unit {
            column: UnitColumn::TenantId,
            operator: Operator::Eq,
            operand: Datum::Integer(tenant_id),
        }
    }

    pub fn unit_id(unit_id: i64) -> Self {
        SearchItem::Unit {
            column: UnitColumn::UnitId,
            operator: Operator::Eq,
            operand: Datum::Long(unit_id),
        }
    }

    pub fn corr_id(corr_id: &str) -> Self {
        SearchItem::Unit {
            column: UnitColumn::CorrId,
            operator: Operator::Eq,
            operand: Datum::String(corr_id.to_string()),
        }
    }

    pub fn name(operator: Operator, name: &str) -> Self {
        SearchItem::Unit {
            column: UnitColumn::Name,
            operator,
            operand: Datum::String(name.to_string()),
        }
    }

    pub fn status(operator: Operator, status: Status) -> Self {
        SearchItem::Unit {
            column: UnitColumn::Status,
            operator,
            operand: Datum::Integer(status.code()),
        }
    }

    /// Units that are effective or archived.
    pub fn effective() -> Self {
        Self::status(Operator::Geq, Status::Effective)
    }

    pub fn created(operator: Operator, time: NaiveDateTime) -> Self {
        SearchItem::Unit {
            column: UnitColumn::Created,
            operator,
            operand: Datum::Time(time),
        }
    }

    pub fn created_after(time: NaiveDateTime) -> Self {
        Self::created(Operator::Gt, time)
    }

    pub fn created_before(time: NaiveDateTime) -> Self {
        Self::created(Operator::Lt, time)
    }

    /// An exact attribute constraint. Opaque bytes are not searchable.
    pub fn attribute(attr_id: i32, operator: Operator, operand: Datum) -> Result<Self> {
        let item = SearchItem::Attribute {
            attr_id,
            operator,
            operand,
            adjustable: false,
        };
        item.check_searchable()?;
        Ok(item)
    }

    /// A time attribute constraint that may widen to an interval.
    pub fn attribute_time(attr_id: i32, operator: Operator, time: NaiveDateTime, adjustable: bool) -> Self {
        SearchItem::Attribute {
            attr_id,
            operator,
            operand: Datum::Time(time),
            adjustable,
        }
    }

    /// Parses `text` according to the attribute type. Time operands accept
    /// `YYYY-MM-DD[ HH:MM[:SS[.mmm]]]`, `now`/`n` and `today`/`d`/`t`, and
    /// are adjustable so that a bare date matches the whole day.
    pub fn attribute_from_str(info: &AttributeInfo, operator: Operator, text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || {
            RepoError::InvalidParameter(format!(
                "'{text}' is not a valid {} operand for attribute '{}'",
                info.kind, info.name
            ))
        };
        let operand = match info.kind {
            Type::String => Datum::String(text.to_string()),
            Type::Time => {
                return Ok(Self::attribute_time(info.id, operator, parse_time_operand(text)?, true));
            }
            Type::Integer => Datum::Integer(text.parse().map_err(|_| invalid())?),
            Type::Long => Datum::Long(text.parse().map_err(|_| invalid())?),
            Type::Double => Datum::Double(text.parse().map_err(|_| invalid())?),
            Type::Boolean => match text.to_lowercase().as_str() {
                "true" | "1" | "yes" => Datum::Boolean(true),
                "false" | "0" | "no" => Datum::Boolean(false),
                _ => return Err(invalid()),
            },
            Type::Data => {
                return Err(RepoError::InvalidParameter(format!(
                    "attribute '{}' holds data and is not searchable",
                    info.name
                )));
            }
        };
        Self::attribute(info.id, operator, operand)
    }

    pub fn kind(&self) -> Type {
        match self {
            SearchItem::Unit { operand, .. } | SearchItem::Attribute { operand, .. } => operand.kind(),
        }
    }

    pub(crate) fn check_searchable(&self) -> Result<()> {
        if let SearchItem::Attribute { attr_id, operand, .. } = self {
            if !operand.kind().is_searchable() {
                return Err(RepoError::InvalidParameter(format!(
                    "attribute {attr_id} holds {} which is not searchable",
                    operand.kind()
                )));
            }
            if let Datum::Double(d) = operand {
                if !d.is_finite() {
                    return Err(RepoError::InvalidParameter(format!(
                        "attribute {attr_id} cannot be compared with {d}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Components left out of `text` are zero, which is what makes an
/// adjustable comparison widen.
pub fn parse_time_operand(text: &str) -> Result<NaiveDateTime> {
    let now = Local::now().naive_local();
    match text.to_lowercase().as_str() {
        "n" | "now" => return Ok(now),
        "d" | "t" | "today" => return Ok(now.date().and_time(NaiveTime::MIN)),
        _ => {}
    }
    let invalid = || RepoError::InvalidParameter(format!("'{text}' is not a valid time"));
    let pattern = TIME_OPERAND
        .as_ref()
        .map_err(|e| RepoError::SystemInconsistency(e.to_string()))?;
    let captures = pattern.captures(text).ok_or_else(invalid)?;
    let part = |index: usize| -> u32 {
        captures
            .get(index)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let year = captures
        .get(1)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .ok_or_else(invalid)?;
    let millis = captures
        .get(7)
        .map(|m| format!("{:0<3}", m.as_str()).parse::<u32>().unwrap_or(0))
        .unwrap_or(0);
    let date = NaiveDate::from_ymd_opt(year, part(2), part(3)).ok_or_else(invalid)?;
    let time = NaiveTime::from_hms_milli_opt(part(4), part(5), part(6), millis).ok_or_else(invalid)?;
    Ok(date.and_time(time))
}

// ------------- Expressions -------------
#[derive(Debug, Clone, PartialEq)]
pub enum SearchExpression {
    Leaf(SearchItem),
    Not(Box<SearchExpression>),
    And(Box<SearchExpression>, Box<SearchExpression>),
    Or(Box<SearchExpression>, Box<SearchExpression>),
}

impl From<SearchItem> for SearchExpression {
    fn from(item: SearchItem) -> Self {
        SearchExpression::Leaf(item)
    }
}

impl SearchExpression {
    pub fn and(self, other: impl Into<SearchExpression>) -> Self {
        SearchExpression::And(Box::new(self), Box::new(other.into()))
    }

    pub fn or(self, other: impl Into<SearchExpression>) -> Self {
        SearchExpression::Or(Box::new(self), Box::new(other.into()))
    }

    pub fn negate(self) -> Self {
        SearchExpression::Not(Box::new(self))
    }

    /// Left-deep conjunction of the items, None when there are none.
    pub fn all<I>(items: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<SearchExpression>,
    {
        items
            .into_iter()
            .map(Into::<SearchExpression>::into)
            .reduce(|left, right| left.and(right))
    }

    /// Left-deep disjunction of the items, None when there are none.
    pub fn any<I>(items: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: Into<SearchExpression>,
    {
        items
            .into_iter()
            .map(Into::<SearchExpression>::into)
            .reduce(|left, right| left.or(right))
    }
}

// ------------- Ordering and paging -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOrder {
    columns: Vec<(UnitColumn, bool)>,
}

impl Default for SearchOrder {
    /// Newest first.
    fn default() -> Self {
        Self::by(UnitColumn::Created, false)
    }
}

impl SearchOrder {
    pub fn by(column: UnitColumn, ascending: bool) -> Self {
        Self {
            columns: vec![(column, ascending)],
        }
    }

    pub fn unordered() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn then(mut self, column: UnitColumn, ascending: bool) -> Self {
        self.columns.push((column, ascending));
        self
    }

    pub fn columns(&self) -> &[(UnitColumn, bool)] {
        &self.columns
    }
}

/// Either a page (`offset` rows skipped, at most `size` taken, zero meaning
/// no limit) or a flat cap of `first` rows. A page wins over the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    pub offset: u32,
    pub size: u32,
    pub first: u32,
}

impl Paging {
    pub fn is_paged(&self) -> bool {
        self.offset > 0 || self.size > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchData {
    pub expression: Option<SearchExpression>,
    pub order: SearchOrder,
    pub paging: Paging,
}

impl SearchData {
    pub fn new(expression: impl Into<SearchExpression>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, offset: u32, size: u32) -> Self {
        self.paging.offset = offset;
        self.paging.size = size;
        self
    }

    pub fn first(mut self, count: u32) -> Self {
        self.paging.first = count;
        self
    }
}

//! Compiles a [`SearchData`] into one SQL statement selecting the
//! `(tenantid, unitid)` of matching units.
//!
//! Operands are written into the statement text. Single quotes are replaced
//! by blanks, which is the only protection string operands get, so
//! untrusted input must not reach a search without that in mind.
//!
//! String comparisons are case-insensitive: both sides are lower-cased.
//! An equality whose operand holds a wildcard (`*`, `%` or `_`) becomes
//! LIKE, with `*` translated to the engine's wildcard, and a LIKE without
//! any wildcard becomes an equality.
use chrono::{Duration, NaiveDateTime, Timelike};

use crate::adapter::{DatabaseAdapter, IDENTITY};
use crate::datatype::{Datum, Type};
use crate::error::{RepoError, Result};
use crate::persist::statements;
use crate::search::{Operator, SearchData, SearchExpression, SearchItem, UnitColumn};

const WILDCARDS: [char; 3] = ['*', '%', '_'];

pub fn compile(adapter: &dyn DatabaseAdapter, data: &SearchData) -> Result<String> {
    let mut sql = String::from("SELECT ut.tenantid, ut.unitid");
    // some engines want the ordering columns in the select list
    let mut selected = vec![UnitColumn::TenantId, UnitColumn::UnitId];
    for (column, _) in data.order.columns() {
        if !selected.contains(column) {
            selected.push(*column);
            sql.push_str(", ");
            sql.push_str(column.sql());
        }
    }
    sql.push_str(" FROM repo_unit ut");

    if let Some(expression) = &data.expression {
        check(expression)?;
        sql.push_str(" WHERE ");
        sql.push_str(&lower(adapter, expression)?);
    }

    if !data.order.columns().is_empty() {
        let order = data
            .order
            .columns()
            .iter()
            .map(|(column, ascending)| {
                format!("{} {}", column.sql(), if *ascending { "ASC" } else { "DESC" })
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    adapter.paging(&mut sql, &data.paging);
    Ok(sql)
}

// rejects the whole expression before anything is emitted
fn check(expression: &SearchExpression) -> Result<()> {
    match expression {
        SearchExpression::Leaf(item) => item.check_searchable(),
        SearchExpression::Not(inner) => check(inner),
        SearchExpression::And(left, right) | SearchExpression::Or(left, right) => {
            check(left)?;
            check(right)
        }
    }
}

fn lower(adapter: &dyn DatabaseAdapter, expression: &SearchExpression) -> Result<String> {
    match expression {
        SearchExpression::Leaf(item) => leaf(adapter, item),
        SearchExpression::Not(inner) => Ok(format!("NOT ({})", lower(adapter, inner)?)),
        SearchExpression::Or(left, right) => Ok(format!(
            "({} OR {})",
            lower(adapter, left)?,
            lower(adapter, right)?
        )),
        SearchExpression::And(..) => conjunction(adapter, expression),
    }
}

/// Flattens a chain of ANDs. Attribute constraints in the chain are
/// gathered and intersected in one go rather than tested one by one.
fn conjunction(adapter: &dyn DatabaseAdapter, expression: &SearchExpression) -> Result<String> {
    let mut conjuncts = Vec::new();
    flatten(expression, &mut conjuncts);

    let mut parts = Vec::new();
    let mut subqueries = Vec::new();
    for conjunct in conjuncts {
        match conjunct {
            SearchExpression::Leaf(item @ SearchItem::Attribute { .. }) => {
                subqueries.push(subquery(adapter, item)?);
            }
            other => parts.push(lower(adapter, other)?),
        }
    }
    match subqueries.len() {
        0 => {}
        1 => parts.push(format!("{IDENTITY} IN ({})", subqueries[0])),
        _ => parts.push(adapter.intersect(&subqueries)),
    }
    Ok(format!("({})", parts.join(" AND ")))
}

fn flatten<'e>(expression: &'e SearchExpression, conjuncts: &mut Vec<&'e SearchExpression>) {
    match expression {
        SearchExpression::And(left, right) => {
            flatten(left, conjuncts);
            flatten(right, conjuncts);
        }
        other => conjuncts.push(other),
    }
}

fn leaf(adapter: &dyn DatabaseAdapter, item: &SearchItem) -> Result<String> {
    match item {
        SearchItem::Unit {
            column,
            operator,
            operand,
        } => compare(adapter, column.sql(), *operator, operand, false),
        SearchItem::Attribute { .. } => Ok(format!("{IDENTITY} IN ({})", subquery(adapter, item)?)),
    }
}

/// The units having an attribute value that satisfies the item.
fn subquery(adapter: &dyn DatabaseAdapter, item: &SearchItem) -> Result<String> {
    let SearchItem::Attribute {
        attr_id,
        operator,
        operand,
        adjustable,
    } = item
    else {
        return Err(RepoError::InvalidParameter(
            "not an attribute constraint".into(),
        ));
    };
    let table = statements::vector_table(operand.kind());
    Ok(format!(
        "SELECT av.tenantid, av.unitid FROM repo_unit ut \
         INNER JOIN repo_attribute_value av ON (ut.tenantid = av.tenantid AND ut.unitid = av.unitid) \
         INNER JOIN {table} vv ON (av.valueid = vv.valueid) \
         WHERE av.attrid = {attr_id} AND {}",
        compare(adapter, "vv.val", *operator, operand, *adjustable)?
    ))
}

fn compare(
    adapter: &dyn DatabaseAdapter,
    column: &str,
    operator: Operator,
    operand: &Datum,
    adjust: bool,
) -> Result<String> {
    match operand {
        Datum::String(text) => {
            let (operator, value) = normalize(adapter, operator, text);
            Ok(format!("LOWER({column}){}'{value}'", operator.sql()))
        }
        Datum::Time(time) => {
            if adjust && operator == Operator::Eq {
                if let Some((low, high)) = span(time) {
                    return Ok(format!(
                        "({column} >= {} AND {column} <= {})",
                        adapter.time_literal(&low),
                        adapter.time_literal(&high)
                    ));
                }
            }
            Ok(format!("{column}{}{}", operator.sql(), adapter.time_literal(time)))
        }
        Datum::Integer(i) => Ok(format!("{column}{}{i}", operator.sql())),
        Datum::Long(l) => Ok(format!("{column}{}{l}", operator.sql())),
        Datum::Double(d) if !d.is_finite() => Err(RepoError::InvalidParameter(format!(
            "{d} has no SQL literal"
        ))),
        Datum::Double(d) => Ok(format!("{column}{}{d:?}", operator.sql())),
        Datum::Boolean(b) => Ok(format!(
            "{column}{}{}",
            operator.sql(),
            adapter.boolean_literal(*b)
        )),
        Datum::Data(_) => Err(RepoError::InvalidParameter(format!(
            "{} values are not searchable",
            Type::Data
        ))),
    }
}

/// Lower-cases, blanks out quotes and switches between equality and LIKE
/// depending on whether wildcards are present.
pub fn normalize(adapter: &dyn DatabaseAdapter, operator: Operator, text: &str) -> (Operator, String) {
    let wildcard = adapter.wildcard();
    let value: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\'' => ' ',
            '*' => wildcard,
            c => c,
        })
        .collect();
    let has_wildcard = text.contains(WILDCARDS);
    let operator = match operator {
        Operator::Eq if has_wildcard => Operator::Like,
        Operator::Like if !has_wildcard => Operator::Eq,
        other => other,
    };
    (operator, value)
}

/// The closed interval covered by the trailing zero components of `time`,
/// or None when it is given to the millisecond.
pub fn span(time: &NaiveDateTime) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let millis = time.nanosecond() / 1_000_000;
    if millis != 0 {
        return None;
    }
    let low = time.with_nanosecond(0)?;
    let width = if time.second() != 0 {
        Duration::seconds(1)
    } else if time.minute() != 0 {
        Duration::minutes(1)
    } else if time.hour() != 0 {
        Duration::hours(1)
    } else {
        Duration::days(1)
    };
    Some((low, low + width - Duration::milliseconds(1)))
}

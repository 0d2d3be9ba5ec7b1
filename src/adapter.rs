//! What differs between SQL engines when compiling a search.
use chrono::NaiveDateTime;

use crate::datatype::format_time;
use crate::search::Paging;

/// The identity columns every attribute subquery is matched against.
pub const IDENTITY: &str = "(ut.tenantid, ut.unitid)";

pub trait DatabaseAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// A time literal comparable with the stored time columns.
    fn time_literal(&self, time: &NaiveDateTime) -> String;

    /// The engine's multi-character wildcard.
    fn wildcard(&self) -> char {
        '%'
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Combines subqueries, each selecting `(tenantid, unitid)`, into one
    /// condition on the unit identity. Defaults to one membership test per
    /// subquery, chained with AND.
    fn intersect(&self, subqueries: &[String]) -> String {
        subqueries
            .iter()
            .map(|subquery| format!("{IDENTITY} IN ({subquery})"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Appends the paging clause, if any.
    fn paging(&self, sql: &mut String, paging: &Paging);
}

// ------------- SQLite -------------
/// Times are stored as fixed-width text, so literals are plain strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl DatabaseAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn time_literal(&self, time: &NaiveDateTime) -> String {
        format!("'{}'", format_time(time))
    }

    fn intersect(&self, subqueries: &[String]) -> String {
        format!("{IDENTITY} IN ({})", subqueries.join(" INTERSECT "))
    }

    fn paging(&self, sql: &mut String, paging: &Paging) {
        if paging.is_paged() {
            let size = if paging.size > 0 {
                i64::from(paging.size)
            } else {
                -1
            };
            sql.push_str(&format!(" LIMIT {size} OFFSET {}", paging.offset));
        } else if paging.first > 0 {
            sql.push_str(&format!(" LIMIT {}", paging.first));
        }
    }
}

// ------------- PostgreSQL -------------
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresAdapter;

impl DatabaseAdapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn time_literal(&self, time: &NaiveDateTime) -> String {
        format!(
            "TO_TIMESTAMP('{}', 'YYYY-MM-DD HH24:MI:SS.MS')",
            format_time(time)
        )
    }

    fn paging(&self, sql: &mut String, paging: &Paging) {
        if paging.is_paged() {
            sql.push_str(&format!(" OFFSET {} ROWS", paging.offset));
            if paging.size > 0 {
                sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", paging.size));
            }
        } else if paging.first > 0 {
            sql.push_str(&format!(" FETCH FIRST {} ROWS ONLY", paging.first));
        }
    }
}

// used for persistence
use rusqlite::{Connection, OpenFlags, Transaction};

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::DatabaseConfig;
use crate::error::{RepoError, Result};

/// Statement text shared by the modules that talk to the database.
pub mod statements {
    use crate::datatype::Type;

    pub const UNIT_INSERT: &str = "insert into repo_unit (tenantid, corrid, name, status, created) values (?1, ?2, ?3, ?4, ?5)";
    pub const UNIT_GET: &str = "select tenantid, unitid, corrid, name, status, created from repo_unit where tenantid = ?1 and unitid = ?2";
    pub const UNIT_EXISTS: &str =
        "select count(*) from repo_unit where tenantid = ?1 and unitid = ?2";
    pub const UNIT_GET_STATUS: &str =
        "select status from repo_unit where tenantid = ?1 and unitid = ?2";
    pub const UNIT_SET_STATUS: &str =
        "update repo_unit set status = ?3 where tenantid = ?1 and unitid = ?2";
    pub const UNIT_SET_NAME: &str =
        "update repo_unit set name = ?3 where tenantid = ?1 and unitid = ?2";
    pub const UNIT_DELETE: &str = "delete from repo_unit where tenantid = ?1 and unitid = ?2";

    // One row per element, or a single row with null index for an empty vector.
    // Ordered by value vector id so that each vector's rows are contiguous.
    pub const UNIT_ATTRIBUTES: &str = "
        select av.attrid, a.attrname, a.attrtype, a.scalar, av.valueid,
               coalesce(s.idx, t.idx, i.idx, l.idx, d.idx, b.idx, x.idx) as idx,
               coalesce(s.val, t.val, i.val, l.val, d.val, b.val, x.val) as val
        from repo_attribute_value av
        inner join repo_attribute a on (a.attrid = av.attrid)
        left outer join repo_string_vector s on (s.valueid = av.valueid)
        left outer join repo_time_vector t on (t.valueid = av.valueid)
        left outer join repo_integer_vector i on (i.valueid = av.valueid)
        left outer join repo_long_vector l on (l.valueid = av.valueid)
        left outer join repo_double_vector d on (d.valueid = av.valueid)
        left outer join repo_boolean_vector b on (b.valueid = av.valueid)
        left outer join repo_data_vector x on (x.valueid = av.valueid)
        where av.tenantid = ?1 and av.unitid = ?2
        order by av.valueid, idx";
    pub const ATTRIBUTE_VALUE_INSERT: &str =
        "insert into repo_attribute_value (tenantid, unitid, attrid) values (?1, ?2, ?3)";
    // the vector rows of the abandoned value go with it
    pub const ATTRIBUTE_VALUE_DELETE: &str =
        "delete from repo_attribute_value where tenantid = ?1 and unitid = ?2 and attrid = ?3";

    pub const CATALOG_ALL: &str = "select attrid, attrname, attrtype, scalar from repo_attribute";
    pub const CATALOG_INSERT: &str =
        "insert into repo_attribute (attrname, attrtype, scalar, created) values (?1, ?2, ?3, ?4)";

    pub const LOCK_COUNT: &str = "select count(*) from repo_lock where tenantid = ?1 and unitid = ?2";
    pub const LOCK_INSERT: &str = "insert into repo_lock (tenantid, unitid, purpose, locktype, locktime, expire) values (?1, ?2, ?3, ?4, ?5, null)";
    pub const LOCK_DELETE: &str = "delete from repo_lock where tenantid = ?1 and unitid = ?2";
    pub const LOCK_LIST: &str = "select purpose, locktype, locktime, expire from repo_lock where tenantid = ?1 and unitid = ?2 order by locktime";

    pub const INTERNAL_INSERT: &str = "insert or ignore into repo_internal_assoc (tenantid, unitid, assoctype, assoctenantid, assocunitid) values (?1, ?2, ?3, ?4, ?5)";
    pub const INTERNAL_DELETE: &str = "delete from repo_internal_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3 and assoctenantid = ?4 and assocunitid = ?5";
    pub const INTERNAL_DELETE_TYPE: &str = "delete from repo_internal_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3";
    pub const INTERNAL_RIGHT: &str = "select assoctenantid, assocunitid from repo_internal_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3 order by assoctenantid, assocunitid";
    pub const INTERNAL_LEFT: &str = "select tenantid, unitid from repo_internal_assoc where assoctenantid = ?1 and assocunitid = ?2 and assoctype = ?3 order by tenantid, unitid";
    pub const EXTERNAL_INSERT: &str = "insert or ignore into repo_external_assoc (tenantid, unitid, assoctype, assocstring) values (?1, ?2, ?3, ?4)";
    pub const EXTERNAL_DELETE: &str = "delete from repo_external_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3 and assocstring = ?4";
    pub const EXTERNAL_DELETE_TYPE: &str =
        "delete from repo_external_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3";
    pub const EXTERNAL_RIGHT: &str = "select assocstring from repo_external_assoc where tenantid = ?1 and unitid = ?2 and assoctype = ?3 order by assocstring";
    pub const EXTERNAL_LEFT: &str = "select tenantid, unitid from repo_external_assoc where assoctype = ?1 and assocstring = ?2 order by tenantid, unitid";

    pub fn vector_table(kind: Type) -> &'static str {
        match kind {
            Type::String => "repo_string_vector",
            Type::Time => "repo_time_vector",
            Type::Integer => "repo_integer_vector",
            Type::Long => "repo_long_vector",
            Type::Double => "repo_double_vector",
            Type::Boolean => "repo_boolean_vector",
            Type::Data => "repo_data_vector",
        }
    }

    pub fn vector_insert(kind: Type) -> &'static str {
        match kind {
            Type::String => "insert into repo_string_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Time => "insert into repo_time_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Integer => "insert into repo_integer_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Long => "insert into repo_long_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Double => "insert into repo_double_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Boolean => "insert into repo_boolean_vector (valueid, idx, val) values (?1, ?2, ?3)",
            Type::Data => "insert into repo_data_vector (valueid, idx, val) values (?1, ?2, ?3)",
        }
    }
}

const SCHEMA: &str = "
    create table if not exists repo_unit (
        tenantid integer not null,
        unitid integer not null primary key autoincrement,
        corrid text not null,
        name text null,
        status integer not null,
        created text not null,
        constraint repo_unit_corrid_unique unique (corrid),
        constraint repo_unit_identity unique (tenantid, unitid)
    );
    create index if not exists repo_unit_status_idx on repo_unit (tenantid, status);
    create table if not exists repo_attribute (
        attrid integer not null primary key autoincrement,
        attrname text not null collate nocase,
        attrtype integer not null,
        scalar integer not null default 0,
        created text not null,
        constraint repo_attribute_name_unique unique (attrname)
    );
    create table if not exists repo_attribute_value (
        tenantid integer not null,
        unitid integer not null,
        attrid integer not null,
        valueid integer not null primary key autoincrement,
        constraint repo_attribute_value_unique unique (tenantid, unitid, attrid),
        constraint repo_attribute_value_unit foreign key (tenantid, unitid)
            references repo_unit (tenantid, unitid) on delete cascade,
        constraint repo_attribute_value_attr foreign key (attrid)
            references repo_attribute (attrid)
    );
    create index if not exists repo_attribute_value_attr_idx on repo_attribute_value (attrid, valueid);
    create table if not exists repo_string_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val text not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_time_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val text not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_integer_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val integer not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_long_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val integer not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_double_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val real not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_boolean_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val integer not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_data_vector (
        valueid integer not null references repo_attribute_value (valueid) on delete cascade,
        idx integer not null,
        val blob not null,
        primary key (valueid, idx)
    );
    create table if not exists repo_internal_assoc (
        tenantid integer not null,
        unitid integer not null,
        assoctype integer not null,
        assoctenantid integer not null,
        assocunitid integer not null,
        primary key (tenantid, unitid, assoctype, assoctenantid, assocunitid),
        constraint repo_internal_assoc_left foreign key (tenantid, unitid)
            references repo_unit (tenantid, unitid) on delete cascade,
        constraint repo_internal_assoc_right foreign key (assoctenantid, assocunitid)
            references repo_unit (tenantid, unitid) on delete cascade
    );
    create index if not exists repo_internal_assoc_right_idx on repo_internal_assoc (assoctenantid, assocunitid, assoctype);
    create table if not exists repo_external_assoc (
        tenantid integer not null,
        unitid integer not null,
        assoctype integer not null,
        assocstring text not null,
        primary key (tenantid, unitid, assoctype, assocstring),
        constraint repo_external_assoc_left foreign key (tenantid, unitid)
            references repo_unit (tenantid, unitid) on delete cascade
    );
    create index if not exists repo_external_assoc_string_idx on repo_external_assoc (assoctype, assocstring);
    create table if not exists repo_lock (
        tenantid integer not null,
        unitid integer not null,
        purpose text not null,
        locktype integer not null,
        locktime text not null,
        expire text null,
        constraint repo_lock_unit foreign key (tenantid, unitid)
            references repo_unit (tenantid, unitid) on delete cascade
    );
    create index if not exists repo_lock_unit_idx on repo_lock (tenantid, unitid);
";

// ------------- Persistence -------------
/// Owns the connection. Every statement goes through [`Persistor::read`]
/// or [`Persistor::write`], which retry on transient engine failures.
pub struct Persistor {
    connection: Mutex<Connection>,
    max_retries: u32,
    backoff: Duration,
}

impl Persistor {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let connection = match &config.path {
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            ),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| RepoError::Connection(e.to_string()))?;
        connection
            .pragma_update(None, "foreign_keys", true)
            .map_err(|e| RepoError::Connection(e.to_string()))?;
        connection
            .busy_timeout(config.busy_timeout())
            .map_err(|e| RepoError::Connection(e.to_string()))?;
        connection.execute_batch(SCHEMA)?;
        debug!(path = ?config.path, "repository schema in place");
        Ok(Self {
            connection: Mutex::new(connection),
            max_retries: config.deadlock_max_retries.max(1),
            backoff: config.backoff(),
        })
    }

    /// Runs `work` against a connection that refuses writes.
    pub fn read<T>(&self, mut work: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        self.with_retry(|| {
            let connection = self.connection.lock()?;
            connection
                .pragma_update(None, "query_only", true)
                .map_err(RepoError::Read)?;
            let outcome = work(&connection).map_err(RepoError::Read);
            connection
                .pragma_update(None, "query_only", false)
                .map_err(RepoError::Read)?;
            outcome
        })
    }

    /// Runs `work` in a transaction that is committed if `work` succeeds and
    /// rolled back otherwise.
    pub fn write<T>(&self, mut work: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        self.with_retry(|| {
            let mut connection = self.connection.lock()?;
            let tx = connection.transaction()?;
            match work(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    debug!(error = %e, "rolling back transaction");
                    if let Err(rollback) = tx.rollback() {
                        error!(error = %rollback, "transaction rollback failed");
                    }
                    Err(e)
                }
            }
        })
    }

    fn with_retry<T>(&self, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt() {
                Err(e) if e.is_transient() && tries < self.max_retries => {
                    warn!(error = %e, tries, "transient failure, retrying");
                    thread::sleep(self.backoff);
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(error = %e, tries, "giving up after repeated transient failures");
                    }
                    return Err(e);
                }
                outcome => return outcome,
            }
        }
    }
}

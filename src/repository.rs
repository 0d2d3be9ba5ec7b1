use rusqlite::params;
use tracing::{debug, error, info};

use crate::adapter::{DatabaseAdapter, SqliteAdapter};
use crate::association::{self, AssociationType};
use crate::cache::UnitCache;
use crate::catalog::{AttributeInfo, Catalog};
use crate::compiler;
use crate::config::Configuration;
use crate::datatype::Type;
use crate::error::Result;
use crate::lock;
use crate::persist::{Persistor, statements};
use crate::search::{Operator, SearchData, SearchExpression, SearchItem, SearchOrder, UnitColumn};
use crate::unit::{Status, Unit, UnitRef};

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub units: Vec<Unit>,
    /// Rows matched by the statement, before resolving them to units.
    pub total_hits: usize,
}

// ------------- Repository -------------
/// Ties together storage, the attribute catalog, the query compiler and
/// the unit cache. Share it by reference or behind an `Arc`.
pub struct Repository {
    configuration: Configuration,
    persistor: Persistor,
    catalog: Catalog,
    adapter: SqliteAdapter,
    cache: UnitCache,
}

impl Repository {
    pub fn new(configuration: Configuration) -> Result<Self> {
        let persistor = Persistor::new(&configuration.database)?;
        let cache = UnitCache::new(&configuration.cache);
        info!(
            path = ?configuration.database.path,
            cache_size = configuration.cache.max_size,
            "repository opened"
        );
        Ok(Self {
            configuration,
            persistor,
            catalog: Catalog::new(),
            adapter: SqliteAdapter,
            cache,
        })
    }

    /// A private in-memory repository without background sweeper.
    pub fn in_memory() -> Result<Self> {
        Self::new(Configuration::in_memory())
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
    pub fn persistor(&self) -> &Persistor {
        &self.persistor
    }
    pub fn cache(&self) -> &UnitCache {
        &self.cache
    }
    pub fn adapter(&self) -> &dyn DatabaseAdapter {
        &self.adapter
    }

    // ----- Catalog -----

    pub fn define_attribute(&self, name: &str, kind: Type, forced_scalar: bool) -> Result<AttributeInfo> {
        self.catalog.define(&self.persistor, name, kind, forced_scalar)
    }

    pub fn attribute_info(&self, name: &str) -> Result<Option<AttributeInfo>> {
        self.catalog.by_name(&self.persistor, name)
    }

    pub fn attribute_info_by_id(&self, id: i32) -> Result<Option<AttributeInfo>> {
        self.catalog.by_id(&self.persistor, id)
    }

    pub fn attributes(&self) -> Result<Vec<AttributeInfo>> {
        self.catalog.all(&self.persistor)
    }

    // ----- Units -----

    /// A new unit, not stored until [`Unit::store`] is called.
    pub fn create_unit(&self, tenant_id: i32, name: Option<&str>) -> Unit {
        Unit::new(tenant_id, name)
    }

    /// Looks in the cache first, then in the database.
    pub fn get_unit(&self, tenant_id: i32, unit_id: i64) -> Result<Option<Unit>> {
        let reference = UnitRef::new(tenant_id, unit_id);
        if let Some(unit) = self.cache.get(reference) {
            return Ok(Some(unit));
        }
        let unit = Unit::load(self, reference)?;
        if let Some(unit) = &unit {
            self.cache.store(unit);
        }
        Ok(unit)
    }

    pub fn unit_exists(&self, tenant_id: i32, unit_id: i64) -> Result<bool> {
        let count: i64 = self.persistor.read(|connection| {
            connection
                .prepare_cached(statements::UNIT_EXISTS)?
                .query_row(params![tenant_id, unit_id], |row| row.get(0))
        })?;
        Ok(count > 0)
    }

    /// Units holding an external reference of the given type.
    pub fn associated_units(&self, kind: AssociationType, reference: &str) -> Result<Vec<Unit>> {
        let refs = association::left_associations(&self.persistor, kind, reference)?;
        let mut units = Vec::with_capacity(refs.len());
        for unit in refs {
            if let Some(resolved) = self.get_unit(unit.tenant_id, unit.unit_id)? {
                units.push(resolved);
            }
        }
        Ok(units)
    }

    // ----- Search -----

    pub fn compile(&self, data: &SearchData) -> Result<String> {
        compiler::compile(&self.adapter, data)
    }

    fn search_refs(&self, data: &SearchData) -> Result<Vec<UnitRef>> {
        let sql = self.compile(data)?;
        debug!(sql = %sql, "search");
        self.persistor.read(|connection| {
            let mut statement = connection.prepare(&sql)?;
            let rows = statement.query_map([], |row| {
                Ok(UnitRef::new(row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })
    }

    /// Runs the search and resolves the hits through the cache.
    pub fn search(&self, data: &SearchData) -> Result<SearchResult> {
        let refs = self.search_refs(data)?;
        let mut units = Vec::with_capacity(refs.len());
        for reference in &refs {
            if let Some(unit) = self.get_unit(reference.tenant_id, reference.unit_id)? {
                units.push(unit);
            }
        }
        Ok(SearchResult {
            units,
            total_hits: refs.len(),
        })
    }

    // ----- Disposal -----

    /// Removes the units of a tenant that are pending disposition, together
    /// with everything attached to them. Locked units are left alone. A unit
    /// that fails is logged and skipped. Returns the number removed.
    pub fn dispose(&self, tenant_id: i32) -> Result<usize> {
        let batch = self.configuration.repository.dispose_batch_size.max(1);
        let mut disposed = 0;
        let mut skipped: u32 = 0;
        loop {
            let data = SearchData::new(
                SearchExpression::from(SearchItem::tenant(tenant_id))
                    .and(SearchItem::status(Operator::Eq, Status::PendingDisposition)),
            )
            .order(SearchOrder::by(UnitColumn::UnitId, true))
            .page(skipped, batch);
            let refs = self.search_refs(&data)?;
            for reference in &refs {
                match self.dispose_unit(*reference) {
                    Ok(true) => disposed += 1,
                    Ok(false) => skipped += 1,
                    Err(e) => {
                        error!(unit = %reference, error = %e, "could not dispose unit");
                        skipped += 1;
                    }
                }
            }
            // removed units drop out of the result, skipped ones stay ahead
            if refs.len() < batch as usize {
                break;
            }
        }
        info!(tenant = tenant_id, disposed, skipped, "disposal finished");
        Ok(disposed)
    }

    fn dispose_unit(&self, unit: UnitRef) -> Result<bool> {
        if lock::is_locked(&self.persistor, unit)? {
            debug!(unit = %unit, "locked, not disposed");
            return Ok(false);
        }
        self.persistor.write(|tx| {
            tx.prepare_cached(statements::UNIT_DELETE)?
                .execute(params![unit.tenant_id, unit.unit_id])?;
            Ok(())
        })?;
        self.cache.remove(unit);
        info!(unit = %unit, action = "dispose", "unit disposed");
        Ok(true)
    }

    /// Stops the cache sweeper.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

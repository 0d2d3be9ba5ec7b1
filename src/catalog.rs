//! The catalog of known attributes.
//!
//! Attributes are defined once, globally, with a name, a type and whether
//! they may hold more than one element. Names are matched without regard to
//! case. The catalog is read from the database on first use and refreshed
//! when a name or id is not found, since another process may have defined it.
use std::collections::HashMap;
use std::sync::Mutex;

// used to keep the one-to-one mapping between attribute ids and names
use bimap::BiMap;

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, info};

use crate::OtherHasher;
use crate::datatype::{Type, format_time};
use crate::error::{RepoError, Result};
use crate::persist::{Persistor, statements};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub id: i32,
    pub name: String,
    pub kind: Type,
    pub forced_scalar: bool,
}

#[derive(Debug)]
struct Known {
    // names are kept lower case
    names: BiMap<i32, String>,
    infos: HashMap<i32, AttributeInfo, OtherHasher>,
    loaded: bool,
}

impl Default for Known {
    fn default() -> Self {
        Self {
            names: BiMap::new(),
            infos: HashMap::default(),
            loaded: false,
        }
    }
}

impl Known {
    fn keep(&mut self, info: AttributeInfo) {
        self.names.insert(info.id, info.name.to_lowercase());
        self.infos.insert(info.id, info);
    }
    fn by_name(&self, name: &str) -> Option<AttributeInfo> {
        self.names
            .get_by_right(&name.to_lowercase())
            .and_then(|id| self.infos.get(id))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    known: Mutex<Known>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&self, persistor: &Persistor) -> Result<()> {
        let rows = persistor.read(|connection| {
            let mut statement = connection.prepare_cached(statements::CATALOG_ALL)?;
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        let mut known = self.known.lock()?;
        for (id, name, code, forced_scalar) in rows {
            known.keep(AttributeInfo {
                id,
                name,
                kind: Type::of(code)?,
                forced_scalar,
            });
        }
        known.loaded = true;
        debug!(attributes = known.infos.len(), "attribute catalog loaded");
        Ok(())
    }

    fn lookup<F>(&self, persistor: &Persistor, find: F) -> Result<Option<AttributeInfo>>
    where
        F: Fn(&Known) -> Option<AttributeInfo>,
    {
        {
            let known = self.known.lock()?;
            if let Some(info) = find(&known) {
                return Ok(Some(info));
            }
        }
        self.refresh(persistor)?;
        let known = self.known.lock()?;
        Ok(find(&known))
    }

    pub fn by_name(&self, persistor: &Persistor, name: &str) -> Result<Option<AttributeInfo>> {
        self.lookup(persistor, |known| known.by_name(name))
    }

    pub fn by_id(&self, persistor: &Persistor, id: i32) -> Result<Option<AttributeInfo>> {
        self.lookup(persistor, |known| known.infos.get(&id).cloned())
    }


    /// Defines an attribute, or returns the existing definition when one
    /// with the same name and type is already known.
    pub fn define(
        &self,
        persistor: &Persistor,
        name: &str,
        kind: Type,
        forced_scalar: bool,
    ) -> Result<AttributeInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepoError::InvalidParameter(
                "attribute name must not be empty".into(),
            ));
        }
        if let Some(existing) = self.by_name(persistor, name)? {
            if existing.kind != kind {
                return Err(RepoError::InvalidParameter(format!(
                    "attribute '{}' is already defined as {}",
                    existing.name, existing.kind
                )));
            }
            return Ok(existing);
        }
        let created = format_time(&Utc::now().naive_utc());
        let id = persistor.write(|tx| {
            tx.prepare_cached(statements::CATALOG_INSERT)?.execute(params![
                name,
                kind.code(),
                forced_scalar,
                created
            ])?;
            i32::try_from(tx.last_insert_rowid()).map_err(|_| {
                RepoError::SystemInconsistency("attribute id out of range".into())
            })
        })?;
        let info = AttributeInfo {
            id,
            name: name.to_string(),
            kind,
            forced_scalar,
        };
        self.known.lock()?.keep(info.clone());
        info!(attribute = %info.name, id, kind = %kind, "attribute defined");
        Ok(info)
    }

    pub fn all(&self, persistor: &Persistor) -> Result<Vec<AttributeInfo>> {
        let loaded = self.known.lock()?.loaded;
        if !loaded {
            self.refresh(persistor)?;
        }
        let known = self.known.lock()?;
        let mut infos: Vec<AttributeInfo> = known.infos.values().cloned().collect();
        infos.sort_by_key(|info| info.id);
        Ok(infos)
    }
}

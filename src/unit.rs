use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDateTime, SubsecRound, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, error, info, warn};

use crate::OtherHasher;
use crate::association::{self, AssociationType};
use crate::attribute::Attribute;
use crate::datatype::{RowCursor, VectorRow, format_time, parse_time};
use crate::error::{RepoError, Result};
use crate::lock::{self, Lock, LockType};
use crate::persist::statements;
use crate::repository::Repository;

// ------------- Status -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    PendingDisposition = 1,
    PendingDeletion = 10,
    Obliterated = 20,
    Effective = 30,
    Archived = 40,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of(code: i64) -> Result<Status> {
        match code {
            1 => Ok(Status::PendingDisposition),
            10 => Ok(Status::PendingDeletion),
            20 => Ok(Status::Obliterated),
            30 => Ok(Status::Effective),
            40 => Ok(Status::Archived),
            _ => Err(RepoError::UnknownEnumeration {
                kind: "status",
                code,
            }),
        }
    }

    /// The transition table. Archived and pending disposition are final.
    ///
    /// Pending deletion and obliterated units may go back to effective, so
    /// that [`Unit::activate`] can undo [`Unit::inactivate`]. Both are
    /// one-way in the classic lifecycle; here they are not.
    pub fn permits(self, requested: Status) -> bool {
        use Status::*;
        match self {
            Effective => matches!(requested, PendingDeletion | PendingDisposition),
            PendingDeletion => matches!(requested, Effective | PendingDisposition),
            Obliterated => matches!(requested, Effective | PendingDisposition),
            PendingDisposition | Archived => false,
        }
    }
}

// ------------- Unit reference -------------
/// The identity of a persisted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitRef {
    pub tenant_id: i32,
    pub unit_id: i64,
}

impl UnitRef {
    pub fn new(tenant_id: i32, unit_id: i64) -> Self {
        Self { tenant_id, unit_id }
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.tenant_id, self.unit_id)
    }
}

fn correlation_id(tenant_id: i32) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(&tenant_id.to_le_bytes());
    hasher.update(
        &Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let hex = hasher.finalize().to_hex();
    let hex = hex.as_str();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

// stored times carry milliseconds only
fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(3)
}

// ------------- Unit -------------
/// The addressable object of the repository.
///
/// A unit gets its id when it is first stored. Attributes are loaded on
/// first access and tracked individually, so that storing a unit writes
/// only what was added or changed. Cloning gives a deep copy.
#[derive(Debug, Clone)]
pub struct Unit {
    tenant_id: i32,
    unit_id: Option<i64>,
    corr_id: String,
    name: Option<String>,
    status: Status,
    created: Option<NaiveDateTime>,
    // keyed by lower case name, None until fetched
    attributes: Option<HashMap<String, Attribute, OtherHasher>>,
    detached: Vec<i32>,
    renamed: bool,
}

impl Unit {
    pub fn new(tenant_id: i32, name: Option<&str>) -> Self {
        Self {
            tenant_id,
            unit_id: None,
            corr_id: correlation_id(tenant_id),
            name: name.map(str::to_string),
            status: Status::Effective,
            created: None,
            attributes: Some(HashMap::default()),
            detached: Vec::new(),
            renamed: false,
        }
    }

    /// Reads the unit row, leaving attributes to be fetched on demand.
    pub(crate) fn load(repo: &Repository, unit: UnitRef) -> Result<Option<Unit>> {
        let row = repo.persistor().read(|connection| {
            connection
                .prepare_cached(statements::UNIT_GET)?
                .query_row(params![unit.tenant_id, unit.unit_id], |row| {
                    Ok((
                        row.get::<_, i32>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })
                .optional()
        })?;
        let Some((tenant_id, unit_id, corr_id, name, status, created)) = row else {
            return Ok(None);
        };
        let created = parse_time(&created).map_err(|e| {
            error!(unit = %unit, error = %e, "unreadable creation time");
            RepoError::SystemInconsistency(format!("unreadable creation time of unit {unit}: {e}"))
        })?;
        Ok(Some(Unit {
            tenant_id,
            unit_id: Some(unit_id),
            corr_id,
            name,
            status: Status::of(status)?,
            created: Some(created),
            attributes: None,
            detached: Vec::new(),
            renamed: false,
        }))
    }

    pub fn tenant_id(&self) -> i32 {
        self.tenant_id
    }
    pub fn unit_id(&self) -> Option<i64> {
        self.unit_id
    }
    pub fn corr_id(&self) -> &str {
        &self.corr_id
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    /// Takes effect in storage at the next [`Unit::store`].
    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_string);
        self.renamed = true;
    }
    /// The status as last read or set through this instance.
    pub fn status(&self) -> Status {
        self.status
    }
    pub fn created(&self) -> Option<NaiveDateTime> {
        self.created
    }
    pub fn is_new(&self) -> bool {
        self.unit_id.is_none()
    }

    pub fn unit_ref(&self) -> Option<UnitRef> {
        self.unit_id.map(|unit_id| UnitRef::new(self.tenant_id, unit_id))
    }

    /// "tenant.id", or "tenant.?" for a unit not yet stored.
    pub fn reference(&self) -> String {
        match self.unit_id {
            Some(unit_id) => format!("{}.{}", self.tenant_id, unit_id),
            None => format!("{}.?", self.tenant_id),
        }
    }

    fn persisted(&self, action: &str) -> Result<UnitRef> {
        self.unit_ref().ok_or_else(|| {
            RepoError::IllegalRequest(format!("cannot {action} a unit that has not been stored"))
        })
    }

    // ----- Attributes -----

    /// Loads the attributes of a stored unit unless already loaded.
    pub fn fetch_attributes(&mut self, repo: &Repository) -> Result<()> {
        if self.attributes.is_some() {
            return Ok(());
        }
        let mut attributes = HashMap::default();
        if let Some(unit) = self.unit_ref() {
            let rows = repo.persistor().read(|connection| {
                let mut statement = connection.prepare_cached(statements::UNIT_ATTRIBUTES)?;
                let rows = statement.query_map(params![unit.tenant_id, unit.unit_id], |row| {
                    Ok(VectorRow {
                        attr_id: row.get(0)?,
                        attr_name: row.get(1)?,
                        attr_type: row.get(2)?,
                        forced_scalar: row.get(3)?,
                        value_id: row.get(4)?,
                        index: row.get(5)?,
                        cell: row.get(6)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })?;
            let mut cursor = RowCursor::new(&rows);
            while !cursor.is_exhausted() {
                let attribute = Attribute::inflate(&mut cursor)?;
                attributes.insert(attribute.name().to_lowercase(), attribute);
            }
            debug!(unit = %unit, attributes = attributes.len(), "attributes fetched");
        }
        self.attributes = Some(attributes);
        Ok(())
    }

    fn loaded(&mut self, repo: &Repository) -> Result<&mut HashMap<String, Attribute, OtherHasher>> {
        self.fetch_attributes(repo)?;
        Ok(self.attributes.get_or_insert_with(HashMap::default))
    }

    pub fn attribute_names(&mut self, repo: &Repository) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .loaded(repo)?
            .values()
            .map(|attribute| attribute.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn attributes(&mut self, repo: &Repository) -> Result<Vec<&Attribute>> {
        let mut attributes: Vec<&Attribute> = self.loaded(repo)?.values().collect();
        attributes.sort_by_key(|attribute| attribute.id());
        Ok(attributes)
    }

    pub fn attribute(&mut self, repo: &Repository, name: &str) -> Result<Option<&mut Attribute>> {
        Ok(self.loaded(repo)?.get_mut(&name.to_lowercase()))
    }

    /// The attribute with the given name, attached empty if not present.
    pub fn attribute_or_create(&mut self, repo: &Repository, name: &str) -> Result<&mut Attribute> {
        let key = name.to_lowercase();
        let attributes = self.loaded(repo)?;
        if !attributes.contains_key(&key) {
            let info = repo.attribute_info(name)?.ok_or_else(|| {
                RepoError::InvalidParameter(format!("unknown attribute '{name}'"))
            })?;
            attributes.insert(key.clone(), Attribute::new(&info));
        }
        attributes.get_mut(&key).ok_or_else(|| {
            RepoError::SystemInconsistency(format!("attribute '{name}' vanished"))
        })
    }

    /// Attaches a copy of an attribute, e.g. one taken from another unit.
    pub fn add_attribute(&mut self, repo: &Repository, attribute: &Attribute) -> Result<&mut Attribute> {
        let key = attribute.name().to_lowercase();
        let attributes = self.loaded(repo)?;
        if attributes.contains_key(&key) {
            return Err(RepoError::IllegalRequest(format!(
                "attribute '{}' is already present",
                attribute.name()
            )));
        }
        Ok(attributes.entry(key).or_insert(Attribute::copy_of(attribute)))
    }

    /// Detaches an attribute. The stored value goes at the next store.
    pub fn remove_attribute(&mut self, repo: &Repository, name: &str) -> Result<Option<Attribute>> {
        let removed = self.loaded(repo)?.remove(&name.to_lowercase());
        if let Some(attribute) = &removed {
            if attribute.value_id().is_some() {
                self.detached.push(attribute.id());
            }
        }
        Ok(removed)
    }

    // ----- Persistence -----

    /// Persists a new unit with all its attributes, or the name, detached,
    /// new and modified attributes of a stored one, in a single transaction.
    pub fn store(&mut self, repo: &Repository) -> Result<()> {
        if let Some(unit) = self.unit_ref() {
            if lock::is_locked(repo.persistor(), unit)? {
                return Err(RepoError::IllegalRequest(format!("unit {unit} is locked")));
            }
        }
        let created = self.created.unwrap_or_else(now);
        let (unit_id, written) = repo.persistor().write(|tx| {
            let unit_id = match self.unit_id {
                Some(unit_id) => {
                    if self.renamed {
                        tx.prepare_cached(statements::UNIT_SET_NAME)?
                            .execute(params![self.tenant_id, unit_id, self.name])?;
                    }
                    unit_id
                }
                None => {
                    tx.prepare_cached(statements::UNIT_INSERT)?.execute(params![
                        self.tenant_id,
                        self.corr_id,
                        self.name,
                        self.status.code(),
                        format_time(&created)
                    ])?;
                    let unit_id = tx.last_insert_rowid();
                    if unit_id <= 0 {
                        error!(tenant = self.tenant_id, "no unit id generated");
                        return Err(RepoError::SystemInconsistency(
                            "could not read back generated unit id".into(),
                        ));
                    }
                    unit_id
                }
            };
            for attr_id in &self.detached {
                tx.prepare_cached(statements::ATTRIBUTE_VALUE_DELETE)?
                    .execute(params![self.tenant_id, unit_id, attr_id])?;
            }
            let mut written = Vec::new();
            if let Some(attributes) = &self.attributes {
                for (key, attribute) in attributes {
                    if attribute.is_new() || attribute.is_modified() {
                        written.push((key.clone(), attribute.write(tx, self.tenant_id, unit_id)?));
                    }
                }
            }
            Ok((unit_id, written))
        })?;

        let created_now = self.unit_id.is_none();
        self.unit_id = Some(unit_id);
        self.created = Some(created);
        self.detached.clear();
        self.renamed = false;
        if let Some(attributes) = self.attributes.as_mut() {
            for (key, value_id) in &written {
                if let Some(attribute) = attributes.get_mut(key) {
                    attribute.stored(*value_id);
                }
            }
        }
        if created_now {
            info!(unit = %self.reference(), corr_id = %self.corr_id, action = "create", "unit created");
        } else {
            debug!(unit = %self.reference(), attributes = written.len(), "unit stored");
        }
        repo.cache().store(self);
        Ok(())
    }

    // ----- Lifecycle -----

    /// The status as currently persisted, or the in-memory one for a new unit.
    pub fn current_status(&self, repo: &Repository) -> Result<Status> {
        let Some(unit) = self.unit_ref() else {
            return Ok(self.status);
        };
        let code: Option<i64> = repo.persistor().read(|connection| {
            connection
                .prepare_cached(statements::UNIT_GET_STATUS)?
                .query_row(params![unit.tenant_id, unit.unit_id], |row| row.get(0))
                .optional()
        })?;
        match code {
            Some(code) => Status::of(code),
            None => Err(RepoError::IllegalRequest(format!("unit {unit} no longer exists"))),
        }
    }

    /// Moves the unit to `requested` if the transition table permits it.
    /// Illegal transitions are not errors: the current status is returned.
    pub fn request_status_transition(&mut self, repo: &Repository, requested: Status) -> Result<Status> {
        let current = self.current_status(repo)?;
        self.status = current;
        if !current.permits(requested) {
            warn!(unit = %self.reference(), from = ?current, to = ?requested, "status transition rejected");
            return Ok(current);
        }
        if let Some(unit) = self.unit_ref() {
            repo.persistor().write(|tx| {
                tx.prepare_cached(statements::UNIT_SET_STATUS)?
                    .execute(params![unit.tenant_id, unit.unit_id, requested.code()])?;
                Ok(())
            })?;
        }
        self.status = requested;
        info!(unit = %self.reference(), from = ?current, to = ?requested, action = "status", "status changed");
        if !self.is_new() {
            repo.cache().store(self);
        }
        Ok(requested)
    }

    pub fn activate(&mut self, repo: &Repository) -> Result<Status> {
        self.request_status_transition(repo, Status::Effective)
    }

    /// Refused for a locked unit.
    pub fn inactivate(&mut self, repo: &Repository) -> Result<Status> {
        if self.is_locked(repo)? {
            return Err(RepoError::IllegalRequest(format!(
                "unit {} is locked",
                self.reference()
            )));
        }
        self.request_status_transition(repo, Status::PendingDeletion)
    }

    /// Marks the unit for disposal. The data goes with the next disposal sweep.
    pub fn delete(&mut self, repo: &Repository) -> Result<Status> {
        self.request_status_transition(repo, Status::PendingDisposition)
    }

    // ----- Locks -----

    pub fn lock(&self, repo: &Repository, lock_type: LockType, purpose: &str) -> Result<bool> {
        let unit = self.persisted("lock")?;
        lock::lock(repo.persistor(), unit, lock_type, purpose)
    }

    pub fn unlock(&self, repo: &Repository) -> Result<()> {
        let unit = self.persisted("unlock")?;
        lock::unlock(repo.persistor(), unit)
    }

    pub fn is_locked(&self, repo: &Repository) -> Result<bool> {
        match self.unit_ref() {
            Some(unit) => lock::is_locked(repo.persistor(), unit),
            None => Ok(false),
        }
    }

    pub fn locks(&self, repo: &Repository) -> Result<Vec<Lock>> {
        match self.unit_ref() {
            Some(unit) => lock::locks(repo.persistor(), unit),
            None => Ok(Vec::new()),
        }
    }

    // ----- Associations -----

    pub fn add_relation(&self, repo: &Repository, kind: AssociationType, other: &Unit) -> Result<()> {
        let left = self.persisted("relate")?;
        let right = other.persisted("relate to")?;
        association::add_relation(repo.persistor(), left, kind, right)
    }

    pub fn remove_relation(&self, repo: &Repository, kind: AssociationType, other: &Unit) -> Result<()> {
        let left = self.persisted("unrelate")?;
        let right = other.persisted("unrelate from")?;
        association::remove_relation(repo.persistor(), left, kind, right)
    }

    /// Units this unit points at, resolved through the cache.
    pub fn relations(&self, repo: &Repository, kind: AssociationType) -> Result<Vec<Unit>> {
        let Some(left) = self.unit_ref() else {
            return Ok(Vec::new());
        };
        resolve(repo, association::right_relations(repo.persistor(), left, kind)?)
    }

    /// Units pointing at this unit.
    pub fn related_from(&self, repo: &Repository, kind: AssociationType) -> Result<Vec<Unit>> {
        let Some(right) = self.unit_ref() else {
            return Ok(Vec::new());
        };
        resolve(repo, association::left_relations(repo.persistor(), right, kind)?)
    }

    pub fn add_association(&self, repo: &Repository, kind: AssociationType, reference: &str) -> Result<()> {
        let left = self.persisted("associate")?;
        association::add_association(repo.persistor(), left, kind, reference)
    }

    pub fn remove_association(&self, repo: &Repository, kind: AssociationType, reference: &str) -> Result<()> {
        let left = self.persisted("disassociate")?;
        association::remove_association(repo.persistor(), left, kind, reference)
    }

    pub fn associations(&self, repo: &Repository, kind: AssociationType) -> Result<Vec<String>> {
        match self.unit_ref() {
            Some(left) => association::right_associations(repo.persistor(), left, kind),
            None => Ok(Vec::new()),
        }
    }
}

fn resolve(repo: &Repository, refs: Vec<UnitRef>) -> Result<Vec<Unit>> {
    let mut units = Vec::with_capacity(refs.len());
    for unit in refs {
        if let Some(resolved) = repo.get_unit(unit.tenant_id, unit.unit_id)? {
            units.push(resolved);
        }
    }
    Ok(units)
}

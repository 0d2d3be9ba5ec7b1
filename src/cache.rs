//! In-process cache of resolved units.
//!
//! Entries are keyed "tenant.id" and hold a private copy of the unit, so
//! callers always get clones. Size is bounded by statistics rather than by
//! recency of insertion:
//! * storing a new key into a full cache first drops every entry that was
//!   not looked up since the last sweep, and the new entry is only added if
//!   that made room;
//! * a background sweeper wakes up on a fixed interval and drops entries not
//!   touched since its previous run.
//!
//! Both reset the since-last-sweep counters of the survivors. The sweeper is
//! owned by the cache: it starts with it and stops on [`UnitCache::shutdown`]
//! or drop.
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::OtherHasher;
use crate::config::CacheConfig;
use crate::unit::{Unit, UnitRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessStatistics {
    pub total: u64,
    pub since_last_sweep: u64,
}

#[derive(Debug)]
struct CacheEntry {
    unit: Unit,
    touched: Instant,
    statistics: AccessStatistics,
}

impl CacheEntry {
    fn new(unit: Unit) -> Self {
        Self {
            unit,
            touched: Instant::now(),
            statistics: AccessStatistics {
                total: 0,
                since_last_sweep: 0,
            },
        }
    }
    fn touch(&mut self) {
        self.touched = Instant::now();
        self.statistics.total += 1;
        self.statistics.since_last_sweep += 1;
    }
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, CacheEntry, OtherHasher>,
    last_sweep: Instant,
    shutdown: bool,
}

impl State {
    /// Drops entries not touched since the previous sweep.
    fn sweep_stale(&mut self) -> usize {
        let before = self.entries.len();
        let last_sweep = self.last_sweep;
        self.entries.retain(|_, entry| entry.touched >= last_sweep);
        for entry in self.entries.values_mut() {
            entry.statistics.since_last_sweep = 0;
        }
        self.last_sweep = Instant::now();
        before - self.entries.len()
    }

    /// Drops entries not looked up since the counters were last reset.
    fn sweep_untouched(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.statistics.since_last_sweep > 0);
        for entry in self.entries.values_mut() {
            entry.statistics.since_last_sweep = 0;
        }
        before - self.entries.len()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    // a panic while holding the lock cannot leave an entry half-written
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ------------- Cache -------------
#[derive(Debug)]
pub struct UnitCache {
    shared: Arc<Shared>,
    max_size: usize,
    idle_interval: Option<Duration>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl UnitCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: HashMap::default(),
                    last_sweep: Instant::now(),
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
            }),
            max_size: config.max_size,
            idle_interval: config.idle_interval(),
            sweeper: Mutex::new(None),
        };
        cache.ensure_sweeper();
        cache
    }

    pub fn key(unit: UnitRef) -> String {
        unit.to_string()
    }

    /// A copy of the cached unit. Counts as an access.
    pub fn lookup(&self, key: &str) -> Option<Unit> {
        let mut state = self.shared.lock();
        let entry = state.entries.get_mut(key)?;
        entry.touch();
        trace!(key, total = entry.statistics.total, "cache hit");
        Some(entry.unit.clone())
    }

    pub fn get(&self, unit: UnitRef) -> Option<Unit> {
        self.lookup(&Self::key(unit))
    }

    /// Caches a copy of a stored unit. A unit that was never stored has no
    /// key and is ignored.
    pub fn store(&self, unit: &Unit) {
        let Some(reference) = unit.unit_ref() else {
            return;
        };
        let key = Self::key(reference);
        {
            let mut state = self.shared.lock();
            if let Some(entry) = state.entries.get_mut(&key) {
                // replaced and freshly dated, statistics carried over
                entry.unit = unit.clone();
                entry.touched = Instant::now();
            } else {
                if state.entries.len() >= self.max_size {
                    let evicted = state.sweep_untouched();
                    debug!(evicted, remaining = state.entries.len(), "cache full, evicted untouched entries");
                }
                if state.entries.len() < self.max_size {
                    state.entries.insert(key, CacheEntry::new(unit.clone()));
                } else {
                    trace!(key = %key, "cache full, entry not cached");
                }
            }
        }
        self.ensure_sweeper();
    }

    pub fn remove(&self, unit: UnitRef) {
        self.shared.lock().entries.remove(&Self::key(unit));
    }

    pub fn clear(&self) {
        self.shared.lock().entries.clear();
    }

    /// Runs the background sweep right away. Returns the number of
    /// entries dropped.
    pub fn sweep(&self) -> usize {
        self.shared.lock().sweep_stale()
    }

    pub fn statistics(&self, unit: UnitRef) -> Option<AccessStatistics> {
        self.shared
            .lock()
            .entries
            .get(&Self::key(unit))
            .map(|entry| entry.statistics)
    }

    pub fn contains(&self, unit: UnitRef) -> bool {
        self.shared.lock().entries.contains_key(&Self::key(unit))
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Stops the sweeper and waits for it to finish.
    pub fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("cache sweeper ended with a panic");
            }
        }
    }

    /// Starts the sweeper, or restarts it if it died.
    fn ensure_sweeper(&self) {
        let Some(interval) = self.idle_interval else {
            return;
        };
        if self.shared.lock().shutdown {
            return;
        }
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("unit-cache-sweeper".into())
            .spawn(move || sweep_periodically(shared, interval))
        {
            Ok(handle) => {
                debug!(interval_secs = interval.as_secs(), "cache sweeper started");
                *sweeper = Some(handle);
            }
            Err(e) => warn!(error = %e, "could not start cache sweeper"),
        }
    }
}

impl Drop for UnitCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_periodically(shared: Arc<Shared>, interval: Duration) {
    let mut state = shared.lock();
    while !state.shutdown {
        let (guard, _) = shared
            .wakeup
            .wait_timeout(state, interval)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
        if state.shutdown {
            break;
        }
        // wakeups may come early
        if state.last_sweep.elapsed() >= interval {
            let evicted = state.sweep_stale();
            trace!(evicted, remaining = state.entries.len(), "cache swept");
        }
    }
    debug!("cache sweeper stopped");
}

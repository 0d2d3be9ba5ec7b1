use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use metarepo::config::Configuration;
use metarepo::datatype::Type;
use metarepo::repository::Repository;
use metarepo::search::{Operator, SearchData, SearchItem};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("metarepo-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

#[test]
fn defaults_without_a_file() {
    let configuration = Configuration::load(None::<&str>).expect("load");
    assert_eq!(configuration.database.path, None);
    assert_eq!(configuration.database.deadlock_max_retries, 100);
    assert_eq!(configuration.database.backoff().as_millis(), 200);
    assert_eq!(configuration.database.busy_timeout(), Duration::ZERO);
    assert_eq!(configuration.cache.max_size, 1000);
    assert_eq!(configuration.cache.idle_check_interval, 60);
    assert_eq!(configuration.repository.dispose_batch_size, 1000);

    let in_memory = Configuration::in_memory();
    assert_eq!(in_memory.cache.idle_interval(), None);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = scratch_dir("missing");
    let configuration = Configuration::load(Some(dir.join("absent.toml"))).expect("load");
    assert_eq!(configuration.cache.max_size, 1000);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_settings_override_defaults() {
    let dir = scratch_dir("settings");
    let file = dir.join("metarepo.toml");
    fs::write(
        &file,
        "[database]\ndeadlock_max_retries = 3\n\n[cache]\nmax_size = 5\nidle_check_interval = 0\n",
    )
    .expect("write config");
    let configuration = Configuration::load(Some(&file)).expect("load");
    assert_eq!(configuration.database.deadlock_max_retries, 3);
    assert_eq!(configuration.database.deadlock_backoff_ms, 200);
    assert_eq!(configuration.cache.max_size, 5);
    assert_eq!(configuration.cache.idle_interval(), None);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_database_survives_reopening() {
    let dir = scratch_dir("reopen");
    let mut configuration = Configuration::in_memory();
    configuration.database.path = Some(dir.join("repo.db").to_string_lossy().into_owned());

    let unit_id = {
        let repo = Repository::new(configuration.clone()).expect("repository");
        repo.define_attribute("dc:title", Type::String, false).expect("define");
        let mut unit = repo.create_unit(7, Some("kept"));
        unit.attribute_or_create(&repo, "dc:title").expect("attr")
            .vector_mut::<String>().expect("strings").push("Persisted".into());
        unit.store(&repo).expect("store");
        repo.shutdown();
        unit.unit_id().expect("id")
    };

    let repo = Repository::new(configuration).expect("reopen");
    let title = repo.attribute_info("DC:TITLE").expect("lookup").expect("catalog kept");
    let mut unit = repo.get_unit(7, unit_id).expect("get").expect("unit kept");
    assert_eq!(unit.name(), Some("kept"));
    let attribute = unit.attribute(&repo, "dc:title").expect("fetch").expect("present");
    assert_eq!(
        attribute.vector::<String>().expect("strings").get().to_vec(),
        vec!["Persisted".to_string()]
    );

    let item = SearchItem::attribute_from_str(&title, Operator::Eq, "persisted").expect("item");
    assert_eq!(repo.search(&SearchData::new(item)).expect("search").total_hits, 1);
    repo.shutdown();
    drop(repo);
    let _ = fs::remove_dir_all(&dir);
}

fn file_configuration(path: &Path, retries: u32, backoff_ms: u64) -> Configuration {
    let mut configuration = Configuration::in_memory();
    configuration.database.path = Some(path.to_string_lossy().into_owned());
    configuration.database.deadlock_max_retries = retries;
    configuration.database.deadlock_backoff_ms = backoff_ms;
    configuration
}

/// Takes the write lock on the database from a separate connection.
fn hold_write_lock(path: &Path) -> Connection {
    let holder = Connection::open(path).expect("open holder");
    holder.execute_batch("BEGIN IMMEDIATE").expect("take write lock");
    holder
}

#[test]
fn busy_database_is_retried_until_released() {
    let dir = scratch_dir("busy-retry");
    let path = dir.join("repo.db");
    let repo = Repository::new(file_configuration(&path, 100, 20)).expect("repository");

    let holder = hold_write_lock(&path);
    let started = Instant::now();
    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        holder.execute_batch("COMMIT").expect("release write lock");
    });

    let mut unit = repo.create_unit(1, Some("patient"));
    unit.store(&repo).expect("store succeeds once the lock is gone");
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!unit.is_new());
    release.join().expect("holder thread");

    repo.shutdown();
    drop(repo);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn busy_database_fails_after_the_last_retry() {
    let dir = scratch_dir("busy-give-up");
    let path = dir.join("repo.db");
    let repo = Repository::new(file_configuration(&path, 2, 10)).expect("repository");

    let holder = hold_write_lock(&path);
    let mut unit = repo.create_unit(1, Some("impatient"));
    let err = unit.store(&repo).unwrap_err();
    assert!(err.is_transient(), "got {err}");
    assert!(unit.is_new(), "nothing was written");
    holder.execute_batch("COMMIT").expect("release write lock");

    unit.store(&repo).expect("store once released");
    assert!(!unit.is_new());
    repo.shutdown();
    drop(repo);
    let _ = fs::remove_dir_all(&dir);
}

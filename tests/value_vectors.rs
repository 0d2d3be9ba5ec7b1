use chrono::{NaiveDate, NaiveDateTime};
use metarepo::RepoError;
use metarepo::attribute::Attribute;
use metarepo::datatype::{Datum, Element, Type, Value};
use metarepo::repository::Repository;

fn time(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32, ms: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .expect("date")
        .and_hms_milli_opt(hh, mm, ss, ms)
        .expect("time")
}

/// Stores `values` on a fresh unit and reads them back from the database.
fn round_trip<T: Element>(kind: Type, values: Vec<T>) -> (Vec<T>, Option<i64>) {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("test:values", kind, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    unit.attribute_or_create(&repo, "test:values")
        .expect("attribute")
        .vector_mut::<T>()
        .expect("typed vector")
        .set(values);
    unit.store(&repo).expect("store");
    let unit_id = unit.unit_id().expect("unit id after store");

    // bypass the cache so that values come from the database
    repo.cache().clear();
    let mut loaded = repo.get_unit(1, unit_id).expect("get").expect("unit exists");
    let attribute = loaded
        .attribute(&repo, "test:values")
        .expect("fetch")
        .expect("attribute present");
    assert!(!attribute.is_new());
    assert!(!attribute.is_modified());
    (
        attribute.vector::<T>().expect("typed vector").get().to_vec(),
        attribute.value_id(),
    )
}

#[test]
fn strings_round_trip_in_order() {
    let values = vec!["beta".to_string(), "alpha".to_string(), "gamma".to_string()];
    let (loaded, _) = round_trip(Type::String, values.clone());
    assert_eq!(loaded, values);
}

#[test]
fn times_round_trip_to_the_millisecond() {
    let values = vec![time(2024, 1, 23, 10, 11, 12, 345), time(1999, 12, 31, 0, 0, 0, 0)];
    let (loaded, _) = round_trip(Type::Time, values.clone());
    assert_eq!(loaded, values);
}

#[test]
fn sub_millisecond_times_read_back_as_held() {
    let precise = NaiveDate::from_ymd_opt(2024, 1, 23)
        .expect("date")
        .and_hms_micro_opt(10, 11, 12, 345_678)
        .expect("time");
    let (loaded, _) = round_trip(Type::Time, vec![precise]);
    assert_eq!(loaded, vec![time(2024, 1, 23, 10, 11, 12, 345)]);

    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("test:times", Type::Time, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    {
        let vector = unit
            .attribute_or_create(&repo, "test:times")
            .expect("attribute")
            .vector_mut::<NaiveDateTime>()
            .expect("times");
        vector.push(precise);
        assert_eq!(vector.get(), &[time(2024, 1, 23, 10, 11, 12, 345)]);
        // written around the normalizing setters
        vector.values_mut().push(precise);
    }
    unit.store(&repo).expect("store");
    let unit_id = unit.unit_id().expect("unit id");
    let held = unit
        .attribute(&repo, "test:times")
        .expect("fetch")
        .expect("present")
        .vector::<NaiveDateTime>()
        .expect("times")
        .get()
        .to_vec();
    assert_eq!(held, vec![time(2024, 1, 23, 10, 11, 12, 345); 2]);

    let mut cached = repo.get_unit(1, unit_id).expect("get").expect("cached");
    let cached_times = cached
        .attribute(&repo, "test:times")
        .expect("fetch")
        .expect("present")
        .vector::<NaiveDateTime>()
        .expect("times")
        .get()
        .to_vec();
    repo.cache().clear();
    let mut stored = repo.get_unit(1, unit_id).expect("get").expect("stored");
    let stored_attribute = stored.attribute(&repo, "test:times").expect("fetch").expect("present");
    assert!(!stored_attribute.is_modified());
    let stored_times = stored_attribute.vector::<NaiveDateTime>().expect("times").get().to_vec();
    assert_eq!(cached_times, held);
    assert_eq!(stored_times, held);
}

#[test]
fn numbers_round_trip() {
    let (integers, _) = round_trip(Type::Integer, vec![3, -7, i32::MAX]);
    assert_eq!(integers, vec![3, -7, i32::MAX]);
    let (longs, _) = round_trip(Type::Long, vec![i64::MIN, 0, 42]);
    assert_eq!(longs, vec![i64::MIN, 0, 42]);
    let (doubles, _) = round_trip(Type::Double, vec![3.25, -1.5, 0.0]);
    assert_eq!(doubles, vec![3.25, -1.5, 0.0]);
}

#[test]
fn booleans_and_data_round_trip() {
    let (booleans, _) = round_trip(Type::Boolean, vec![true, false, true]);
    assert_eq!(booleans, vec![true, false, true]);
    let blobs = vec![vec![0u8, 1, 2, 255], vec![], vec![42]];
    let (loaded, _) = round_trip(Type::Data, blobs.clone());
    assert_eq!(loaded, blobs);
}

#[test]
fn empty_vector_still_gets_a_value_vector_id() {
    let (loaded, value_id) = round_trip::<String>(Type::String, Vec::new());
    assert!(loaded.is_empty());
    assert!(value_id.is_some(), "declared but empty attribute keeps its id");
}

#[test]
fn neighbouring_vectors_do_not_bleed_into_each_other() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("a:first", Type::Integer, false).expect("define");
    repo.define_attribute("a:empty", Type::String, false).expect("define");
    repo.define_attribute("a:last", Type::Integer, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    unit.attribute_or_create(&repo, "a:first").expect("attr")
        .vector_mut::<i32>().expect("ints").set(vec![1, 2, 3]);
    unit.attribute_or_create(&repo, "a:empty").expect("attr");
    unit.attribute_or_create(&repo, "a:last").expect("attr")
        .vector_mut::<i32>().expect("ints").set(vec![9]);
    unit.store(&repo).expect("store");

    repo.cache().clear();
    let mut loaded = repo
        .get_unit(1, unit.unit_id().expect("id"))
        .expect("get")
        .expect("exists");
    assert_eq!(
        loaded.attribute_names(&repo).expect("names"),
        vec!["a:empty", "a:first", "a:last"]
    );
    let first = loaded.attribute(&repo, "a:first").expect("fetch").expect("present");
    assert_eq!(first.vector::<i32>().expect("ints").get().to_vec(), vec![1, 2, 3]);
    let empty = loaded.attribute(&repo, "A:EMPTY").expect("fetch").expect("present");
    assert!(empty.value().is_empty());
    let last = loaded.attribute(&repo, "a:last").expect("fetch").expect("present");
    assert_eq!(last.vector::<i32>().expect("ints").get().to_vec(), vec![9]);
}

#[test]
fn modification_tracking_follows_the_elements() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:subject", Type::String, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    {
        let attribute = unit.attribute_or_create(&repo, "dc:subject").expect("attribute");
        assert!(attribute.is_new());
        attribute.vector_mut::<String>().expect("strings").push("one".into());
    }
    unit.store(&repo).expect("store");

    let attribute = unit.attribute(&repo, "dc:subject").expect("fetch").expect("present");
    assert!(!attribute.is_new());
    assert!(!attribute.is_modified());
    let first_id = attribute.value_id().expect("value id");

    let strings = attribute.vector_mut::<String>().expect("strings");
    strings.push("two".into());
    assert!(attribute.is_modified());
    attribute.vector_mut::<String>().expect("strings").values_mut().pop();
    assert!(!attribute.is_modified(), "back to the stored elements");
    attribute.vector_mut::<String>().expect("strings").values_mut()[0] = "uno".into();
    assert!(attribute.is_modified());

    unit.store(&repo).expect("store again");
    let attribute = unit.attribute(&repo, "dc:subject").expect("fetch").expect("present");
    assert!(!attribute.is_modified());
    let second_id = attribute.value_id().expect("value id");
    assert_ne!(first_id, second_id, "every store writes a fresh value vector");
}

#[test]
fn wrong_element_type_is_refused_immediately() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:title", Type::String, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    let attribute = unit.attribute_or_create(&repo, "dc:title").expect("attribute");
    let err = attribute.vector_mut::<i64>().unwrap_err();
    assert!(matches!(err, RepoError::AttributeType(_)), "got {err}");
    let err = attribute.value_mut().push(Datum::Long(1)).unwrap_err();
    assert!(matches!(err, RepoError::AttributeType(_)), "got {err}");
    assert!(attribute.value().verify(&Datum::String("ok".into())));
    attribute.value_mut().push(Datum::String("ok".into())).expect("same type");
    assert_eq!(attribute.value().data(), vec![Datum::String("ok".into())]);
}

#[test]
fn oversized_text_rolls_back_the_whole_store() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:title", Type::String, false).expect("define");
    repo.define_attribute("dc:pages", Type::Integer, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    unit.attribute_or_create(&repo, "dc:pages").expect("attr")
        .vector_mut::<i32>().expect("ints").push(12);
    unit.attribute_or_create(&repo, "dc:title").expect("attr")
        .vector_mut::<String>().expect("strings").push("x".repeat(256));
    let err = unit.store(&repo).unwrap_err();
    assert!(matches!(err, RepoError::AttributeValue(_)), "got {err}");
    assert!(unit.is_new(), "nothing committed");
    let all = repo
        .search(&metarepo::search::SearchData::unconstrained())
        .expect("search");
    assert_eq!(all.total_hits, 0);

    // fixing the value makes the same unit storable
    unit.attribute(&repo, "dc:title").expect("fetch").expect("present")
        .vector_mut::<String>().expect("strings").set(vec!["x".repeat(255)]);
    unit.store(&repo).expect("store after fix");
    let pages = unit.attribute(&repo, "dc:pages").expect("fetch").expect("present");
    assert!(!pages.is_new());
}

#[test]
fn forced_scalar_refuses_more_than_one_element() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:identifier", Type::Long, true).expect("define");
    let mut unit = repo.create_unit(1, None);
    unit.attribute_or_create(&repo, "dc:identifier").expect("attr")
        .vector_mut::<i64>().expect("longs").set(vec![1, 2]);
    let err = unit.store(&repo).unwrap_err();
    assert!(matches!(err, RepoError::AttributeValue(_)), "got {err}");
}

#[test]
fn copied_attribute_is_new_with_its_own_value_vector() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:creator", Type::String, false).expect("define");
    let mut original = repo.create_unit(1, None);
    original.attribute_or_create(&repo, "dc:creator").expect("attr")
        .vector_mut::<String>().expect("strings").push("Ada".into());
    original.store(&repo).expect("store");
    let source = original
        .attribute(&repo, "dc:creator")
        .expect("fetch")
        .expect("present")
        .clone();

    let copy = Attribute::copy_of(&source);
    assert!(copy.is_new());
    assert_eq!(copy.value_id(), None);
    assert_eq!(copy.value().data(), source.value().data());

    let mut other = repo.create_unit(1, None);
    other.add_attribute(&repo, &source).expect("add copy");
    let err = other.add_attribute(&repo, &source).unwrap_err();
    assert!(matches!(err, RepoError::IllegalRequest(_)), "got {err}");
    other.store(&repo).expect("store copy");
    let stored_copy = other.attribute(&repo, "dc:creator").expect("fetch").expect("present");
    assert_ne!(stored_copy.value_id(), source.value_id());
}

#[test]
fn removed_attribute_is_gone_after_store() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("dc:format", Type::String, false).expect("define");
    let mut unit = repo.create_unit(1, None);
    unit.attribute_or_create(&repo, "dc:format").expect("attr")
        .vector_mut::<String>().expect("strings").push("pdf".into());
    unit.store(&repo).expect("store");
    assert!(unit.remove_attribute(&repo, "DC:Format").expect("remove").is_some());
    unit.store(&repo).expect("store");

    repo.cache().clear();
    let mut loaded = repo
        .get_unit(1, unit.unit_id().expect("id"))
        .expect("get")
        .expect("exists");
    assert!(loaded.attribute(&repo, "dc:format").expect("fetch").is_none());
}

#[test]
fn unknown_attribute_and_type_codes() {
    let repo = Repository::in_memory().expect("repository");
    let mut unit = repo.create_unit(1, None);
    let err = unit.attribute_or_create(&repo, "no:such").unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");

    for kind in Type::ALL {
        assert_eq!(Type::of(i64::from(kind.code())).expect("known"), kind);
        assert_eq!(Value::create(kind).kind(), kind);
    }
    assert!(matches!(
        Type::of(99),
        Err(RepoError::UnknownEnumeration { code: 99, .. })
    ));
    assert_eq!(Type::Data.code(), 7);
    assert!(!Type::Data.is_searchable());
}

#[test]
fn catalog_is_case_insensitive_and_refuses_type_changes() {
    let repo = Repository::in_memory().expect("repository");
    let defined = repo.define_attribute("dc:Title", Type::String, false).expect("define");
    let again = repo.define_attribute("DC:TITLE", Type::String, false).expect("redefine");
    assert_eq!(defined, again);
    let err = repo.define_attribute("dc:title", Type::Integer, false).unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");
    let info = repo.attribute_info("dc:title").expect("lookup").expect("known");
    assert_eq!(info.id, defined.id);
    let by_id = repo.attribute_info_by_id(defined.id).expect("lookup").expect("known");
    assert_eq!(by_id.name, "dc:Title");
    assert_eq!(repo.attributes().expect("all").len(), 1);
}

use metarepo::datatype::Type;
use metarepo::repository::Repository;
use metarepo::search::{
    Operator, SearchData, SearchExpression, SearchItem, SearchOrder, UnitColumn,
};
use metarepo::unit::Unit;

fn titled(repo: &Repository, tenant: i32, name: &str, titles: &[&str]) -> Unit {
    let mut unit = repo.create_unit(tenant, Some(name));
    unit.attribute_or_create(repo, "title").expect("attr")
        .vector_mut::<String>().expect("strings")
        .set(titles.iter().map(|t| t.to_string()).collect());
    unit.store(repo).expect("store");
    unit
}

#[test]
fn stored_title_is_found_case_insensitively_and_by_prefix() {
    let repo = Repository::in_memory().expect("repository");
    let title = repo.define_attribute("title", Type::String, false).expect("define");
    let unit = titled(&repo, 1, "greeting", &["Hello"]);
    let _other = titled(&repo, 1, "farewell", &["Goodbye"]);

    for operand in ["hello", "HELLO", "hel*", "h%o", "h_llo"] {
        let item = SearchItem::attribute_from_str(&title, Operator::Eq, operand).expect("item");
        let found = repo
            .search(&SearchData::new(SearchExpression::from(SearchItem::tenant(1)).and(item)))
            .expect("search");
        assert_eq!(found.units.len(), 1, "{operand}");
        assert_eq!(found.units[0].unit_id(), unit.unit_id(), "{operand}");
    }

    let miss = SearchItem::attribute_from_str(&title, Operator::Eq, "hello world").expect("item");
    assert_eq!(repo.search(&SearchData::new(miss)).expect("search").total_hits, 0);
}

#[test]
fn any_element_of_a_vector_matches() {
    let repo = Repository::in_memory().expect("repository");
    let title = repo.define_attribute("title", Type::String, false).expect("define");
    titled(&repo, 1, "multi", &["Alpha", "Beta", "Gamma"]);

    let beta = SearchItem::attribute_from_str(&title, Operator::Eq, "beta").expect("item");
    let found = repo.search(&SearchData::new(beta)).expect("search");
    assert_eq!(found.total_hits, 1, "one unit, not one row per element");
}

#[test]
fn conjunction_of_attributes_intersects_units() {
    let repo = Repository::in_memory().expect("repository");
    let title = repo.define_attribute("title", Type::String, false).expect("define");
    let pages = repo.define_attribute("pages", Type::Integer, true).expect("define");
    let draft = repo.define_attribute("draft", Type::Boolean, true).expect("define");

    for (name, page_count, is_draft) in [("short", 10, false), ("long", 400, false), ("wip", 400, true)] {
        let mut unit = titled(&repo, 1, name, &["Report"]);
        unit.attribute_or_create(&repo, "pages").expect("attr")
            .vector_mut::<i32>().expect("ints").push(page_count);
        unit.attribute_or_create(&repo, "draft").expect("attr")
            .vector_mut::<bool>().expect("bools").push(is_draft);
        unit.store(&repo).expect("store");
    }

    let expression = SearchExpression::all([
        SearchItem::attribute_from_str(&title, Operator::Eq, "report").expect("item"),
        SearchItem::attribute_from_str(&pages, Operator::Gt, "100").expect("item"),
        SearchItem::attribute_from_str(&draft, Operator::Eq, "false").expect("item"),
    ])
    .expect("items");
    let found = repo.search(&SearchData::new(expression)).expect("search");
    assert_eq!(found.units.len(), 1);
    assert_eq!(found.units[0].name(), Some("long"));

    let not_draft = SearchExpression::from(
        SearchItem::attribute_from_str(&draft, Operator::Eq, "true").expect("item"),
    )
    .negate();
    let found = repo.search(&SearchData::new(not_draft)).expect("search");
    assert_eq!(found.total_hits, 2);
}

#[test]
fn tenants_are_kept_apart() {
    let repo = Repository::in_memory().expect("repository");
    let title = repo.define_attribute("title", Type::String, false).expect("define");
    titled(&repo, 1, "mine", &["Shared"]);
    titled(&repo, 2, "theirs", &["Shared"]);

    let item = SearchItem::attribute_from_str(&title, Operator::Eq, "shared").expect("item");
    let everywhere = repo.search(&SearchData::new(item.clone())).expect("search");
    assert_eq!(everywhere.total_hits, 2);
    let second = repo
        .search(&SearchData::new(SearchExpression::from(SearchItem::tenant(2)).and(item)))
        .expect("search");
    assert_eq!(second.units.len(), 1);
    assert_eq!(second.units[0].tenant_id(), 2);
}

#[test]
fn ordering_and_paging_walk_the_result() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("title", Type::String, false).expect("define");
    for name in ["delta", "alpha", "echo", "charlie", "bravo"] {
        titled(&repo, 1, name, &["Paged"]);
    }
    let by_name = || {
        SearchData::new(SearchItem::tenant(1)).order(SearchOrder::by(UnitColumn::Name, true))
    };
    let page = |offset, size| -> Vec<String> {
        repo.search(&by_name().page(offset, size))
            .expect("search")
            .units
            .iter()
            .filter_map(|unit| unit.name().map(str::to_string))
            .collect()
    };
    assert_eq!(page(0, 2), vec!["alpha", "bravo"]);
    assert_eq!(page(2, 2), vec!["charlie", "delta"]);
    assert_eq!(page(4, 2), vec!["echo"]);

    let first = repo.search(&by_name().first(3)).expect("search");
    assert_eq!(first.total_hits, 3);

    let descending = repo
        .search(&SearchData::new(SearchItem::tenant(1)).order(SearchOrder::by(UnitColumn::Name, false)).first(1))
        .expect("search");
    assert_eq!(descending.units[0].name(), Some("echo"));
}

#[test]
fn unit_name_wildcards() {
    let repo = Repository::in_memory().expect("repository");
    repo.define_attribute("title", Type::String, false).expect("define");
    titled(&repo, 1, "Invoice 2024-001", &[]);
    titled(&repo, 1, "Invoice 2024-002", &[]);
    titled(&repo, 1, "Receipt", &[]);

    let invoices = repo
        .search(&SearchData::new(SearchItem::name(Operator::Eq, "invoice*")))
        .expect("search");
    assert_eq!(invoices.total_hits, 2);
    let others = repo
        .search(&SearchData::new(SearchItem::name(Operator::Neq, "receipt")))
        .expect("search");
    assert_eq!(others.total_hits, 2);
}

use metarepo::RepoError;
use metarepo::association::AssociationType;
use metarepo::repository::Repository;
use metarepo::unit::Unit;

fn stored(repo: &Repository, name: &str) -> Unit {
    let mut unit = repo.create_unit(1, Some(name));
    unit.store(repo).expect("store");
    unit
}

fn names(units: &[Unit]) -> Vec<String> {
    let mut names: Vec<String> = units
        .iter()
        .filter_map(|unit| unit.name().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[test]
fn parent_may_hold_many_children() {
    let repo = Repository::in_memory().expect("repository");
    let parent = stored(&repo, "parent");
    let first = stored(&repo, "first");
    let second = stored(&repo, "second");
    parent.add_relation(&repo, AssociationType::ParentChildRelation, &first).expect("relate");
    parent.add_relation(&repo, AssociationType::ParentChildRelation, &second).expect("relate");
    // the same link twice is one link
    parent.add_relation(&repo, AssociationType::ParentChildRelation, &second).expect("relate");

    let children = parent.relations(&repo, AssociationType::ParentChildRelation).expect("relations");
    assert_eq!(names(&children), vec!["first", "second"]);
    let parents = first.related_from(&repo, AssociationType::ParentChildRelation).expect("related");
    assert_eq!(names(&parents), vec!["parent"]);

    parent.remove_relation(&repo, AssociationType::ParentChildRelation, &first).expect("unrelate");
    let children = parent.relations(&repo, AssociationType::ParentChildRelation).expect("relations");
    assert_eq!(names(&children), vec!["second"]);
}

#[test]
fn replacement_keeps_only_the_latest() {
    let repo = Repository::in_memory().expect("repository");
    let old = stored(&repo, "old");
    let newer = stored(&repo, "newer");
    let newest = stored(&repo, "newest");
    old.add_relation(&repo, AssociationType::ReplacementRelation, &newer).expect("relate");
    old.add_relation(&repo, AssociationType::ReplacementRelation, &newest).expect("relate");

    let replaced_by = old.relations(&repo, AssociationType::ReplacementRelation).expect("relations");
    assert_eq!(names(&replaced_by), vec!["newest"]);
    assert!(newer.related_from(&repo, AssociationType::ReplacementRelation).expect("related").is_empty());
    assert!(old.relations(&repo, AssociationType::ParentChildRelation).expect("relations").is_empty());
}

#[test]
fn case_association_holds_one_reference() {
    let repo = Repository::in_memory().expect("repository");
    let unit = stored(&repo, "doc");
    let other = stored(&repo, "other doc");
    unit.add_association(&repo, AssociationType::CaseAssociation, "case-1").expect("associate");
    unit.add_association(&repo, AssociationType::CaseAssociation, " case-2 ").expect("associate");
    other.add_association(&repo, AssociationType::CaseAssociation, "case-2").expect("associate");

    assert_eq!(
        unit.associations(&repo, AssociationType::CaseAssociation).expect("associations"),
        vec!["case-2"]
    );
    let holders = repo
        .associated_units(AssociationType::CaseAssociation, "case-2")
        .expect("holders");
    assert_eq!(names(&holders), vec!["doc", "other doc"]);
    assert!(repo
        .associated_units(AssociationType::CaseAssociation, "case-1")
        .expect("holders")
        .is_empty());

    unit.remove_association(&repo, AssociationType::CaseAssociation, "case-2").expect("remove");
    assert!(unit.associations(&repo, AssociationType::CaseAssociation).expect("associations").is_empty());
}

#[test]
fn association_types_are_checked() {
    let repo = Repository::in_memory().expect("repository");
    let unit = stored(&repo, "a");
    let other = stored(&repo, "b");

    let err = unit.add_relation(&repo, AssociationType::CaseAssociation, &other).unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");
    let err = unit.add_relation(&repo, AssociationType::Invalid, &other).unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");
    let err = unit
        .add_association(&repo, AssociationType::ParentChildRelation, "x")
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");
    let err = unit.add_association(&repo, AssociationType::CaseAssociation, "  ").unwrap_err();
    assert!(matches!(err, RepoError::InvalidParameter(_)), "got {err}");

    assert_eq!(AssociationType::of(3).expect("known"), AssociationType::ReplacementRelation);
    assert!(matches!(
        AssociationType::of(9),
        Err(RepoError::UnknownEnumeration { code: 9, .. })
    ));
}

#[test]
fn relating_requires_stored_units() {
    let repo = Repository::in_memory().expect("repository");
    let stored_unit = stored(&repo, "stored");
    let fresh = repo.create_unit(1, None);
    let err = stored_unit
        .add_relation(&repo, AssociationType::ParentChildRelation, &fresh)
        .unwrap_err();
    assert!(matches!(err, RepoError::IllegalRequest(_)), "got {err}");
    let err = fresh
        .add_association(&repo, AssociationType::CaseAssociation, "case")
        .unwrap_err();
    assert!(matches!(err, RepoError::IllegalRequest(_)), "got {err}");
    assert!(fresh.relations(&repo, AssociationType::ParentChildRelation).expect("relations").is_empty());
}

#[test]
fn disposing_a_unit_drops_its_links() {
    let repo = Repository::in_memory().expect("repository");
    let parent = stored(&repo, "parent");
    let mut child = stored(&repo, "child");
    parent.add_relation(&repo, AssociationType::ParentChildRelation, &child).expect("relate");
    child.add_association(&repo, AssociationType::CaseAssociation, "case-9").expect("associate");

    child.delete(&repo).expect("delete");
    assert_eq!(repo.dispose(1).expect("dispose"), 1);
    assert!(parent.relations(&repo, AssociationType::ParentChildRelation).expect("relations").is_empty());
    assert!(repo
        .associated_units(AssociationType::CaseAssociation, "case-9")
        .expect("holders")
        .is_empty());
}

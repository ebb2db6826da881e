use crate::engine::errors::CatalogError;
use crate::engine::query::query_id::QueryId;
use crate::engine::storage::catalog::SystemCatalog;
use crate::engine::storage::lock::{InstanceRole, LockDesc, LockMode};
use crate::test_helpers::factories::ArrayDescFactory;

fn catalog_with_array(name: &str) -> SystemCatalog {
    let catalog = SystemCatalog::new();
    let desc = ArrayDescFactory::new().create();
    catalog.create_array(name, &desc).unwrap();
    catalog
}

#[test]
fn test_create_and_duplicate() {
    let catalog = catalog_with_array("A");
    let desc = ArrayDescFactory::new().create();
    let err = catalog.create_array("A", &desc).unwrap_err();
    assert!(matches!(err, CatalogError::ArrayAlreadyExists(_)));
    assert!(catalog.contains_array("A"));
    assert!(catalog.array_descriptor("A").unwrap().id() > 0);
}

#[test]
fn test_version_lifecycle() {
    let catalog = catalog_with_array("A");
    let (base, v1, vid1) = catalog.prepare_new_version("A").unwrap();
    assert_eq!(v1, 1);
    // uncommitted versions stay invisible
    assert_eq!(catalog.last_version(base), 0);
    assert!(catalog.latest_version_array_id("A").unwrap().is_none());

    catalog.commit_version("A", v1, vid1).unwrap();
    assert_eq!(catalog.last_version(base), 1);
    assert_eq!(catalog.latest_version_array_id("A").unwrap(), Some(vid1));

    // committing again (another instance) is a no-op
    catalog.commit_version("A", v1, vid1).unwrap();
    assert_eq!(catalog.last_version(base), 1);

    let (_, v2, _) = catalog.prepare_new_version("A").unwrap();
    assert_eq!(v2, 2);
}

#[test]
fn test_read_locks_coexist_write_locks_conflict() {
    let catalog = catalog_with_array("A");
    let q1 = QueryId::generate(0);
    let q2 = QueryId::generate(0);

    let rd1 = LockDesc::new("A", q1, 0, InstanceRole::Coordinator, LockMode::Rd);
    let rd2 = LockDesc::new("A", q2, 1, InstanceRole::Worker, LockMode::Rd);
    assert!(catalog.lock_array(&rd1).unwrap());
    assert!(catalog.lock_array(&rd2).unwrap());

    let wr = LockDesc::new("A", QueryId::generate(0), 0, InstanceRole::Coordinator, LockMode::Wr);
    let err = catalog.lock_array(&wr).unwrap_err();
    assert!(matches!(err, CatalogError::LockBusy(_)));
}

#[test]
fn test_same_query_promotes_mode() {
    let catalog = catalog_with_array("A");
    let q = QueryId::generate(0);
    let rd = LockDesc::new("A", q, 0, InstanceRole::Coordinator, LockMode::Rd);
    assert!(catalog.lock_array(&rd).unwrap());
    let wr = LockDesc::new("A", q, 0, InstanceRole::Coordinator, LockMode::Wr);
    assert!(catalog.lock_array(&wr).unwrap());

    let held = catalog.held_locks(q);
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].mode, LockMode::Wr);
}

#[test]
fn test_delete_array_locks_releases_only_this_query() {
    let catalog = catalog_with_array("A");
    let q1 = QueryId::generate(0);
    let q2 = QueryId::generate(0);
    catalog
        .lock_array(&LockDesc::new("A", q1, 0, InstanceRole::Coordinator, LockMode::Rd))
        .unwrap();
    catalog
        .lock_array(&LockDesc::new("A", q2, 0, InstanceRole::Coordinator, LockMode::Rd))
        .unwrap();

    assert_eq!(catalog.delete_array_locks(0, q1), 1);
    assert!(catalog.held_locks(q1).is_empty());
    assert_eq!(catalog.held_locks(q2).len(), 1);
}

#[test]
fn test_coordinator_lock_lookup() {
    let catalog = catalog_with_array("A");
    let q = QueryId::generate(0);
    catalog
        .lock_array(&LockDesc::new("A", q, 1, InstanceRole::Worker, LockMode::Wr))
        .unwrap();
    assert!(catalog.check_for_coordinator_lock("A", q).is_none());

    catalog
        .lock_array(&LockDesc::new("A", q, 0, InstanceRole::Coordinator, LockMode::Wr))
        .unwrap();
    assert!(catalog.check_for_coordinator_lock("A", q).is_some());
}

use std::sync::Arc;

use crate::engine::cluster::instance::InstanceMembership;
use crate::engine::cluster::liveness::InstanceLiveness;
use crate::engine::errors::QueryError;
use crate::engine::query::query::Query;
use crate::engine::query::query_id::QueryId;
use crate::engine::query::registry::QueryRegistry;

fn make_query() -> Arc<Query> {
    let membership = InstanceMembership::new(1, vec![0]);
    let liveness = Arc::new(InstanceLiveness::new(1, &membership));
    Query::new(QueryId::generate(0), None, 0, liveness).unwrap()
}

#[test]
fn test_insert_get_remove() {
    let registry = QueryRegistry::with_cap(4);
    let query = make_query();
    let id = query.id();
    registry.insert(query).unwrap();
    assert_eq!(registry.get(id).unwrap().id(), id);

    registry.remove(id);
    assert!(matches!(registry.get(id), Err(QueryError::NotFound(_))));
}

#[test]
fn test_duplicate_id_rejected() {
    let registry = QueryRegistry::with_cap(4);
    let query = make_query();
    registry.insert(query.clone()).unwrap();
    let err = registry.insert(query).unwrap_err();
    assert!(matches!(err, QueryError::DuplicateId(_)));
}

#[test]
fn test_cap_surfaces_resource_busy() {
    let registry = QueryRegistry::with_cap(2);
    registry.insert(make_query()).unwrap();
    registry.insert(make_query()).unwrap();
    let err = registry.insert(make_query()).unwrap_err();
    assert!(matches!(err, QueryError::ResourceBusy));

    // removing one frees a slot
    let survivor = registry.all().pop().unwrap();
    registry.remove(survivor.id());
    registry.insert(make_query()).unwrap();
}

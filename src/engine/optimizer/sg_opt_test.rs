use crate::engine::plan::distribution::PartitioningSchema;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::node::PhysicalPlan;
use crate::engine::plan::operator_library::{OperatorLibrary, params_to_physical};
use crate::engine::plan::ops::sg::{new_sg_operator, sg_params};
use crate::engine::optimizer::sg_opt::{collapse_sg_nodes, insert_sg_nodes};
use crate::test_helpers::factories::ArrayDescFactory;

fn scan_leaf(plan: &mut PhysicalPlan, lib: &OperatorLibrary, name: &str) -> usize {
    let desc = ArrayDescFactory::new().named(name).create();
    let params = params_to_physical(&[LogicalParameter::ArrayName(name.to_string())]).unwrap();
    let op = lib
        .create_physical("scan", "physical_scan", params, (*desc).clone())
        .unwrap();
    plan.add_node(op, Vec::new())
}

#[test]
fn test_insert_sg_for_chunk_non_preserving_child() {
    let lib = OperatorLibrary::builtin();
    let desc = ArrayDescFactory::new().create();
    let mut plan = PhysicalPlan::new();
    let scan = scan_leaf(&mut plan, &lib, "A");

    // repart changes chunk boundaries, so its parent needs an SG
    let repart_params =
        params_to_physical(&[LogicalParameter::Schema((*desc).clone())]).unwrap();
    let repart = plan.add_node(
        lib.create_physical("repart", "physical_repart", repart_params, (*desc).clone())
            .unwrap(),
        vec![scan],
    );
    let filter_desc = (*desc).clone().with_empty_bitmap();
    let filter_params = params_to_physical(&[]).unwrap();
    let filter = plan.add_node(
        lib.create_physical("filter", "physical_filter", filter_params, filter_desc)
            .unwrap(),
        vec![repart],
    );
    plan.set_root(filter);

    insert_sg_nodes(&mut plan, filter).unwrap();

    // the SG landed between filter and repart, pinned in place
    let child = plan.children(filter)[0];
    assert!(plan.is_sg(child));
    assert!(!plan.node(child).sg_movable);
    assert_eq!(plan.children(child), vec![repart]);
}

#[test]
fn test_collapse_removes_movable_sgs() {
    let lib = OperatorLibrary::builtin();
    let desc = ArrayDescFactory::new().create();
    let mut plan = PhysicalPlan::new();
    let scan = scan_leaf(&mut plan, &lib, "A");

    // two stacked movable SGs with nothing above demanding a distribution
    let sg1 = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone()),
        vec![scan],
    );
    plan.node_mut(sg1).sg_movable = true;
    let sg2 = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone()),
        vec![sg1],
    );
    plan.node_mut(sg2).sg_movable = true;
    plan.set_root(sg2);
    assert_eq!(plan.sg_count(), 2);

    collapse_sg_nodes(&mut plan, sg2).unwrap();
    assert_eq!(plan.sg_count(), 0);
    assert_eq!(plan.root(), Some(scan));
}

#[test]
fn test_collapse_keeps_frozen_sgs() {
    let lib = OperatorLibrary::builtin();
    let desc = ArrayDescFactory::new().create();
    let mut plan = PhysicalPlan::new();
    let scan = scan_leaf(&mut plan, &lib, "A");
    let sg = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::Replicated, None), (*desc).clone()),
        vec![scan],
    );
    // a user-written SG stays frozen
    plan.node_mut(sg).sg_movable = false;
    plan.set_root(sg);

    collapse_sg_nodes(&mut plan, sg).unwrap();
    assert_eq!(plan.sg_count(), 1);
}

#[test]
fn test_insert_sg_retargets_for_specific_requirement() {
    let lib = OperatorLibrary::builtin();
    let mut plan = PhysicalPlan::new();
    let scan = scan_leaf(&mut plan, &lib, "A");

    // pin the child to a by-row distribution the store cannot take
    let desc = ArrayDescFactory::new().named("A").create();
    let sg = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::ByRow, None), (*desc).clone()),
        vec![scan],
    );
    plan.node_mut(sg).sg_movable = false;
    plan.node_mut(sg).sg_offsetable = false;

    let store_params =
        params_to_physical(&[LogicalParameter::ArrayName("B".to_string())]).unwrap();
    let store = plan.add_node(
        lib.create_physical("store", "physical_store", store_params, (*desc).clone())
            .unwrap(),
        vec![sg],
    );
    plan.set_root(store);

    insert_sg_nodes(&mut plan, store).unwrap();

    // a fresh SG satisfies the store's round-robin requirement
    let child = plan.children(store)[0];
    assert!(plan.is_sg(child));
    let dist = plan.infer_distribution(child);
    assert_eq!(dist.partitioning_schema(), PartitioningSchema::RoundRobin);
}

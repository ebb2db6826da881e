use crate::engine::plan::distribution::PartitioningSchema;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::node::PhysicalPlan;
use crate::engine::plan::operator_library::OperatorLibrary;
use crate::engine::plan::operator_library::params_to_physical;
use crate::engine::plan::ops::sg::{new_sg_operator, sg_params};
use crate::test_helpers::factories::ArrayDescFactory;

fn library() -> OperatorLibrary {
    OperatorLibrary::builtin()
}

fn build_plan() -> (PhysicalPlan, usize, usize) {
    let lib = library();
    let desc = ArrayDescFactory::new().create();
    let mut plan = PhysicalPlan::new();
    let leaf_params =
        params_to_physical(&[LogicalParameter::ArrayName("A".to_string())]).unwrap();
    let leaf_op = lib
        .create_physical("scan", "physical_scan", leaf_params, (*desc).clone())
        .unwrap();
    let leaf = plan.add_node(leaf_op, Vec::new());
    let sg_op = new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone());
    let root = plan.add_node(sg_op, vec![leaf]);
    plan.set_root(root);
    (plan, leaf, root)
}

#[test]
fn test_parent_child_wiring() {
    let (plan, leaf, root) = build_plan();
    assert_eq!(plan.parent(leaf), Some(root));
    assert_eq!(plan.children(root), vec![leaf]);
    assert_eq!(plan.root(), Some(root));
}

#[test]
fn test_add_parent_inserts_between() {
    let (mut plan, leaf, root) = build_plan();
    let desc = ArrayDescFactory::new().create();
    let mid = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::Replicated, None), (*desc).clone()),
        Vec::new(),
    );
    plan.add_parent(leaf, mid);

    assert_eq!(plan.parent(leaf), Some(mid));
    assert_eq!(plan.parent(mid), Some(root));
    assert_eq!(plan.children(root), vec![mid]);
    assert_eq!(plan.children(mid), vec![leaf]);
}

#[test]
fn test_add_parent_at_root_moves_root() {
    let (mut plan, _leaf, root) = build_plan();
    let desc = ArrayDescFactory::new().create();
    let new_root = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone()),
        Vec::new(),
    );
    plan.add_parent(root, new_root);
    assert_eq!(plan.root(), Some(new_root));
    assert_eq!(plan.parent(root), Some(new_root));
}

#[test]
fn test_cut_out_splices_child() {
    let (mut plan, leaf, root) = build_plan();
    let desc = ArrayDescFactory::new().create();
    let mid = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone()),
        Vec::new(),
    );
    plan.add_parent(leaf, mid);

    plan.cut_out(mid);
    assert_eq!(plan.parent(leaf), Some(root));
    assert_eq!(plan.children(root), vec![leaf]);
}

#[test]
fn test_cut_out_root_promotes_child() {
    let (mut plan, leaf, root) = build_plan();
    plan.cut_out(root);
    assert_eq!(plan.root(), Some(leaf));
    assert_eq!(plan.parent(leaf), None);
}

#[test]
fn test_sg_count_and_infer_distribution() {
    let (mut plan, _leaf, root) = build_plan();
    assert_eq!(plan.sg_count(), 1);
    let dist = plan.infer_distribution(root);
    assert_eq!(dist.partitioning_schema(), PartitioningSchema::RoundRobin);
}

#[test]
fn test_from_slots_preserves_ids() {
    let (plan, leaf, root) = build_plan();
    let slots: Vec<_> = (0..plan.slots().len())
        .map(|i| {
            plan.slots()[i].as_ref().map(|_| i)
        })
        .collect();
    assert_eq!(slots, vec![Some(leaf), Some(root)]);
}

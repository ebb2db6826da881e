use crate::engine::plan::distribution::PartitioningSchema;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::node::PhysicalPlan;
use crate::engine::plan::operator_library::{OperatorLibrary, params_to_physical};
use crate::engine::plan::ops::sg::{new_sg_operator, sg_params};
use crate::engine::plan::serial::SerializedPlan;
use crate::engine::types::function_library::FunctionLibrary;
use crate::test_helpers::factories::ArrayDescFactory;

#[test]
fn test_plan_roundtrip_preserves_structure_and_slots() {
    let lib = OperatorLibrary::builtin();
    let desc = ArrayDescFactory::new().named("A").create();

    let mut plan = PhysicalPlan::new();
    let scan_params = params_to_physical(&[LogicalParameter::ArrayName("A".to_string())]).unwrap();
    let scan = plan.add_node(
        lib.create_physical("scan", "physical_scan", scan_params, (*desc).clone())
            .unwrap(),
        Vec::new(),
    );
    let sg = plan.add_node(
        new_sg_operator(sg_params(PartitioningSchema::RoundRobin, None), (*desc).clone()),
        vec![scan],
    );
    plan.set_root(sg);
    plan.node_mut(sg).sg_movable = true;

    let serialized = SerializedPlan::from_plan(&plan).unwrap();
    let bytes = bincode::serialize(&serialized).unwrap();
    let decoded: SerializedPlan = bincode::deserialize(&bytes).unwrap();
    let rebuilt = decoded
        .into_plan(&lib, &FunctionLibrary::builtin())
        .unwrap();

    assert_eq!(rebuilt.root(), Some(sg));
    assert_eq!(rebuilt.children(sg), vec![scan]);
    assert_eq!(rebuilt.parent(scan), Some(sg));
    assert!(rebuilt.is_sg(sg));
    assert!(rebuilt.node(sg).sg_movable);
    assert_eq!(rebuilt.op(scan).logical_name(), "scan");
    assert_eq!(rebuilt.op(sg).schema().name(), "test_array");
}

#[test]
fn test_expression_parameters_recompile() {
    let lib = OperatorLibrary::builtin();
    let desc = ArrayDescFactory::new().named("A").create();

    let mut plan = PhysicalPlan::new();
    let scan_params = params_to_physical(&[LogicalParameter::ArrayName("A".to_string())]).unwrap();
    let scan = plan.add_node(
        lib.create_physical("scan", "physical_scan", scan_params, (*desc).clone())
            .unwrap(),
        Vec::new(),
    );
    let filtered_desc = (*desc).clone().with_empty_bitmap();
    let expr = crate::engine::plan::expression::LogicalExpression::Call {
        function: ">".to_string(),
        args: vec![
            crate::engine::plan::expression::LogicalExpression::AttributeRef("v".to_string()),
            crate::engine::plan::expression::LogicalExpression::int64(2),
        ],
    };
    let functions = FunctionLibrary::builtin();
    let compiled = crate::engine::plan::expression::PhysicalExpression::compile(
        &expr,
        std::slice::from_ref(&*desc),
        &functions,
        false,
    )
    .unwrap()
    .unwrap();
    let filter = plan.add_node(
        lib.create_physical(
            "filter",
            "physical_filter",
            vec![crate::engine::plan::physical::PhysicalParameter::Expression(
                std::sync::Arc::new(compiled),
            )],
            filtered_desc,
        )
        .unwrap(),
        vec![scan],
    );
    plan.set_root(filter);

    let rebuilt = SerializedPlan::from_plan(&plan)
        .unwrap()
        .into_plan(&lib, &functions)
        .unwrap();
    let rebuilt_expr = rebuilt.op(filter).parameters()[0]
        .as_expression()
        .expect("expression survived")
        .clone();
    let keep = rebuilt_expr
        .evaluate(&[crate::engine::types::value::Value::from_i32(3)], &vec![0])
        .unwrap();
    assert!(keep.get_bool());
}

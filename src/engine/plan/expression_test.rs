use crate::engine::errors::PlanError;
use crate::engine::plan::expression::{LogicalExpression, PhysicalExpression};
use crate::engine::types::function_library::FunctionLibrary;
use crate::engine::types::type_registry::{TID_BOOL, TID_DOUBLE, TID_INT64};
use crate::engine::types::value::Value;
use crate::test_helpers::factories::ArrayDescFactory;

fn attr_ref(name: &str) -> LogicalExpression {
    LogicalExpression::AttributeRef(name.to_string())
}

fn call(function: &str, args: Vec<LogicalExpression>) -> LogicalExpression {
    LogicalExpression::Call {
        function: function.to_string(),
        args,
    }
}

#[test]
fn test_compile_and_evaluate_predicate() {
    let desc = ArrayDescFactory::new().create();
    let functions = FunctionLibrary::builtin();
    // v > 5 over an int32 attribute resolves through the widening chain
    let expr = call(">", vec![attr_ref("v"), LogicalExpression::int64(5)]);
    let compiled = PhysicalExpression::compile(&expr, std::slice::from_ref(&*desc), &functions, false)
        .unwrap()
        .unwrap();
    assert_eq!(compiled.result_type(), TID_BOOL);

    let yes = compiled.evaluate(&[Value::from_i32(7)], &vec![0]).unwrap();
    assert!(yes.get_bool());
    let no = compiled.evaluate(&[Value::from_i32(3)], &vec![0]).unwrap();
    assert!(!no.get_bool());
}

#[test]
fn test_dimension_references_resolve() {
    let desc = ArrayDescFactory::new().create();
    let functions = FunctionLibrary::builtin();
    // i * 2 over the dimension
    let expr = call("*", vec![attr_ref("i"), LogicalExpression::int64(2)]);
    let compiled = PhysicalExpression::compile(&expr, std::slice::from_ref(&*desc), &functions, false)
        .unwrap()
        .unwrap();
    assert_eq!(compiled.result_type(), TID_INT64);
    let v = compiled.evaluate(&[], &vec![3]).unwrap();
    assert_eq!(v.get_i64(), 6);
}

#[test]
fn test_unknown_name_is_an_error() {
    let desc = ArrayDescFactory::new().create();
    let functions = FunctionLibrary::builtin();
    let expr = attr_ref("missing");
    let err = PhysicalExpression::compile(&expr, std::slice::from_ref(&*desc), &functions, false)
        .unwrap_err();
    assert!(matches!(err, PlanError::Catalog(_)));
}

#[test]
fn test_tile_compilation_fails_softly_on_nesting() {
    let desc = ArrayDescFactory::new().create();
    let functions = FunctionLibrary::builtin();
    // nested call: (v + 1) > 5 cannot run in tile mode
    let nested = call(
        ">",
        vec![
            call("+", vec![attr_ref("v"), LogicalExpression::int64(1)]),
            LogicalExpression::int64(5),
        ],
    );
    let tile_attempt =
        PhysicalExpression::compile(&nested, std::slice::from_ref(&*desc), &functions, true).unwrap();
    assert!(tile_attempt.is_none());

    // the scalar retry works and remembers it cannot tile
    let scalar =
        PhysicalExpression::compile(&nested, std::slice::from_ref(&*desc), &functions, false)
            .unwrap()
            .unwrap();
    assert!(!scalar.supports_tile_mode());

    // a flat call tiles fine
    let flat = call(">", vec![attr_ref("v"), LogicalExpression::int64(5)]);
    let tiled = PhysicalExpression::compile(&flat, std::slice::from_ref(&*desc), &functions, true)
        .unwrap()
        .unwrap();
    assert!(tiled.supports_tile_mode());
}

#[test]
fn test_double_arithmetic() {
    let desc = ArrayDescFactory::new().create();
    let functions = FunctionLibrary::builtin();
    let expr = call("/", vec![attr_ref("v"), LogicalExpression::double(2.0)]);
    let compiled = PhysicalExpression::compile(&expr, std::slice::from_ref(&*desc), &functions, false)
        .unwrap()
        .unwrap();
    assert_eq!(compiled.result_type(), TID_DOUBLE);
    let v = compiled.evaluate(&[Value::from_i32(7)], &vec![0]).unwrap();
    assert_eq!(v.get_f64(), 3.5);
}

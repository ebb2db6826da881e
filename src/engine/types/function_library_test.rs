use crate::engine::errors::TypeError;
use crate::engine::types::function_library::FunctionLibrary;
use crate::engine::types::type_registry::{TID_DOUBLE, TID_INT32, TID_INT64, TID_STRING};
use crate::engine::types::value::Value;

#[test]
fn test_exact_match_has_zero_cost() {
    let lib = FunctionLibrary::builtin();
    let resolved = lib.resolve("+", &[TID_INT64, TID_INT64]).unwrap();
    assert_eq!(resolved.cost, 0);
    assert!(!resolved.swap_inputs);

    let out = resolved
        .call(&[Value::from_i64(40), Value::from_i64(2)])
        .unwrap();
    assert_eq!(out.get_i64(), 42);
}

#[test]
fn test_resolution_inserts_converters() {
    let lib = FunctionLibrary::builtin();
    // int32 + int32 has no direct variant; int64 wins over double on cost.
    let resolved = lib.resolve("+", &[TID_INT32, TID_INT32]).unwrap();
    assert_eq!(resolved.description.arg_types, [TID_INT64, TID_INT64]);
    assert!(resolved.cost > 0);

    let out = resolved
        .call(&[Value::from_i32(-5), Value::from_i32(8)])
        .unwrap();
    assert_eq!(out.get_i64(), 3);
}

#[test]
fn test_mixed_args_resolve_through_cheapest_chain() {
    let lib = FunctionLibrary::builtin();
    let resolved = lib.resolve("*", &[TID_INT64, TID_DOUBLE]).unwrap();
    // only the double variant can host the pair; the int64 side converts
    assert_eq!(resolved.description.result_type, TID_DOUBLE);

    let out = resolved
        .call(&[Value::from_i64(3), Value::from_f64(1.5)])
        .unwrap();
    assert_eq!(out.get_f64(), 4.5);
}

#[test]
fn test_function_not_found() {
    let lib = FunctionLibrary::builtin();
    let err = lib.resolve("regex_match", &[TID_STRING]).unwrap_err();
    assert!(matches!(err, TypeError::FunctionNotFound { name, .. } if name == "regex_match"));

    // known name, hopeless argument types
    let err = lib.resolve("+", &[TID_STRING, TID_STRING]).unwrap_err();
    assert!(matches!(err, TypeError::FunctionNotFound { .. }));
}

#[test]
fn test_commutative_swap_wins_on_cost() {
    let mut lib = FunctionLibrary::new();
    fn concat_like(args: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_i64(args[0].get_i64() * 10 + args[1].get_i64()))
    }
    fn widen(args: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_i64(args[0].get_i64()))
    }
    // the only variant wants (int64, int32); we offer (int32, int64)
    lib.add_function("pair", &[TID_INT64, TID_INT32], TID_INT64, concat_like, true);
    lib.add_converter(TID_INT32, TID_INT64, widen, 1);

    let swapped = lib.resolve("pair", &[TID_INT32, TID_INT64]).unwrap();
    assert!(swapped.swap_inputs);
    assert_eq!(swapped.cost, 0);

    let out = swapped
        .call(&[Value::from_i32(2), Value::from_i64(1)])
        .unwrap();
    // inputs swapped before the call: pair(1, 2) = 12
    assert_eq!(out.get_i64(), 12);
}

#[test]
fn test_tie_breaks_on_registration_order() {
    let mut lib = FunctionLibrary::new();
    fn first(_: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_i64(1))
    }
    fn second(_: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_i64(2))
    }
    fn widen(args: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_i64(args[0].get_i64()))
    }
    fn to_double(args: &[Value]) -> Result<Value, TypeError> {
        Ok(Value::from_f64(args[0].get_i64() as f64))
    }
    lib.add_function("pick", &[TID_INT64], TID_INT64, first, false);
    lib.add_function("pick", &[TID_DOUBLE], TID_INT64, second, false);
    lib.add_converter(TID_INT32, TID_INT64, widen, 2);
    lib.add_converter(TID_INT32, TID_DOUBLE, to_double, 2);

    // both candidates cost 2; earliest registration must win
    let resolved = lib.resolve("pick", &[TID_INT32]).unwrap();
    let out = resolved.call(&[Value::from_i32(0)]).unwrap();
    assert_eq!(out.get_i64(), 1);
}

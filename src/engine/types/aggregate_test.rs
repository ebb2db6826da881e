use crate::engine::types::aggregate::AggregateLibrary;
use crate::engine::types::value::Value;

#[test]
fn test_sum_accumulate_and_finalize() {
    let lib = AggregateLibrary::builtin();
    let sum = lib.resolve("sum").unwrap();

    let mut state = sum.init_state();
    assert_eq!(state.missing_reason(), Some(0));

    for v in [1.0, 2.0, 3.5] {
        sum.accumulate(&mut state, &Value::from_f64(v));
    }
    assert_eq!(sum.finalize(&state).get_f64(), 6.5);
}

#[test]
fn test_nulls_are_skipped() {
    let lib = AggregateLibrary::builtin();
    let count = lib.resolve("count").unwrap();

    let mut state = count.init_state();
    count.accumulate(&mut state, &Value::from_i64(1));
    count.accumulate(&mut state, &Value::null(3));
    count.accumulate(&mut state, &Value::from_i64(2));
    assert_eq!(count.finalize(&state).get_u64(), 2);
}

#[test]
fn test_merge_is_associative() {
    let lib = AggregateLibrary::builtin();
    let avg = lib.resolve("avg").unwrap();

    let mut a = avg.init_state();
    let mut b = avg.init_state();
    let mut c = avg.init_state();
    avg.accumulate(&mut a, &Value::from_f64(1.0));
    avg.accumulate(&mut b, &Value::from_f64(2.0));
    avg.accumulate(&mut c, &Value::from_f64(6.0));

    // (a ⊕ b) ⊕ c
    let mut left = a.clone();
    avg.merge(&mut left, &b);
    avg.merge(&mut left, &c);

    // a ⊕ (b ⊕ c)
    let mut right_inner = b.clone();
    avg.merge(&mut right_inner, &c);
    let mut right = a.clone();
    avg.merge(&mut right, &right_inner);

    assert_eq!(left, right);
    assert_eq!(avg.finalize(&left).get_f64(), 3.0);
}

#[test]
fn test_merge_into_absent_state_installs_source() {
    let lib = AggregateLibrary::builtin();
    let max = lib.resolve("max").unwrap();

    let mut src = max.init_state();
    max.accumulate(&mut src, &Value::from_f64(9.0));

    let mut dst = max.init_state();
    max.merge(&mut dst, &src);
    assert_eq!(max.finalize(&dst).get_f64(), 9.0);
}

#[test]
fn test_var_and_stdev() {
    let lib = AggregateLibrary::builtin();
    let var = lib.resolve("var").unwrap();
    let stdev = lib.resolve("stdev").unwrap();

    let mut vs = var.init_state();
    let mut ss = stdev.init_state();
    for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
        var.accumulate(&mut vs, &Value::from_f64(x));
        stdev.accumulate(&mut ss, &Value::from_f64(x));
    }
    // sample variance of the classic example set
    let v = var.finalize(&vs).get_f64();
    assert!((v - 32.0 / 7.0).abs() < 1e-9);
    let s = stdev.finalize(&ss).get_f64();
    assert!((s - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
}

#[test]
fn test_unknown_aggregate() {
    let lib = AggregateLibrary::builtin();
    assert!(lib.resolve("median").is_err());
    assert!(lib.contains("sum"));
}

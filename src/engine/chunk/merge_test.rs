use crate::engine::chunk::iterator::{ChunkIterator, IterationMode};
use crate::engine::chunk::mem_chunk::{ChunkEncoding, MemChunk};
use crate::engine::chunk::merge::{SyntheticDim, aggregate_merge, merge};
use crate::engine::types::aggregate::AggregateLibrary;
use crate::engine::types::type_registry::TID_AGGREGATE_STATE;
use crate::engine::types::value::Value;
use crate::test_helpers::factories::{ArrayDescFactory, ChunkFactory};

fn collect(chunk: &MemChunk) -> Vec<(Vec<i64>, i64)> {
    let mut out = Vec::new();
    let mut it = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    while !it.end() {
        out.push((it.position().unwrap(), it.item().unwrap().get_i64()));
        it.advance().unwrap();
    }
    out
}

#[test]
fn test_bitwise_or_merge_disjoint_cells() {
    let desc = ArrayDescFactory::new()
        .emptyable()
        .no_default_dimensions()
        .dimension("i", 0, 15, 16, 0)
        .create();
    let mut dst = ChunkFactory::new(desc.clone())
        .cell(vec![0], Value::from_i32(1))
        .cell(vec![2], Value::from_i32(2))
        .create();
    let src = ChunkFactory::new(desc)
        .cell(vec![5], Value::from_i32(5))
        .cell(vec![9], Value::from_i32(9))
        .create();

    merge(&mut dst, &src, None).unwrap();
    assert_eq!(
        collect(&dst),
        vec![(vec![0], 1), (vec![2], 2), (vec![5], 5), (vec![9], 9)]
    );
}

#[test]
fn test_merge_identity_with_empty() {
    let desc = ArrayDescFactory::new()
        .emptyable()
        .no_default_dimensions()
        .dimension("i", 0, 15, 16, 0)
        .create();
    let x = ChunkFactory::new(desc.clone())
        .cell(vec![1], Value::from_i32(10))
        .cell(vec![7], Value::from_i32(70))
        .create();
    let empty = ChunkFactory::new(desc.clone()).create();

    // merge(X, empty) == X
    let mut left = x.clone();
    merge(&mut left, &empty, None).unwrap();
    assert_eq!(collect(&left), collect(&x));

    // merge(empty, X) == X
    let mut right = empty.clone();
    merge(&mut right, &x, None).unwrap();
    assert_eq!(collect(&right), collect(&x));
}

#[test]
fn test_cellwise_merge_source_wins() {
    // mixed encodings fall back to the cell-wise path
    let desc = ArrayDescFactory::new()
        .emptyable()
        .no_default_dimensions()
        .dimension("i", 0, 15, 16, 0)
        .create();
    let mut dst = ChunkFactory::new(desc.clone())
        .encoding(ChunkEncoding::Dense)
        .cell(vec![1], Value::from_i32(100))
        .create();
    let src = ChunkFactory::new(desc)
        .encoding(ChunkEncoding::Sparse)
        .cell(vec![1], Value::from_i32(200))
        .cell(vec![4], Value::from_i32(400))
        .create();

    merge(&mut dst, &src, None).unwrap();
    assert_eq!(collect(&dst), vec![(vec![1], 200), (vec![4], 400)]);
}

#[test]
fn test_synthetic_dimension_extends_conflicts() {
    // two-dimensional array; the second axis is synthetic
    let desc = ArrayDescFactory::new()
        .emptyable()
        .no_default_dimensions()
        .dimension("i", 0, 3, 4, 0)
        .dimension("s", 0, 7, 8, 0)
        .create();
    let mut dst = ChunkFactory::new(desc.clone())
        .cell(vec![1, 0], Value::from_i32(10))
        .create();
    let src = ChunkFactory::new(desc)
        .cell(vec![1, 0], Value::from_i32(20))
        .cell(vec![2, 0], Value::from_i32(30))
        .create();

    let synthetic = SyntheticDim {
        dim_index: 1,
        dim_start: 0,
    };
    merge(&mut dst, &src, Some(&synthetic)).unwrap();

    // the conflicting cell moved to s=1 instead of overwriting s=0
    assert_eq!(
        collect(&dst),
        vec![(vec![1, 0], 10), (vec![1, 1], 20), (vec![2, 0], 30)]
    );
}

#[test]
fn test_aggregate_merge_combines_states() {
    let lib = AggregateLibrary::builtin();
    let sum = lib.resolve("sum").unwrap();

    // aggregate state attributes are nullable; reason 0 means "no state"
    let state_attr = crate::engine::array::attribute::AttributeDesc::new(
        0,
        "state",
        TID_AGGREGATE_STATE,
    )
    .nullable(true)
    .with_default(Value::null(0));
    let desc = std::sync::Arc::new(
        crate::engine::array::descriptor::ArrayDesc::new(
            "states",
            vec![state_attr],
            vec![crate::engine::array::dimension::DimensionDesc::new("i", 0, 3, 4, 0)],
        )
        .with_empty_bitmap(),
    );

    let mut s1 = sum.init_state();
    sum.accumulate(&mut s1, &Value::from_f64(1.0));
    let mut s2 = sum.init_state();
    sum.accumulate(&mut s2, &Value::from_f64(2.0));
    let mut s3 = sum.init_state();
    sum.accumulate(&mut s3, &Value::from_f64(40.0));

    let mut dst = ChunkFactory::new(desc.clone())
        .cell(vec![0], s1)
        .create();
    let src = ChunkFactory::new(desc)
        .cell(vec![0], s2)
        .cell(vec![1], s3)
        .create();

    aggregate_merge(&mut dst, &src, sum.as_ref()).unwrap();

    let mut it = dst.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    assert!(it.set_position(&vec![0]).unwrap());
    let merged = it.item().unwrap().clone();
    assert_eq!(sum.finalize(&merged).get_f64(), 3.0);
    assert!(it.set_position(&vec![1]).unwrap());
    let installed = it.item().unwrap().clone();
    assert_eq!(sum.finalize(&installed).get_f64(), 40.0);
}

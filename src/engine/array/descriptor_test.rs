use crate::engine::array::dimension::DimensionDesc;
use crate::test_helpers::factories::ArrayDescFactory;

#[test]
fn test_chunk_position_alignment() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 99, 10, 0)
        .dimension("j", -5, 14, 5, 0)
        .create();

    assert_eq!(desc.chunk_position_for(&vec![13, -3]), vec![10, -5]);
    assert_eq!(desc.chunk_position_for(&vec![10, 0]), vec![10, 0]);
    assert_eq!(desc.chunk_position_for(&vec![99, 14]), vec![90, 10]);
}

#[test]
fn test_chunk_linear_index_row_major() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 19, 10, 0)
        .dimension("j", 0, 19, 10, 0)
        .create();

    assert_eq!(desc.chunk_linear_index(&vec![0, 0]), 0);
    assert_eq!(desc.chunk_linear_index(&vec![0, 10]), 1);
    assert_eq!(desc.chunk_linear_index(&vec![10, 0]), 2);
    assert_eq!(desc.chunk_linear_index(&vec![10, 10]), 3);
}

#[test]
fn test_chunk_positions_enumeration() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 9, 5, 0)
        .dimension("j", 0, 4, 5, 0)
        .create();
    assert_eq!(desc.chunk_positions(), vec![vec![0, 0], vec![5, 0]]);
}

#[test]
fn test_empty_bitmap_attribute_is_unique_and_last() {
    let desc = ArrayDescFactory::new().emptyable().create();
    let bitmap = desc.empty_bitmap_attribute().expect("bitmap attribute");
    assert_eq!(bitmap.name(), "$empty");
    assert_eq!(bitmap.id() as usize, desc.attributes().len() - 1);
    assert_eq!(desc.data_attributes().count(), desc.attributes().len() - 1);

    // adding it twice is a no-op
    let again = (*desc).clone().with_empty_bitmap();
    assert_eq!(again.attributes().len(), desc.attributes().len());
}

#[test]
fn test_contains_and_boundaries() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 13, 5, 1)
        .create();

    assert!(desc.contains(&vec![13]));
    assert!(!desc.contains(&vec![14]));

    // last chunk clamps to end_max
    assert_eq!(desc.chunk_last_position(&vec![10], false), vec![13]);
    assert_eq!(desc.chunk_last_position(&vec![10], true), vec![13]);
    assert_eq!(desc.chunk_first_position(&vec![10], true), vec![9]);
    assert_eq!(desc.chunk_first_position(&vec![0], true), vec![0]);
}

#[test]
fn test_dimension_chunk_math() {
    let dim = DimensionDesc::new("i", -10, 9, 5, 0);
    assert_eq!(dim.length(), 20);
    assert_eq!(dim.chunk_count(), 4);
    assert_eq!(dim.chunk_start_for(-10), -10);
    assert_eq!(dim.chunk_start_for(-1), -5);
    assert_eq!(dim.chunk_start_for(9), 5);
}

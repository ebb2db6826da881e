use crate::engine::array::coordinates::{
    CoordinatesMapper, box_cells, box_contains, odometer_step,
};
use crate::test_helpers::factories::ArrayDescFactory;

#[test]
fn test_mapper_roundtrip_two_dims() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 9, 5, 0)
        .dimension("j", 0, 9, 5, 0)
        .create();
    let mapper = CoordinatesMapper::new(&desc, &vec![5, 0]);

    assert_eq!(mapper.logical_size(), 25);
    for pos in 0..25 {
        let coords = mapper.pos_to_coord(pos);
        assert_eq!(mapper.coord_to_pos(&coords), Some(pos));
    }
    assert_eq!(mapper.coord_to_pos(&vec![5, 0]), Some(0));
    assert_eq!(mapper.coord_to_pos(&vec![5, 1]), Some(1));
    assert_eq!(mapper.coord_to_pos(&vec![6, 0]), Some(5));
    // outside the chunk box
    assert_eq!(mapper.coord_to_pos(&vec![4, 0]), None);
    assert_eq!(mapper.coord_to_pos(&vec![10, 0]), None);
}

#[test]
fn test_mapper_overlap_expands_origin() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 99, 10, 2)
        .create();
    let mapper = CoordinatesMapper::new(&desc, &vec![10]);

    // box spans [8..21]: interval 10 + overlap 2 on both sides
    assert_eq!(mapper.logical_size(), 14);
    assert_eq!(mapper.coord_to_pos(&vec![8]), Some(0));
    assert_eq!(mapper.coord_to_pos(&vec![10]), Some(2));
}

#[test]
fn test_odometer_walks_row_major() {
    let first = vec![0i64, 0];
    let last = vec![1i64, 2];
    let mut pos = first.clone();
    let mut seen = vec![pos.clone()];
    while odometer_step(&mut pos, &first, &last) {
        seen.push(pos.clone());
    }
    assert_eq!(
        seen,
        vec![
            vec![0, 0],
            vec![0, 1],
            vec![0, 2],
            vec![1, 0],
            vec![1, 1],
            vec![1, 2]
        ]
    );
}

#[test]
fn test_box_helpers() {
    assert!(box_contains(&vec![0, 0], &vec![3, 3], &vec![2, 3]));
    assert!(!box_contains(&vec![0, 0], &vec![3, 3], &vec![2, 4]));
    assert_eq!(box_cells(&vec![0, 0], &vec![3, 3]), 16);
    assert_eq!(box_cells(&vec![5], &vec![4]), 0);
}

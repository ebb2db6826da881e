use crate::engine::chunk::empty_bitmap::EmptyBitmap;

#[test]
fn test_bits_set_and_count() {
    let mut bm = EmptyBitmap::bits(64);
    assert_eq!(bm.count(), 0);
    bm.set(0);
    bm.set(13);
    bm.set(63);
    bm.set(13); // idempotent
    assert_eq!(bm.count(), 3);
    assert!(bm.is_set(13));
    assert!(!bm.is_set(12));
}

#[test]
fn test_runs_coalesce_adjacent() {
    let mut bm = EmptyBitmap::runs(100);
    bm.set(5);
    bm.set(6);
    bm.set(7);
    match &bm {
        EmptyBitmap::Runs { runs, .. } => assert_eq!(runs, &vec![(5, 3)]),
        _ => unreachable!(),
    }

    // fill the hole between two runs
    bm.set(9);
    bm.set(8);
    match &bm {
        EmptyBitmap::Runs { runs, .. } => assert_eq!(runs, &vec![(5, 5)]),
        _ => unreachable!(),
    }
    assert_eq!(bm.count(), 5);
}

#[test]
fn test_runs_prepend_extends_forward() {
    let mut bm = EmptyBitmap::runs(100);
    bm.set(10);
    bm.set(9);
    match &bm {
        EmptyBitmap::Runs { runs, .. } => assert_eq!(runs, &vec![(9, 2)]),
        _ => unreachable!(),
    }
}

#[test]
fn test_next_set_walks_both_forms() {
    let mut bits = EmptyBitmap::bits(32);
    bits.set(4);
    bits.set(20);
    assert_eq!(bits.next_set(0), Some(4));
    assert_eq!(bits.next_set(5), Some(20));
    assert_eq!(bits.next_set(21), None);

    let mut runs = EmptyBitmap::runs(32);
    runs.set(4);
    runs.set(20);
    runs.set(21);
    assert_eq!(runs.next_set(0), Some(4));
    assert_eq!(runs.next_set(4), Some(4));
    assert_eq!(runs.next_set(5), Some(20));
    assert_eq!(runs.next_set(21), Some(21));
    assert_eq!(runs.next_set(22), None);
}

#[test]
fn test_or_with_mixed_forms() {
    let mut bits = EmptyBitmap::bits(16);
    bits.set(1);
    let mut runs = EmptyBitmap::runs(16);
    runs.set(3);
    runs.set(4);

    bits.or_with(&runs);
    assert!(bits.is_set(1));
    assert!(bits.is_set(3));
    assert!(bits.is_set(4));
    assert_eq!(bits.count(), 3);
}

use crate::engine::cluster::instance::InstanceMembership;
use crate::engine::cluster::liveness::InstanceLiveness;

#[test]
fn test_snapshot_from_membership() {
    let membership = InstanceMembership::new(1, vec![2, 0, 1, 1]);
    assert_eq!(membership.instances, vec![0, 1, 2]);

    let liveness = InstanceLiveness::new(1, &membership);
    assert_eq!(liveness.num_live(), 3);
    assert_eq!(liveness.num_dead(), 0);
    assert!(liveness.is_live(2));
}

#[test]
fn test_with_dead_bumps_version() {
    let membership = InstanceMembership::new(1, vec![0, 1, 2]);
    let v1 = InstanceLiveness::new(1, &membership);
    let v2 = v1.with_dead(1);

    assert_eq!(v2.version(), 2);
    assert!(v2.is_dead(1));
    assert!(!v2.is_live(1));
    assert_eq!(v2.num_live(), 2);
    // the original snapshot is untouched
    assert!(v1.is_live(1));
    assert!(!v1.is_equal(&v2));
}

#[test]
fn test_double_death_is_idempotent() {
    let membership = InstanceMembership::new(1, vec![0, 1]);
    let v = InstanceLiveness::new(1, &membership).with_dead(1).with_dead(1);
    assert_eq!(v.num_dead(), 1);
}

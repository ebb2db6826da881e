use crate::engine::errors::TypeError;
use crate::engine::types::type_registry::{
    TID_BOOL, TID_INT32, TID_STRING, Type, TypeRegistry,
};

#[test]
fn test_builtin_layouts() {
    let reg = TypeRegistry::builtin();

    let i32t = reg.get(TID_INT32).unwrap();
    assert_eq!(i32t.byte_size(), 4);
    assert!(!i32t.is_variable());
    assert!(!i32t.is_bool());

    let b = reg.get(TID_BOOL).unwrap();
    assert!(b.is_bool());
    assert_eq!(b.byte_size(), 0);

    let s = reg.get(TID_STRING).unwrap();
    assert!(s.is_variable());
}

#[test]
fn test_unknown_type_is_an_error() {
    let reg = TypeRegistry::builtin();
    let err = reg.get("complex128").unwrap_err();
    assert!(matches!(err, TypeError::NotRegistered(name) if name == "complex128"));
}

#[test]
fn test_user_registration() {
    let mut reg = TypeRegistry::builtin();
    reg.register(Type::new("rational", 128));
    let ty = reg.get("rational").unwrap();
    assert_eq!(ty.byte_size(), 16);
}

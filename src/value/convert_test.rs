use std::sync::Weak;

use crate::error::Error;

use super::*;

struct NoRelease;

impl Releaser for NoRelease {
    fn release(&self, _symbol: SymbolId) {}
}

fn detached() -> Weak<dyn Releaser> {
    Weak::<NoRelease>::new() as Weak<dyn Releaser>
}

fn owner() -> LoaderId {
    LoaderId {
        tag: "mock".to_string(),
        instance: 3,
    }
}

fn sample(kind: Kind) -> Value {
    match kind {
        Kind::Null => Value::Null,
        Kind::Bool => Value::Bool(true),
        Kind::Char => Value::Char('z'),
        Kind::Short => Value::Short(-7),
        Kind::Int => Value::Int(42),
        Kind::Long => Value::Long(1 << 40),
        Kind::Float => Value::Float(1.25),
        Kind::Double => Value::Double(3.1416),
        Kind::String => Value::from("hello"),
        Kind::Buffer => Value::Buffer(vec![0, 159, 146, 150]),
        Kind::Array => Value::Array(vec![Value::Int(1), Value::from("two")]),
        Kind::Map => {
            let mut map = ValueMap::new();
            map.insert(Value::Double(0.5), Value::Null);
            Value::Map(map)
        }
        Kind::Pointer => Value::Pointer(Pointer::new(owner(), SymbolId(9), detached())),
        Kind::Function => Value::Function(FunctionHandle::new(
            owner(),
            SymbolId(1),
            "two_doubles",
            Signature::default(),
            false,
            detached(),
        )),
        Kind::Future => Value::Future(Future::resolved(Value::Int(1))),
    }
}

#[test]
fn convert_to_own_kind_is_identity() {
    for kind in Kind::ALL {
        let value = sample(kind);
        let converted = value.convert(kind).unwrap();
        assert_eq!(converted.kind(), kind);
        assert_eq!(converted, value, "identity failed for {}", kind);
    }
}

#[test]
fn integers_promote_to_wider_kinds() {
    assert_eq!(Value::Short(3).convert(Kind::Int).unwrap(), Value::Int(3));
    assert_eq!(Value::Int(3).convert(Kind::Long).unwrap(), Value::Long(3));
    assert_eq!(Value::Int(3).convert(Kind::Double).unwrap(), Value::Double(3.0));
    assert_eq!(Value::Short(4).convert(Kind::Float).unwrap(), Value::Float(4.0));
    assert_eq!(Value::Float(0.5).convert(Kind::Double).unwrap(), Value::Double(0.5));
}

#[test]
fn narrowing_fails_with_precision_loss() {
    let err = Value::Double(3.9).convert(Kind::Int).unwrap_err();
    assert!(matches!(
        err,
        Error::PrecisionLoss {
            from: Kind::Double,
            to: Kind::Int
        }
    ));
    assert!(matches!(
        Value::Long(1).convert(Kind::Int),
        Err(Error::PrecisionLoss { .. })
    ));
    assert!(matches!(
        Value::Long(1).convert(Kind::Double),
        Err(Error::PrecisionLoss { .. })
    ));
    assert!(matches!(
        Value::Int(1).convert(Kind::Float),
        Err(Error::PrecisionLoss { .. })
    ));
}

#[test]
fn truncating_conversion_saturates() {
    assert_eq!(
        Value::Double(3.9).convert_truncating(Kind::Int).unwrap(),
        Value::Int(3)
    );
    assert_eq!(
        Value::Long(i64::MAX).convert_truncating(Kind::Short).unwrap(),
        Value::Short(i16::MAX)
    );
    assert_eq!(
        Value::Long(-5).convert_truncating(Kind::Double).unwrap(),
        Value::Double(-5.0)
    );
}

#[test]
fn unrelated_kinds_mismatch() {
    let err = Value::from("f").convert(Kind::Function).unwrap_err();
    assert!(matches!(
        err,
        Error::TypeMismatch {
            from: Kind::String,
            to: Kind::Function
        }
    ));
    assert!(matches!(
        Value::Bool(true).convert_truncating(Kind::Int),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        Value::Null.convert(Kind::String),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn text_conversions() {
    assert_eq!(Value::Char('a').convert(Kind::String).unwrap(), Value::from("a"));
    assert_eq!(Value::from("b").convert(Kind::Char).unwrap(), Value::Char('b'));
    assert!(Value::from("bc").convert(Kind::Char).is_err());
    assert_eq!(
        Value::from("hi").convert(Kind::Buffer).unwrap(),
        Value::Buffer(b"hi".to_vec())
    );
    assert!(Value::Buffer(vec![0xff]).convert(Kind::String).is_err());
}

#[test]
fn conversion_error_message() {
    let err = Value::Double(1.5).convert(Kind::Short).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"precision loss: cannot convert double to short without truncating"
    );
}

//! End-to-end encode/decode tests through the public API.

use pretty_assertions::assert_eq;
use vcodec::{
    decode, decode_value, decode_with, encode, encode_canonical, encode_with, Codec, CodecError,
    DecodeOptions, DefaultCodec, EncodeOptions, Registry, Result, MAGIC, TOOLCHAIN_VERSION,
};
use vcodec_core::{
    FunctionRef, MappingRef, ObjectRef, PikeString, Program, ProgramRef, TypeExpr, Value,
};

fn roundtrip(v: &Value) -> Value {
    let bytes = encode(v, &mut DefaultCodec::default()).unwrap();
    decode_value(&bytes).unwrap()
}

/// A program with one variable `n`, a method `bump` and a constant `LIMIT`.
fn counter_program() -> ProgramRef {
    let mut p = Program::new();
    p.add_variable("n", TypeExpr::int());
    p.add_function("bump", TypeExpr::function(vec![], TypeExpr::int()), &[1, 2, 3]);
    p.add_constant("LIMIT", Value::Int(10));
    p.finish();
    ProgramRef::new(p)
}

fn counter(n: i64) -> ObjectRef {
    let obj = ObjectRef::clone_of(&counter_program());
    obj.set_variable(0, Value::Int(n));
    obj
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_basic_roundtrip() {
    let values = vec![
        Value::Int(42),
        Value::Float(2.5),
        Value::string("hello"),
        Value::String(PikeString::from("\u{20ac}uro")),
        Value::array(vec![Value::Int(1), Value::string("two"), Value::Float(3.0)]),
        Value::mapping([
            (Value::string("a"), Value::Int(1)),
            (Value::Int(2), Value::array(vec![])),
        ]),
        Value::multiset(vec![Value::Int(1), Value::Int(1), Value::string("x")]),
    ];
    for v in &values {
        assert!(roundtrip(v).equal(v), "roundtrip of {}", v);
    }
}

#[test]
fn test_cycles() {
    let mapping = MappingRef::default();
    let m = Value::Mapping(mapping.clone());
    mapping.insert(Value::string("self"), m.clone());
    let out = roundtrip(&m);
    let inner = out.as_mapping().unwrap().get(&Value::string("self")).unwrap();
    assert!(inner.is_same(&out));

    let obj = counter(0);
    obj.set_variable(0, Value::Object(obj.clone()));
    let out = roundtrip(&Value::Object(obj));
    let out_obj = out.as_object().unwrap();
    assert!(out_obj.get_variable(0).unwrap().is_same(&out));
}

#[test]
fn test_object_held_by_its_own_program() {
    let p = counter_program();
    let obj = ObjectRef::clone_of(&p);
    obj.set_variable(0, Value::Int(12));
    p.borrow_mut().add_anonymous_constant(Value::Object(obj.clone()));

    let out = roundtrip(&Value::Object(obj));
    let out_obj = out.as_object().unwrap();
    assert_eq!(out_obj.get_variable(0), Some(Value::Int(12)));
    let program = out_obj.program().unwrap();
    let held = program.borrow().constants.last().unwrap().value.clone();
    assert!(held.is_same(&out));
}

#[test]
fn test_sharing_preserved() {
    let x = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let v = Value::array(vec![x.clone(), x.clone()]);
    let out = roundtrip(&v);
    let arr = out.as_array().unwrap();
    assert!(arr.get(0).unwrap().is_same(&arr.get(1).unwrap()));

    let single = encode(&Value::array(vec![x]), &mut DefaultCodec::default()).unwrap();
    let double = encode(&v, &mut DefaultCodec::default()).unwrap();
    assert!(double.len() < 2 * single.len());
}

#[test]
fn test_int_boundaries() {
    for i in [-1, 0, 3, 4, 5, -4, -5, 255, 65_536, i64::MIN, i64::MAX] {
        assert_eq!(roundtrip(&Value::Int(i)), Value::Int(i));
    }
}

#[test]
fn test_float_boundaries_bit_identical() {
    for x in [
        0.0,
        -0.0,
        f64::from_bits(1),
        f64::MIN_POSITIVE,
        f64::MAX,
        -f64::MAX,
        f64::INFINITY,
        f64::NEG_INFINITY,
        1.0 / 3.0,
    ] {
        match roundtrip(&Value::Float(x)) {
            Value::Float(y) => assert_eq!(y.to_bits(), x.to_bits(), "float {}", x),
            other => panic!("expected float, got {}", other),
        }
    }
    match roundtrip(&Value::Float(f64::NAN)) {
        Value::Float(y) => assert!(y.is_nan()),
        other => panic!("expected float, got {}", other),
    }
}

// =============================================================================
// Canonical mode
// =============================================================================

#[test]
fn test_canonical_determinism() {
    let a = Value::mapping([
        (Value::string("b"), Value::Int(2)),
        (Value::Int(7), Value::Float(0.5)),
        (Value::string("a"), Value::multiset(vec![Value::string("y"), Value::Int(3)])),
    ]);
    let b = Value::mapping([
        (Value::string("a"), Value::multiset(vec![Value::Int(3), Value::string("y")])),
        (Value::string("b"), Value::Int(2)),
        (Value::Int(7), Value::Float(0.5)),
    ]);
    assert!(a.equal(&b));
    assert_eq!(encode_canonical(&a).unwrap(), encode_canonical(&b).unwrap());
    assert!(decode_value(&encode_canonical(&a).unwrap()).unwrap().equal(&a));
}

#[test]
fn test_canonical_restrictions() {
    let err = encode_canonical(&Value::Object(counter(1))).unwrap_err();
    assert!(matches!(err, CodecError::Unsupported(_)));

    let bad_key = Value::mapping([(Value::array(vec![]), Value::Int(1))]);
    let err = encode_canonical(&bad_key).unwrap_err();
    assert!(matches!(err, CodecError::Unsupported(_)));

    // non-canonical mode takes the same value
    assert!(encode(&bad_key, &mut DefaultCodec::default()).is_ok());
}

// =============================================================================
// Malformed input
// =============================================================================

#[test]
fn test_malformed_input() {
    let bytes = encode(&Value::string("hello"), &mut DefaultCodec::default()).unwrap();
    assert!(decode_value(&bytes[..bytes.len() - 1]).unwrap_err().is_format());
    assert!(decode_value(&bytes[..MAGIC.len()]).unwrap_err().is_format());

    let mut unknown = MAGIC.to_vec();
    unknown.push(0x20 | 12);
    assert!(decode_value(&unknown).unwrap_err().is_format());

    let mut backref = MAGIC.to_vec();
    backref.extend_from_slice(&[0x20 | (1 << 6), 0x2f | (3 << 6)]);
    assert!(decode_value(&backref).unwrap_err().is_format());
}

#[test]
fn test_depth_limit_on_decode() {
    let mut v = Value::Int(0);
    for _ in 0..20 {
        v = Value::array(vec![v]);
    }
    let bytes = encode(&v, &mut DefaultCodec::default()).unwrap();
    let opts = DecodeOptions {
        max_depth: 8,
        ..DecodeOptions::default()
    };
    let err = decode_with(&bytes, &mut DefaultCodec::default(), &opts).unwrap_err();
    assert_eq!(err, CodecError::DepthExceeded { limit: 8 });
}

#[test]
fn test_legacy_stream() {
    // ({ 5, "ok" }) in the pre-magic format
    let bytes = [0x80, 0x82, 0x88, 0x85, 0x86, 0x82, b'o', b'k'];
    let v = decode_value(&bytes).unwrap();
    assert!(v.equal(&Value::array(vec![Value::Int(5), Value::string("ok")])));
}

// =============================================================================
// Objects, functions and programs
// =============================================================================

#[test]
fn test_program_roundtrip() {
    let p = counter_program();
    let out = roundtrip(&Value::Program(p.clone()));
    let q = out.as_program().unwrap();
    let (p, q) = (p.borrow(), q.borrow());
    assert_eq!(q.identifiers.len(), p.identifiers.len());
    assert_eq!(q.inherits.len(), p.inherits.len());
    assert_eq!(q.program, p.program);
    assert_eq!(q.find_constant(&"LIMIT".into()), Some(Value::Int(10)));
    assert!(q.find_identifier(&"bump".into()).is_some());
}

#[test]
fn test_object_by_value_keeps_state() {
    let out = roundtrip(&Value::Object(counter(41)));
    let obj = out.as_object().unwrap();
    assert_eq!(obj.get_variable(0), Some(Value::Int(41)));
}

#[test]
fn test_shared_program_encoded_once() {
    let p = counter_program();
    let a = ObjectRef::clone_of(&p);
    let b = ObjectRef::clone_of(&p);
    let out = roundtrip(&Value::array(vec![Value::Object(a), Value::Object(b)]));
    let arr = out.as_array().unwrap();
    let pa = arr.get(0).unwrap().as_object().unwrap().program().unwrap();
    let pb = arr.get(1).unwrap().as_object().unwrap().program().unwrap();
    assert!(pa.ptr_eq(&pb));
}

#[test]
fn test_dead_object_encodes_as_zero() {
    let obj = counter(1);
    obj.destruct();
    let out = roundtrip(&Value::array(vec![Value::Object(obj)]));
    assert_eq!(out.as_array().unwrap().get(0), Some(Value::ZERO));
}

#[test]
fn test_function_by_object_and_name() {
    let obj = counter(3);
    let bump = obj.program().unwrap().borrow().find_identifier(&"bump".into()).unwrap();
    let f = Value::Function(FunctionRef::new(obj, bump));
    let out = roundtrip(&Value::array(vec![f.clone(), f]));
    let arr = out.as_array().unwrap();
    let Value::Function(g) = arr.get(0).unwrap() else {
        panic!("expected function");
    };
    assert_eq!(g.name(), Some(PikeString::from("bump")));
    assert_eq!(g.object.get_variable(0), Some(Value::Int(3)));
    assert!(arr.get(0).unwrap().is_same(&arr.get(1).unwrap()));
}

#[test]
fn test_objects_by_name() {
    let obj = counter(9);
    let p = obj.program().unwrap();
    let mut registry = Registry::builtins();
    registry.insert("main", Value::Object(obj.clone()));
    registry.insert("Counter", Value::Program(p.clone()));
    let mut codec = DefaultCodec::new(registry);

    let v = Value::array(vec![Value::Object(obj.clone()), Value::Program(p.clone())]);
    let bytes = encode(&v, &mut codec).unwrap();
    let out = decode(&bytes, &mut codec).unwrap();
    let arr = out.as_array().unwrap();
    assert!(arr.get(0).unwrap().as_object().unwrap().ptr_eq(&obj));
    assert!(arr.get(1).unwrap().as_program().unwrap().ptr_eq(&p));
}

#[test]
fn test_version_mismatch() {
    let mut bytes =
        encode(&Value::Program(counter_program()), &mut DefaultCodec::default()).unwrap();
    let version = TOOLCHAIN_VERSION.as_bytes();
    let at = bytes
        .windows(version.len())
        .position(|w| w == version)
        .expect("version string in dump");
    bytes[at] = b'V';
    let err = decode_value(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::VersionMismatch { .. }), "{}", err);
}

#[test]
fn test_malformed_program_index() {
    let p = counter_program();
    p.borrow_mut().identifier_index.push(99);
    let bytes = encode(&Value::Program(p), &mut DefaultCodec::default()).unwrap();
    let err = decode_value(&bytes).unwrap_err();
    assert!(err.is_format());
    assert!(err.to_string().contains("malformed program"), "{}", err);
}

// =============================================================================
// Codec protocol
// =============================================================================

/// Names every object after itself, which is not a plain value.
struct SelfNamingCodec;

impl Codec for SelfNamingCodec {
    fn name_of(&mut self, value: &Value) -> Result<Option<Value>> {
        Ok(Some(value.clone()))
    }

    fn object_of(&mut self, name: &Value) -> Result<Value> {
        Ok(name.clone())
    }

    fn function_of(&mut self, name: &Value) -> Result<Value> {
        Ok(name.clone())
    }

    fn program_of(&mut self, name: &Value) -> Result<Value> {
        Ok(name.clone())
    }

    fn encode_object(&mut self, _object: &ObjectRef) -> Result<Value> {
        Ok(Value::ZERO)
    }

    fn decode_object(&mut self, _object: &ObjectRef, _payload: Value) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_name_must_be_plain_value() {
    let err = encode(&Value::Object(counter(1)), &mut SelfNamingCodec).unwrap_err();
    assert!(matches!(err, CodecError::CodecProtocol(_)));
}

#[test]
fn test_resolved_value_of_wrong_kind() {
    let obj = counter(1);
    let mut registry = Registry::new();
    registry.insert("thing", Value::Object(obj.clone()));
    let bytes = encode(&Value::Object(obj), &mut DefaultCodec::new(registry)).unwrap();

    let mut other = Registry::new();
    other.insert("thing", Value::Int(5));
    let err = decode(&bytes, &mut DefaultCodec::new(other)).unwrap_err();
    assert!(matches!(err, CodecError::CodecProtocol(_)));
}

#[test]
fn test_unresolved_name() {
    let obj = counter(1);
    let mut registry = Registry::new();
    registry.insert("thing", Value::Object(obj.clone()));
    let bytes = encode(&Value::Object(obj), &mut DefaultCodec::new(registry)).unwrap();
    let err = decode(&bytes, &mut DefaultCodec::new(Registry::new())).unwrap_err();
    assert!(matches!(err, CodecError::Unresolved(_)));
}

#[test]
fn test_canonical_option_equivalent() {
    let v = Value::multiset(vec![Value::Int(2), Value::Int(1)]);
    let a = encode_canonical(&v).unwrap();
    let b = encode_with(&v, &mut DefaultCodec::default(), &EncodeOptions::canonical()).unwrap();
    assert_eq!(a, b);
}

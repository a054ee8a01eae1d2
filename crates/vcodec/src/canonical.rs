//! Total order used by canonical encoding.
//!
//! Only ints, floats and strings are orderable. Values are ranked by kind
//! first (int < float < string), then ints numerically, floats by
//! `f64::total_cmp` and strings by code point sequence.

use std::cmp::Ordering;

use vcodec_core::{Value, ValueKind};

use crate::error::{CodecError, Result};

pub fn is_orderable(v: &Value) -> bool {
    v.kind().is_basic()
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Int(_) => 0,
        Value::Float(_) => 1,
        Value::String(_) => 2,
        _ => 3,
    }
}

/// Compare two orderable values. Non-orderable values sort last, among
/// themselves as equal; callers reject them before sorting.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn require_orderable(v: &Value, container: ValueKind) -> Result<()> {
    if is_orderable(v) {
        Ok(())
    } else {
        Err(CodecError::unsupported(format!(
            "canonical encoding of a {} containing a {}",
            container,
            v.kind()
        )))
    }
}

/// Sort multiset members, failing on any non-orderable member.
pub fn sort_members(members: &mut [Value]) -> Result<()> {
    for m in members.iter() {
        require_orderable(m, ValueKind::Multiset)?;
    }
    members.sort_by(compare);
    Ok(())
}

/// Sort mapping pairs by key, failing on any non-orderable key.
pub fn sort_pairs(pairs: &mut [(Value, Value)]) -> Result<()> {
    for (k, _) in pairs.iter() {
        require_orderable(k, ValueKind::Mapping)?;
    }
    pairs.sort_by(|a, b| compare(&a.0, &b.0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_rank_then_value() {
        let mut v = vec![
            Value::string("b"),
            Value::Float(1.5),
            Value::Int(10),
            Value::string("a"),
            Value::Int(-3),
            Value::Float(-0.0),
            Value::Float(0.0),
        ];
        sort_members(&mut v).unwrap();
        let shown: Vec<String> = v.iter().map(|x| x.to_string()).collect();
        assert_eq!(shown, vec!["-3", "10", "-0.0", "0.0", "1.5", "\"a\"", "\"b\""]);
    }

    #[test]
    fn test_rejects_containers() {
        let mut pairs = vec![(Value::array(vec![]), Value::Int(1))];
        assert!(matches!(sort_pairs(&mut pairs), Err(CodecError::Unsupported(_))));
    }
}

//! Canonical JSON serialization
//!
//! Applies everywhere a body is signed or hashed: JSON with sorted object
//! keys, no insignificant whitespace, numbers in shortest round-trip decimal,
//! UTF-8 bytes. Two structurally equal bodies always canonicalize to the
//! same byte sequence.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("body cannot be canonicalized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize a body to its canonical byte representation.
///
/// The value is round-tripped through `serde_json::Value`, whose object
/// representation is key-sorted, then emitted compactly.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Zebra {
        zulu: u32,
        alpha: &'static str,
    }

    #[test]
    fn test_keys_are_sorted() {
        let bytes = to_canonical_vec(&Zebra {
            zulu: 1,
            alpha: "a",
        })
        .unwrap();
        assert_eq!(bytes, br#"{"alpha":"a","zulu":1}"#);
    }

    #[test]
    fn test_structurally_equal_bodies_are_byte_identical() {
        let a = serde_json::json!({"b": 2, "a": {"y": [1, 2], "x": null}});
        let b = serde_json::json!({"a": {"x": null, "y": [1, 2]}, "b": 2});
        assert_eq!(to_canonical_vec(&a).unwrap(), to_canonical_vec(&b).unwrap());
    }

    #[test]
    fn test_no_insignificant_whitespace() {
        let bytes = to_canonical_vec(&serde_json::json!({"k": [1, 2, 3]})).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains(' '));
        assert!(!text.contains('\n'));
    }
}

//! # fieldcrypt codec
//!
//! Dynamic property values and CBOR serialization for fieldcrypt.
//!
//! Everything fieldcrypt persists on its own (the sealed blob payload,
//! the encrypted-types registry entry, reconciliation queue items) goes
//! through [`to_cbor`] / [`from_cbor`]. Record properties are carried as
//! [`Value`].
//!
//! ## Usage
//!
//! ```
//! use fieldcrypt_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::from("Secret");
//! let bytes = to_cbor(&value).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value as a single CBOR item.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value cannot be represented.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes exactly one CBOR item from `bytes`.
///
/// # Errors
///
/// Returns an error if the input is truncated, malformed, does not match
/// `T`, or has bytes left over after the item.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let mut remaining = bytes;
    let value = ciborium::de::from_reader(&mut remaining).map_err(|e| match e {
        ciborium::de::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            CodecError::UnexpectedEof
        }
        other => CodecError::decoding_failed(other.to_string()),
    })?;
    if !remaining.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: remaining.len(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn nested_payload_roundtrip() {
        let mut props = BTreeMap::new();
        props.insert("value".to_string(), Value::from("Secret"));
        props.insert("format".to_string(), Value::from("basic_html"));
        let mut deltas: BTreeMap<u32, BTreeMap<String, Value>> = BTreeMap::new();
        deltas.insert(0, props.clone());
        deltas.insert(3, props);
        let mut payload = BTreeMap::new();
        payload.insert("body".to_string(), deltas);

        let bytes = to_cbor(&payload).unwrap();
        let decoded: BTreeMap<String, BTreeMap<u32, BTreeMap<String, Value>>> =
            from_cbor(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn distinguishes_scalar_kinds() {
        for v in [
            Value::Null,
            Value::Bool(false),
            Value::Integer(0),
            Value::Float(0.5),
            Value::from(""),
            Value::Bytes(vec![0, 1, 2]),
        ] {
            let back: Value = from_cbor(&to_cbor(&v).unwrap()).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = to_cbor(&Value::from("a longer string")).unwrap();
        let result: CodecResult<Value> = from_cbor(&bytes[..bytes.len() - 2]);
        assert!(result.is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = to_cbor(&Value::Integer(1)).unwrap();
        bytes.push(0x00);
        let result: CodecResult<Value> = from_cbor(&bytes);
        assert!(matches!(result, Err(CodecError::TrailingBytes { count: 1 })));
    }

    #[test]
    fn integer_out_of_range_rejected() {
        let bytes = to_cbor(&u64::MAX).unwrap();
        let result: CodecResult<Value> = from_cbor(&bytes);
        assert!(result.is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e9f64..1.0e9).prop_map(Value::Float),
            ".{0,16}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn value_roundtrip(v in arb_value()) {
            let bytes = to_cbor(&v).unwrap();
            let decoded: Value = from_cbor(&bytes).unwrap();
            prop_assert_eq!(decoded, v);
        }
    }
}

//! Placeholder policy.
//!
//! An encrypted property keeps a stand-in value in ordinary storage so the
//! column stays well-typed and queryable. These functions are pure.

use crate::types::ENCRYPTED_VALUE;
use fieldcrypt_codec::Value;

/// Data types stored as text.
pub const TEXT_DATA_TYPES: &[&str] = &[
    "string",
    "text",
    "email",
    "datetime_iso8601",
    "duration_iso8601",
    "uri",
    "filter_format",
];

/// Data types stored as numbers (booleans included).
pub const NUMERIC_DATA_TYPES: &[&str] = &["integer", "boolean", "float", "decimal"];

/// Field type whose text-typed properties are stored as numbers.
const DECIMAL_FIELD_TYPE: &str = "decimal";

/// Placeholder for a property of `data_type`.
///
/// An override is returned verbatim. Otherwise text types get the lock
/// glyph and numeric types get `0`. Unknown types get `None`: such a
/// property cannot be encrypted without an override.
#[must_use]
pub fn placeholder_for(data_type: &str, override_value: Option<&Value>) -> Option<Value> {
    if let Some(value) = override_value {
        return Some(value.clone());
    }
    if TEXT_DATA_TYPES.contains(&data_type) {
        Some(Value::Text(ENCRYPTED_VALUE.to_string()))
    } else if NUMERIC_DATA_TYPES.contains(&data_type) {
        Some(Value::Integer(0))
    } else {
        None
    }
}

/// Placeholder for a property, taking the owning field type into account.
///
/// Decimal fields may declare their properties as strings while the
/// column is numeric; those get `0` rather than the glyph.
#[must_use]
pub fn placeholder_for_field(
    field_type: &str,
    data_type: &str,
    override_value: Option<&Value>,
) -> Option<Value> {
    if override_value.is_none()
        && field_type == DECIMAL_FIELD_TYPE
        && TEXT_DATA_TYPES.contains(&data_type)
    {
        return Some(Value::Integer(0));
    }
    placeholder_for(data_type, override_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn text_types_get_glyph() {
        for t in TEXT_DATA_TYPES {
            assert_eq!(
                placeholder_for(t, None),
                Some(Value::Text(ENCRYPTED_VALUE.into())),
                "{t}"
            );
        }
    }

    #[test]
    fn numeric_types_get_zero() {
        for t in NUMERIC_DATA_TYPES {
            assert_eq!(placeholder_for(t, None), Some(Value::Integer(0)), "{t}");
        }
    }

    #[test]
    fn override_wins() {
        let o = Value::from("redacted");
        assert_eq!(placeholder_for("string", Some(&o)), Some(o.clone()));
        assert_eq!(placeholder_for("timestamp", Some(&o)), Some(o.clone()));
        assert_eq!(placeholder_for_field("decimal", "string", Some(&o)), Some(o));
    }

    #[test]
    fn unknown_type_has_no_placeholder() {
        assert_eq!(placeholder_for("timestamp", None), None);
        assert_eq!(placeholder_for("map", None), None);
    }

    #[test]
    fn decimal_string_is_numeric() {
        assert_eq!(
            placeholder_for_field("decimal", "string", None),
            Some(Value::Integer(0))
        );
        assert_eq!(
            placeholder_for_field("string", "string", None),
            Some(Value::Text(ENCRYPTED_VALUE.into()))
        );
    }

    #[test]
    fn glyph_fits_short_varchar() {
        // Single character, four UTF-8 bytes.
        assert_eq!(ENCRYPTED_VALUE.chars().count(), 1);
        assert!(ENCRYPTED_VALUE.len() <= 4);
    }

    proptest! {
        #[test]
        fn placeholder_is_well_typed(idx in 0..(TEXT_DATA_TYPES.len() + NUMERIC_DATA_TYPES.len())) {
            let (data_type, text) = if idx < TEXT_DATA_TYPES.len() {
                (TEXT_DATA_TYPES[idx], true)
            } else {
                (NUMERIC_DATA_TYPES[idx - TEXT_DATA_TYPES.len()], false)
            };
            let p = placeholder_for(data_type, None).unwrap();
            if text {
                prop_assert!(p.as_text().is_some_and(|s| !s.is_empty()));
            } else {
                prop_assert_eq!(p.as_integer(), Some(0));
            }
        }

        #[test]
        fn placeholder_never_equals_plausible_secret(secret in "[A-Za-z0-9 ]{1,32}") {
            for t in TEXT_DATA_TYPES {
                prop_assert_ne!(placeholder_for(t, None).unwrap(), Value::Text(secret.clone()));
            }
        }

        #[test]
        fn unknown_types_rejected(t in "[a-z_]{1,20}") {
            prop_assume!(!TEXT_DATA_TYPES.contains(&t.as_str()));
            prop_assume!(!NUMERIC_DATA_TYPES.contains(&t.as_str()));
            prop_assert_eq!(placeholder_for(&t, None), None);
        }
    }
}

//! Property-based test generators using proptest.
//!
//! Secrets are generated so they never collide with a placeholder: text
//! is non-empty and never the lock glyph, integers are never zero.

use fieldcrypt_core::record::{item, FieldItems, PropertyMap};
use fieldcrypt_core::{Record, Value, ENCRYPTED_VALUE};
use proptest::prelude::*;

/// Strategy for secret text values.
pub fn secret_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 _.,!?-]{1,40}")
        .expect("Invalid regex")
        .prop_filter("secret must not look like a placeholder", |s| s != ENCRYPTED_VALUE)
}

/// Strategy for secret integers.
pub fn secret_integer_strategy() -> impl Strategy<Value = i64> {
    any::<i64>().prop_filter("zero is the numeric placeholder", |n| *n != 0)
}

/// Strategy for a multi-valued text field.
pub fn text_items_strategy(max_items: usize) -> impl Strategy<Value = FieldItems> {
    prop::collection::vec(secret_text_strategy().prop_map(|s| item("value", s)), 1..=max_items)
}

/// Strategy for one `text_with_summary` item.
pub fn body_item_strategy() -> impl Strategy<Value = PropertyMap> {
    (secret_text_strategy(), secret_text_strategy()).prop_map(|(value, summary)| {
        let mut map = PropertyMap::new();
        map.insert("value".to_string(), Value::from(value));
        map.insert("summary".to_string(), Value::from(summary));
        map.insert("format".to_string(), Value::from("basic_html"));
        map
    })
}

/// Strategy for unsaved `article` records with every encryptable field
/// filled in.
pub fn article_record_strategy() -> impl Strategy<Value = Record> {
    (
        secret_text_strategy(),
        prop::collection::vec(body_item_strategy(), 1..=2),
        secret_text_strategy(),
        text_items_strategy(4),
        secret_integer_strategy(),
    )
        .prop_map(|(title, body, secret, tags, age)| {
            Record::new("article", "en")
                .with_field("title", vec![item("value", title)])
                .with_field("body", body)
                .with_field("field_secret", vec![item("value", secret)])
                .with_field("field_tags", tags)
                .with_field("field_age", vec![item("value", age)])
        })
}

/// A step of a settings and queue interleaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryStep {
    /// Enable encryption of `field_secret` on the type.
    Encrypt(&'static str),
    /// Disable encryption of `field_secret` on the type.
    Decrypt(&'static str),
    /// Save a new record of the type.
    Save(&'static str),
    /// Process up to this many queue items.
    Process(usize),
    /// Run cleanup.
    Cleanup,
}

/// Strategy for interleavings of settings changes, saves, queue work and
/// cleanup over the `article` and `page` types.
pub fn registry_steps_strategy(max_steps: usize) -> impl Strategy<Value = Vec<RegistryStep>> {
    let record_type = prop_oneof![Just("article"), Just("page")];
    let step = prop_oneof![
        record_type.clone().prop_map(RegistryStep::Encrypt),
        record_type.clone().prop_map(RegistryStep::Decrypt),
        record_type.prop_map(RegistryStep::Save),
        (1usize..4).prop_map(RegistryStep::Process),
        Just(RegistryStep::Cleanup),
    ];
    prop::collection::vec(step, 1..=max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn secrets_are_never_placeholders(text in secret_text_strategy(), n in secret_integer_strategy()) {
            prop_assert!(!text.is_empty());
            prop_assert_ne!(text.as_str(), ENCRYPTED_VALUE);
            prop_assert_ne!(n, 0);
        }

        #[test]
        fn articles_fill_every_field(record in article_record_strategy()) {
            for field in ["title", "body", "field_secret", "field_tags", "field_age"] {
                prop_assert!(record.property(field, 0, "value").is_some());
            }
        }
    }
}

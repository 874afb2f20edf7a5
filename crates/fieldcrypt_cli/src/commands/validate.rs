//! Settings document check.

use fieldcrypt_core::{
    validate_field_setting, Config, CoreError, FieldEncryptionSetting, RecordTypeDefinition, RecordTypeSettings,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A JSON settings document: the global configuration, the record types it
/// applies to, and the field and base-field encryption settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsDocument {
    /// Global configuration.
    pub config: Config,
    /// Record type definitions.
    pub record_types: Vec<RecordTypeDefinition>,
    /// Record type to configurable field to setting.
    pub fields: BTreeMap<String, BTreeMap<String, FieldEncryptionSetting>>,
    /// Record type to base-field settings.
    pub base_fields: BTreeMap<String, RecordTypeSettings>,
}

impl SettingsDocument {
    /// Parses a document from JSON.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every configuration error in the document.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(err) = self.config.validate() {
            problems.push(err.to_string());
        }

        let definitions: BTreeMap<&str, &RecordTypeDefinition> =
            self.record_types.iter().map(|d| (d.id.as_str(), d)).collect();
        let settings = self
            .fields
            .iter()
            .flat_map(|(t, fields)| fields.iter().map(move |(f, s)| (t, f, s, false)))
            .chain(
                self.base_fields
                    .iter()
                    .flat_map(|(t, s)| s.base_fields.iter().map(move |(f, s)| (t, f, s, true))),
            );

        for (record_type, field, setting, base_field) in settings {
            let Some(definition) = definitions.get(record_type.as_str()) else {
                problems.push(CoreError::record_type_not_found(record_type).to_string());
                continue;
            };
            let Some(field_definition) = definition.get_field(field) else {
                problems.push(
                    CoreError::FieldNotFound {
                        record_type: record_type.clone(),
                        field: field.clone(),
                    }
                    .to_string(),
                );
                continue;
            };
            if field_definition.base_field != base_field {
                let expected = if base_field { "fields" } else { "base_fields" };
                problems.push(format!("{record_type}.{field} belongs under {expected}"));
                continue;
            }
            if let Err(err) = validate_field_setting(record_type, field_definition, setting, &self.config) {
                problems.push(err.to_string());
            }
        }
        problems
    }
}

/// Runs the validate command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let document = SettingsDocument::load(path)?;
    let config = &document.config;
    match config.default_profile() {
        Some(profile) => println!("Default encryption profile: {profile}"),
        None => println!("No default encryption profile"),
    }
    println!("Batch size: {}", config.batch_size);
    println!("Claim lease: {}s", config.claim_lease_secs);
    println!("Record types: {}", document.record_types.len());

    let problems = document.problems();
    println!();
    if problems.is_empty() {
        println!("✓ Settings are valid");
        Ok(())
    } else {
        for problem in &problems {
            println!("  {problem}");
        }
        println!("✗ {} problem(s) found", problems.len());
        Err("Validation failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TYPES: &str = r#"
        "record_types": [{
            "id": "article",
            "label": "Article",
            "fields": {
                "title": {"name": "title", "field_type": "string", "base_field": true, "properties": {"value": "string"}},
                "field_file": {"name": "field_file", "field_type": "file", "properties": {"data": "binary"}}
            }
        }]"#;

    fn load(contents: &str) -> SettingsDocument {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fieldcrypt.json");
        std::fs::write(&path, contents).unwrap();
        SettingsDocument::load(&path).unwrap()
    }

    #[test]
    fn valid_document() {
        let document = load(&format!(
            r#"{{
                "config": {{"encryption_profile": "primary"}},
                {TYPES},
                "base_fields": {{"article": {{"base_fields": {{"title": {{"encrypted": true, "properties": ["value"]}}}}}}}},
                "fields": {{"article": {{"field_file": {{"encrypted": true, "properties": ["data"], "placeholder_overrides": {{"data": ""}}}}}}}}
            }}"#
        ));
        assert_eq!(document.config.batch_size, 5);
        assert!(document.problems().is_empty(), "{:?}", document.problems());
    }

    #[test]
    fn every_problem_is_reported() {
        let document = load(&format!(
            r#"{{
                "config": {{"batch_size": 0}},
                {TYPES},
                "fields": {{
                    "article": {{
                        "field_file": {{"encrypted": true, "properties": ["data"]}},
                        "title": {{"encrypted": true, "properties": ["value"]}},
                        "field_gone": {{"encrypted": true, "properties": ["value"]}}
                    }},
                    "page": {{"field_secret": {{"encrypted": true, "properties": ["value"]}}}}
                }}
            }}"#
        ));
        let problems = document.problems();
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("batch_size")));
        assert!(problems.iter().any(|p| p.contains("belongs under base_fields")));
        assert!(problems.iter().any(|p| p.contains("article.field_gone")));
        assert!(problems.iter().any(|p| p.contains("page")));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fieldcrypt.json");
        std::fs::write(&path, "{").unwrap();
        assert!(SettingsDocument::load(&path).is_err());
    }
}

//! Blob field definition and schema change planning.
//!
//! Deciding what to install or remove is pure and lives here; applying a
//! [`SchemaPlan`] is done by the state manager.

use crate::types::ENCRYPTED_FIELD_STORAGE_NAME;
use std::collections::BTreeSet;

/// Physical column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Large binary / text.
    BigBinary,
    /// ASCII string with a maximum length.
    Ascii {
        /// Maximum length in bytes.
        max_length: u16,
    },
}

/// A physical column of the blob field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobColumn {
    /// Column name.
    pub name: &'static str,
    /// Storage kind.
    pub kind: ColumnKind,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

/// Definition of the hidden blob field installed on encrypted types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFieldDefinition {
    /// Field name.
    pub name: &'static str,
    /// Label shown in schema tooling.
    pub label: &'static str,
    /// Not exposed through forms, views or APIs.
    pub internal: bool,
    /// One value per translation.
    pub translatable: bool,
    /// One value per revision.
    pub revisionable: bool,
    /// Physical columns.
    pub columns: Vec<BlobColumn>,
}

impl BlobFieldDefinition {
    /// The blob field: ciphertext and profile id, per revision and translation.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            name: ENCRYPTED_FIELD_STORAGE_NAME,
            label: "Encrypted data",
            internal: true,
            translatable: true,
            revisionable: true,
            columns: vec![
                BlobColumn {
                    name: "value",
                    kind: ColumnKind::BigBinary,
                    nullable: true,
                },
                BlobColumn {
                    name: "encryption_profile",
                    kind: ColumnKind::Ascii { max_length: 255 },
                    nullable: true,
                },
            ],
        }
    }
}

/// Schema and registry changes to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaPlan {
    /// Types that get the blob field.
    pub install: BTreeSet<String>,
    /// Types that lose the blob field.
    pub uninstall: BTreeSet<String>,
    /// Registry contents after the plan.
    pub registry: BTreeSet<String>,
    /// Types whose cache flags must be recomputed.
    pub cache_refresh: BTreeSet<String>,
    /// Removals held back because reconciliation work is pending.
    pub deferred: BTreeSet<String>,
}

impl SchemaPlan {
    /// Whether applying the plan would change nothing.
    #[must_use]
    pub fn is_noop(&self, current: &BTreeSet<String>) -> bool {
        self.install.is_empty()
            && self.uninstall.is_empty()
            && self.cache_refresh.is_empty()
            && &self.registry == current
    }
}

/// Plan for a settings change.
///
/// Installs the field on newly required types and merges them into the
/// registry. Types no longer required stay registered: queued items may
/// still need their ciphertext. Returns `None` when `current == required`.
#[must_use]
pub fn plan_update(current: &BTreeSet<String>, required: &BTreeSet<String>) -> Option<SchemaPlan> {
    if current == required {
        return None;
    }
    Some(SchemaPlan {
        install: required.difference(current).cloned().collect(),
        uninstall: BTreeSet::new(),
        registry: current.union(required).cloned().collect(),
        cache_refresh: required.clone(),
        deferred: BTreeSet::new(),
    })
}

/// Plan for removing blob fields that are no longer needed.
///
/// With `pending_items > 0` nothing is removed and the candidates are
/// reported as deferred. Otherwise every registered type outside
/// `required` is uninstalled and the registry shrinks to
/// `current ∩ required`. Uninstalled types get their cache flags back.
#[must_use]
pub fn plan_cleanup(
    current: &BTreeSet<String>,
    required: &BTreeSet<String>,
    pending_items: usize,
) -> SchemaPlan {
    let removable: BTreeSet<String> = current.difference(required).cloned().collect();
    if pending_items > 0 {
        return SchemaPlan {
            registry: current.clone(),
            deferred: removable,
            ..SchemaPlan::default()
        };
    }
    SchemaPlan {
        uninstall: removable.clone(),
        registry: current.intersection(required).cloned().collect(),
        cache_refresh: removable,
        ..SchemaPlan::default()
    }
}

/// Left-outer join of two record sets on a shared linking key.
///
/// Used to attach National Inventory of Dams rows (dam coordinates, surface
/// area) to usace_rez reservoir rows through their common `NIDID`.
///
/// Rules:
/// - Keys are normalized by `model::normalize_key` on both sides.
/// - Empty or missing keys never match, on either side.
/// - Among secondary records sharing a key, the first one wins; later ones
///   are counted and discarded, never merged.
/// - The output holds exactly one row per primary record, in primary order.

use std::collections::HashMap;

use serde_json::Value;

use crate::model::EntityRecord;

// ---------------------------------------------------------------------------
// Key index
// ---------------------------------------------------------------------------

/// Lookup from normalized key to the first secondary record carrying it.
#[derive(Debug)]
pub struct KeyIndex<'a> {
    by_key: HashMap<String, &'a EntityRecord>,
    duplicates: usize,
    unkeyed: usize,
}

impl<'a> KeyIndex<'a> {
    pub fn build(records: &'a [EntityRecord], key_field: &str) -> Self {
        let mut by_key = HashMap::new();
        let mut duplicates = 0;
        let mut unkeyed = 0;

        for record in records {
            match record.key(key_field) {
                None => unkeyed += 1,
                Some(key) => {
                    if by_key.contains_key(&key) {
                        duplicates += 1;
                    } else {
                        by_key.insert(key, record);
                    }
                }
            }
        }

        if duplicates > 0 {
            log::warn!(
                "{} secondary records share a {} already seen; first occurrence kept",
                duplicates,
                key_field
            );
        }

        if unkeyed > 0 {
            log::info!("{} secondary records have no {}; they never match", unkeyed, key_field);
        }

        KeyIndex { by_key, duplicates, unkeyed }
    }

    pub fn get(&self, key: &str) -> Option<&'a EntityRecord> {
        self.by_key.get(key).copied()
    }

    /// Distinct keys registered.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Secondary records dropped because their key was already registered.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Secondary records with no usable key.
    pub fn unkeyed(&self) -> usize {
        self.unkeyed
    }
}

// ---------------------------------------------------------------------------
// Joined rows
// ---------------------------------------------------------------------------

/// Where a joined record's short code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    /// Looked up in the configured name → code table
    Table,
    /// Inferred by the code matcher, exact tier
    InferredExact,
    /// Inferred by the code matcher, prefix tier
    InferredPrefix,
}

impl CodeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeSource::Table => "mapped",
            CodeSource::InferredExact => "inferred-exact",
            CodeSource::InferredPrefix => "inferred-prefix",
        }
    }
}

/// A primary record, its linked secondary record (if any), and a code.
#[derive(Debug, Clone)]
pub struct JoinedRecord<'a> {
    pub primary: &'a EntityRecord,
    pub secondary: Option<&'a EntityRecord>,
    /// The normalized key the primary record was joined on
    pub key: Option<String>,
    pub code: Option<(String, CodeSource)>,
}

impl<'a> JoinedRecord<'a> {
    /// Primary-side field.
    pub fn primary_field(&self, field: &str) -> Option<&'a Value> {
        self.primary.get(field)
    }

    /// Secondary-side field; `None` for every field when unmatched.
    pub fn secondary_field(&self, field: &str) -> Option<&'a Value> {
        self.secondary.and_then(|s| s.get(field))
    }

    pub fn is_matched(&self) -> bool {
        self.secondary.is_some()
    }

    /// Returns a copy of this row carrying `code`.
    pub fn with_code(self, code: String, source: CodeSource) -> Self {
        JoinedRecord { code: Some((code, source)), ..self }
    }
}

/// Left-outer joins `primary` to `secondary`.
pub fn left_join<'a>(
    primary: &'a [EntityRecord],
    primary_key: &str,
    secondary: &'a [EntityRecord],
    secondary_key: &str,
) -> Vec<JoinedRecord<'a>> {
    let index = KeyIndex::build(secondary, secondary_key);
    join_with_index(primary, primary_key, &index)
}

/// Left-outer joins `primary` against a prebuilt index.
pub fn join_with_index<'a>(
    primary: &'a [EntityRecord],
    primary_key: &str,
    index: &KeyIndex<'a>,
) -> Vec<JoinedRecord<'a>> {
    primary
        .iter()
        .map(|record| {
            let key = record.key(primary_key);
            let secondary = key.as_deref().and_then(|k| index.get(k));
            JoinedRecord { primary: record, secondary, key, code: None }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

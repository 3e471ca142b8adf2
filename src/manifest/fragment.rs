// src/manifest/fragment.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Manifest record for one asset name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Hashed file names this asset statically imports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports: Option<Vec<String>>,
    /// Minified source embedded instead of referenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
}

impl Fragment {
    pub fn hashed(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Self::default()
        }
    }

    /// Overwrite the fields that `other` sets.
    pub fn merge(&mut self, other: &Fragment) {
        if let Some(hash) = &other.hash {
            self.hash = Some(hash.clone());
        }
        if let Some(imports) = &other.imports {
            self.imports = Some(imports.clone());
        }
        if let Some(inline) = &other.inline {
            self.inline = Some(inline.clone());
        }
    }

    /// Merging `other` into `self` would change nothing.
    pub fn contains(&self, other: &Fragment) -> bool {
        fn field<T: PartialEq>(mine: &Option<T>, theirs: &Option<T>) -> bool {
            theirs.is_none() || mine == theirs
        }
        field(&self.hash, &other.hash)
            && field(&self.imports, &other.imports)
            && field(&self.inline, &other.inline)
    }
}

/// Name -> fragment, kept sorted by name.
pub type FragmentTable = BTreeMap<String, Fragment>;

/// Every entry of `update` is already present in `table` with the same
/// values.
pub fn table_contains(table: &FragmentTable, update: &FragmentTable) -> bool {
    update
        .iter()
        .all(|(name, frag)| table.get(name).is_some_and(|have| have.contains(frag)))
}

/// Deep-merge `update` into `table`.
pub fn merge_into(table: &mut FragmentTable, update: &FragmentTable) {
    for (name, frag) in update {
        table.entry(name.clone()).or_default().merge(frag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_only_set_fields() {
        let mut frag = Fragment {
            hash: Some("AAAA".into()),
            imports: Some(vec!["common.X.js".into()]),
            inline: None,
        };
        frag.merge(&Fragment {
            inline: Some("code".into()),
            ..Fragment::default()
        });
        assert_eq!(frag.hash.as_deref(), Some("AAAA"));
        assert_eq!(frag.inline.as_deref(), Some("code"));
        assert!(frag.imports.is_some());
    }

    #[test]
    fn containment_ignores_unset_fields() {
        let table: FragmentTable =
            [("site".to_string(), Fragment::hashed("H1"))].into_iter().collect();
        let same: FragmentTable = [("site".to_string(), Fragment::default())]
            .into_iter()
            .collect();
        let other: FragmentTable =
            [("site".to_string(), Fragment::hashed("H2"))].into_iter().collect();

        assert!(table_contains(&table, &same));
        assert!(!table_contains(&table, &other));
        assert!(table_contains(&table, &FragmentTable::new()));
    }

    #[test]
    fn serializes_without_unset_fields() {
        let json = serde_json::to_string(&Fragment::hashed("ABCD1234")).unwrap();
        assert_eq!(json, r#"{"hash":"ABCD1234"}"#);
    }
}

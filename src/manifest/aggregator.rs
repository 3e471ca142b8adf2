// src/manifest/aggregator.rs

use std::fmt;

use crate::manifest::fragment::{merge_into, table_contains, FragmentTable};

/// The four fragment tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Js,
    Css,
    Hashed,
    I18n,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Js => "js",
            Category::Css => "css",
            Category::Hashed => "hashed",
            Category::I18n => "i18n",
        })
    }
}

/// Why a manifest cannot be published yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incomplete {
    /// Only part of the workspace is being built.
    PartialBuild,
    /// A declared bundle module has no script entry.
    Script(String),
    /// A style source has no style entry.
    Style(String),
    /// No localization entry yet.
    Localization,
}

impl fmt::Display for Incomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incomplete::PartialBuild => f.write_str("not every package is building"),
            Incomplete::Script(name) => write!(f, "No manifest without building '{name}.ts'"),
            Incomplete::Style(name) => write!(f, "No manifest without building '{name}.scss'"),
            Incomplete::Localization => f.write_str("no localization entries yet"),
        }
    }
}

/// Accumulated manifest state plus the dirty flag.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ManifestTables {
    pub js: FragmentTable,
    pub css: FragmentTable,
    pub hashed: FragmentTable,
    pub i18n: FragmentTable,
    dirty: bool,
}

impl ManifestTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, category: Category) -> &FragmentTable {
        match category {
            Category::Js => &self.js,
            Category::Css => &self.css,
            Category::Hashed => &self.hashed,
            Category::I18n => &self.i18n,
        }
    }

    fn table_mut(&mut self, category: Category) -> &mut FragmentTable {
        match category {
            Category::Js => &mut self.js,
            Category::Css => &mut self.css,
            Category::Hashed => &mut self.hashed,
            Category::I18n => &mut self.i18n,
        }
    }

    /// Apply one category update.
    ///
    /// With `merge` the fragments are deep-merged unless already contained;
    /// otherwise the table is replaced unless it is already equal. Returns
    /// whether anything changed; a change marks the tables dirty.
    pub fn update(&mut self, category: Category, update: &FragmentTable, merge: bool) -> bool {
        let table = self.table_mut(category);
        let changed = if merge {
            if table_contains(table, update) {
                false
            } else {
                merge_into(table, update);
                true
            }
        } else if table == update {
            false
        } else {
            *table = update.clone();
            true
        };
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Check that every expected asset has an entry.
    ///
    /// `scripts` are bundle module names (file stem without `.ts`), `styles`
    /// style source names (stem without `.scss`).
    pub fn check_complete<'a>(
        &self,
        building: usize,
        packages: usize,
        scripts: impl IntoIterator<Item = &'a str>,
        styles: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), Incomplete> {
        if building < packages {
            return Err(Incomplete::PartialBuild);
        }
        for name in scripts {
            if !self.js.contains_key(name) {
                return Err(Incomplete::Script(name.to_string()));
            }
        }
        for name in styles {
            if !self.css.contains_key(name) {
                return Err(Incomplete::Style(name.to_string()));
            }
        }
        if self.i18n.is_empty() {
            return Err(Incomplete::Localization);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::fragment::Fragment;

    fn table(entries: &[(&str, &str)]) -> FragmentTable {
        entries
            .iter()
            .map(|(k, h)| (k.to_string(), Fragment::hashed(*h)))
            .collect()
    }

    #[test]
    fn replace_is_skipped_when_equal() {
        let mut m = ManifestTables::new();
        assert!(m.update(Category::Css, &table(&[("site", "A")]), false));
        m.mark_clean();
        assert!(!m.update(Category::Css, &table(&[("site", "A")]), false));
        assert!(!m.is_dirty());
        assert!(m.update(Category::Css, &table(&[("lobby", "B")]), false));
        assert_eq!(m.css.len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut m = ManifestTables::new();
        let update = table(&[("site", "A"), ("lobby", "B")]);
        assert!(m.update(Category::Js, &update, true));
        let snapshot = m.clone();
        m.mark_clean();
        assert!(!m.update(Category::Js, &update, true));
        assert_eq!(m.js, snapshot.js);
        assert!(!m.is_dirty());
    }

    #[test]
    fn keys_stay_sorted() {
        let mut m = ManifestTables::new();
        m.update(Category::Hashed, &table(&[("z.woff2", "1")]), true);
        m.update(Category::Hashed, &table(&[("a.woff2", "2")]), true);
        let keys: Vec<&String> = m.hashed.keys().collect();
        assert_eq!(keys, ["a.woff2", "z.woff2"]);
    }

    #[test]
    fn completeness_requires_every_declared_module() {
        let mut m = ManifestTables::new();
        m.update(Category::Js, &table(&[("site", "A")]), true);
        m.update(Category::Css, &table(&[("site", "C")]), true);
        m.update(Category::I18n, &table(&[("i18n/en", "E")]), true);

        assert_eq!(m.check_complete(2, 2, ["site"], ["site"]), Ok(()));
        assert_eq!(
            m.check_complete(2, 2, ["site", "lobby"], ["site"]),
            Err(Incomplete::Script("lobby".into()))
        );
        assert_eq!(
            m.check_complete(1, 2, ["site"], ["site"]),
            Err(Incomplete::PartialBuild)
        );
    }
}

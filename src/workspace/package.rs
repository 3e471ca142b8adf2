// src/workspace/package.rs

//! A single workspace package and its `build` declaration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{BuildError, Result};

/// Name of the declaration file at each package root.
pub const DECLARATION_FILE: &str = "package.json";

/// A script entry point declared under `build.bundle`.
///
/// At least one of `module` / `inline` is always set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Bundler entry point (glob relative to the package root).
    pub module: Option<String>,
    /// Source compiled to text and embedded in the manifest.
    pub inline: Option<String>,
}

/// An output glob declared under `build.hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    /// Glob relative to the output directory.
    pub glob: String,
    /// Text file (relative to the package root) whose references to the
    /// matched files get rewritten to their hashed names.
    pub update: Option<String>,
}

/// A `source -> destination` copy declared under `build.sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    /// File or glob relative to the package root; `<dir>/**` syncs a tree.
    pub src: String,
    /// Destination relative to the repository root.
    pub dest: String,
}

#[derive(Debug, Clone)]
pub struct Package {
    /// Directory name of the package root.
    pub name: String,
    pub root: PathBuf,
    /// The whole parsed declaration.
    pub raw: Value,
    pub bundle: Vec<BundleEntry>,
    pub hash: Vec<HashEntry>,
    pub sync: Vec<SyncEntry>,
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Package {}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBundle {
    Module(String),
    Entry {
        #[serde(default)]
        module: Option<String>,
        #[serde(default)]
        inline: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHash {
    Glob(String),
    Entry {
        glob: String,
        #[serde(default)]
        update: Option<String>,
    },
}

#[derive(Deserialize, Default)]
struct RawBuild {
    #[serde(default)]
    bundle: Option<OneOrMany<RawBundle>>,
    #[serde(default)]
    hash: Option<OneOrMany<RawHash>>,
    #[serde(default)]
    sync: Map<String, Value>,
}

impl Package {
    /// Parse the declaration text of the package rooted at `root`.
    pub fn parse(root: &Path, text: &str) -> Result<Self> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BuildError::Config(format!("package root {:?} has no name", root)))?;

        let raw: Value = serde_json::from_str(text).map_err(|e| {
            BuildError::Config(format!("malformed {DECLARATION_FILE} in '{name}': {e}"))
        })?;

        let build: RawBuild = match raw.get("build") {
            Some(value) => RawBuild::deserialize(value).map_err(|e| {
                BuildError::Config(format!("malformed `build` section in '{name}': {e}"))
            })?,
            None => RawBuild::default(),
        };

        let bundle = build
            .bundle
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|b| match b {
                RawBundle::Module(module) => BundleEntry {
                    module: Some(module),
                    inline: None,
                },
                RawBundle::Entry { module, inline } => BundleEntry { module, inline },
            })
            .filter(|b| b.module.is_some() || b.inline.is_some())
            .collect();

        let hash = build
            .hash
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|h| match h {
                RawHash::Glob(glob) => HashEntry { glob, update: None },
                RawHash::Entry { glob, update } => HashEntry { glob, update },
            })
            .collect();

        let mut sync = Vec::with_capacity(build.sync.len());
        for (src, dest) in build.sync {
            let Value::String(dest) = dest else {
                return Err(BuildError::Config(format!(
                    "sync destination for '{src}' in '{name}' must be a string"
                )));
            };
            sync.push(SyncEntry { src, dest });
        }

        Ok(Self {
            name,
            root: root.to_path_buf(),
            raw,
            bundle,
            hash,
            sync,
        })
    }

    /// Names under `dependencies`, in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.raw
            .get("dependencies")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|deps| deps.keys().map(String::as_str))
    }

    /// Bundler entry points declared by this package.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.bundle.iter().filter_map(|b| b.module.as_deref())
    }

    /// Inline sources declared by this package.
    pub fn inlines(&self) -> impl Iterator<Item = &str> {
        self.bundle.iter().filter_map(|b| b.inline.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_single_and_list_forms() {
        let text = r#"{
            "name": "site",
            "dependencies": { "common": "workspace:*", "chart.js": "^4" },
            "build": {
                "bundle": ["src/site.ts", { "inline": "src/site.inline.ts" }, {}],
                "hash": "font/*.woff2",
                "sync": { "node_modules/x/dist/**": "public/x", "b.js": "public/b.js" }
            }
        }"#;
        let pkg = Package::parse(Path::new("/ws/ui/site"), text).unwrap();

        assert_eq!(pkg.name, "site");
        assert_eq!(pkg.bundle.len(), 2);
        assert_eq!(pkg.bundle[0].module.as_deref(), Some("src/site.ts"));
        assert_eq!(pkg.bundle[1].inline.as_deref(), Some("src/site.inline.ts"));
        assert_eq!(
            pkg.hash,
            vec![HashEntry {
                glob: "font/*.woff2".into(),
                update: None
            }]
        );
        assert_eq!(pkg.sync[0].src, "node_modules/x/dist/**");
        assert_eq!(pkg.sync[1].dest, "public/b.js");
        assert_eq!(
            pkg.dependency_names().collect::<Vec<_>>(),
            vec!["common", "chart.js"]
        );
    }

    #[test]
    fn package_without_build_section_is_empty() {
        let pkg = Package::parse(Path::new("/ws/ui/base"), r#"{"name":"base"}"#).unwrap();
        assert!(pkg.bundle.is_empty() && pkg.hash.is_empty() && pkg.sync.is_empty());
    }

    #[test]
    fn malformed_declaration_is_a_config_error() {
        let err = Package::parse(Path::new("/ws/ui/bad"), r#"{"build": {"hash": 3}}"#)
            .unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }
}

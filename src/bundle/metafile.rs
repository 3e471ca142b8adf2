// src/bundle/metafile.rs

//! Build metadata as written by the bundler, and its conversion into the
//! `js` manifest table.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::manifest::{Fragment, FragmentTable};
use crate::watch::path_utils::relative_str;

/// `<name>.<HASH>.js`, with `name` possibly containing `/`.
static HASHED_OUTPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\.([A-Z0-9]+)\.js$").expect("valid regex"));

/// Name of the shared chunk emitted by code splitting.
pub const COMMON_CHUNK: &str = "common";

const STATIC_IMPORT: &str = "import-statement";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metafile {
    /// Source files, relative to the bundler's working directory.
    #[serde(default)]
    pub inputs: BTreeMap<String, IgnoredAny>,
    /// Emitted files, relative to the bundler's working directory.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputFile {
    #[serde(default)]
    pub imports: Vec<ImportRecord>,
    #[serde(default, rename = "entryPoint")]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportRecord {
    pub path: String,
    pub kind: String,
}

impl Metafile {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Workspace sources that went into the build. Dependencies from
    /// `node_modules` and virtual modules are left out.
    pub fn source_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .keys()
            .map(String::as_str)
            .filter(|p| !p.contains("node_modules/") && !p.contains(':') && !p.starts_with('<'))
    }

    /// Manifest fragments for every hashed script below `js_out`.
    ///
    /// Entry chunks are keyed by their name and carry their hash. The shared
    /// chunk is keyed `common.<hash>` and carries none. Every fragment lists
    /// its static imports as hashed file names.
    pub fn fragments(&self, root: &Path, js_out: &Path) -> FragmentTable {
        let prefix = relative_str(root, js_out).unwrap_or_default();
        let mut table = FragmentTable::new();

        for (path, output) in &self.outputs {
            let Some((name, hash)) = split_output(&prefix, path) else {
                continue;
            };
            let imports = output
                .imports
                .iter()
                .filter(|i| i.kind == STATIC_IMPORT)
                .filter_map(|i| split_output(&prefix, &i.path))
                .map(|(name, hash)| format!("{name}.{hash}.js"))
                .collect();

            let (key, hash) = if name == COMMON_CHUNK {
                (format!("{name}.{hash}"), None)
            } else {
                (name, Some(hash))
            };
            table.insert(
                key,
                Fragment {
                    hash,
                    imports: Some(imports),
                    inline: None,
                },
            );
        }
        table
    }
}

/// Split an output path below `prefix` into `(name, hash)`.
pub fn split_output(prefix: &str, path: &str) -> Option<(String, String)> {
    let rel = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let caps = HASHED_OUTPUT.captures(rel)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = r#"{
      "inputs": {
        "ui/site/src/site.ts": {"bytes": 10, "imports": []},
        "ui/lib/src/util.ts": {"bytes": 5, "imports": []},
        "node_modules/dep/index.js": {"bytes": 1, "imports": []}
      },
      "outputs": {
        "public/compiled/site.AB12CD34.js": {
          "imports": [
            {"path": "public/compiled/common.ZZ99YY88.js", "kind": "import-statement"},
            {"path": "public/compiled/lazy.QQ11QQ11.js", "kind": "dynamic-import"}
          ],
          "entryPoint": "ui/site/src/site.ts"
        },
        "public/compiled/site.AB12CD34.js.map": {"imports": []},
        "public/compiled/common.ZZ99YY88.js": {"imports": []}
      }
    }"#;

    #[test]
    fn entry_and_common_chunks_become_fragments() {
        let meta = Metafile::parse(META).unwrap();
        let table = meta.fragments(Path::new("/repo"), Path::new("/repo/public/compiled"));

        assert_eq!(table.len(), 2);
        let site = &table["site"];
        assert_eq!(site.hash.as_deref(), Some("AB12CD34"));
        assert_eq!(
            site.imports.as_deref(),
            Some(&["common.ZZ99YY88.js".to_string()][..])
        );

        let common = &table["common.ZZ99YY88"];
        assert_eq!(common.hash, None);
        assert_eq!(common.imports.as_deref(), Some(&[][..]));
    }

    #[test]
    fn source_inputs_skip_dependencies() {
        let meta = Metafile::parse(META).unwrap();
        let inputs: Vec<&str> = meta.source_inputs().collect();
        assert_eq!(inputs, ["ui/lib/src/util.ts", "ui/site/src/site.ts"]);
    }

    #[test]
    fn split_output_keeps_subdirectories() {
        assert_eq!(
            split_output("public/compiled", "public/compiled/lib/foo.ABC.js"),
            Some(("lib/foo".to_string(), "ABC".to_string()))
        );
        assert_eq!(split_output("public/compiled", "public/other/foo.ABC.js"), None);
        assert_eq!(split_output("public/compiled", "public/compiled/foo.abc.js"), None);
    }
}

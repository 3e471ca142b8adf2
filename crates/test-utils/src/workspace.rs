use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

/// Writes a throw-away workspace (`<root>/ui/<pkg>/package.json`, sources,
/// locale scripts) into a temp dir.
///
/// ```ignore
/// let ws = WorkspaceBuilder::new()
///     .package("base", json!({}))
///     .package("app", json!({"dependencies": {"base": "*"}, "build": {"bundle": "src/main.ts"}}))
///     .file("ui/app/src/main.ts", "export {};")
///     .build();
/// ```
pub struct WorkspaceBuilder {
    files: Vec<(PathBuf, String)>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// A package declaration at `ui/<name>/package.json`.
    pub fn package(self, name: &str, declaration: Value) -> Self {
        let mut declaration = declaration;
        if let Value::Object(map) = &mut declaration {
            map.entry("name").or_insert_with(|| json!(name));
        }
        let text = serde_json::to_string_pretty(&declaration).expect("declaration serializes");
        self.file(format!("ui/{name}/package.json"), text)
    }

    /// A minimal `tsconfig.json` for package `name`.
    pub fn tsconfig(self, name: &str) -> Self {
        let text = json!({
            "compilerOptions": {"strict": true, "outDir": "dist"},
            "include": ["src"]
        });
        self.file(format!("ui/{name}/tsconfig.json"), text.to_string())
    }

    /// A compiled locale script under `translation/js`.
    pub fn locale(self, locale: &str) -> Self {
        self.file(
            format!("translation/js/{locale}.js"),
            format!("window.i18n = {{ locale: '{locale}' }};"),
        )
    }

    /// Any file, relative to the workspace root.
    pub fn file(mut self, rel: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.push((rel.into(), contents.into()));
        self
    }

    pub fn build(self) -> Workspace {
        let dir = tempfile::tempdir().expect("create temp dir");
        for (rel, contents) in &self.files {
            write(dir.path(), rel, contents);
        }
        std::fs::create_dir_all(dir.path().join("ui")).expect("create ui dir");
        Workspace { dir }
    }
}

impl Default for WorkspaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A workspace on disk; removed when dropped.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: impl AsRef<Path>, contents: &str) {
        write(self.dir.path(), rel.as_ref(), contents);
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read workspace file")
    }

    /// File names (not paths) in `rel`, sorted. Empty when missing.
    pub fn list(&self, rel: impl AsRef<Path>) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.path(rel)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn write(root: &Path, rel: &Path, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, contents).expect("write workspace file");
}

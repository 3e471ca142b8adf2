// src/typecheck/split.rs

//! Derivation of the fast (declarations only) and full (diagnostics only)
//! compiler configurations of a package.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::fs::{folder_size, FileSystem};
use crate::types::PassKind;

/// Compiler options holding a single path relative to the config file.
const PATH_OPTIONS: &[&str] = &["baseUrl", "declarationDir", "outDir", "outFile", "rootDir"];
/// Compiler options holding a list of such paths.
const PATH_LIST_OPTIONS: &[&str] = &["rootDirs", "typeRoots"];

/// One derived configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitConfig {
    pub kind: PassKind,
    pub config_file: PathBuf,
    pub pkg_name: String,
    /// Source bytes, used for load balancing only.
    pub size: u64,
}

/// Inputs of [`split_config`] besides the file itself.
#[derive(Debug, Clone)]
pub struct SplitOptions<'a> {
    pub pkg_name: &'a str,
    /// Direct workspace dependencies of the package.
    pub workspace_deps: &'a [String],
    pub build_temp: &'a Path,
    /// Also check the package's `tests` directory.
    pub test: bool,
}

/// Path of the derived config of `pkg` for pass `kind`.
pub fn config_path(build_temp: &Path, kind: PassKind, pkg: &str) -> PathBuf {
    build_temp
        .join(kind.dir_name())
        .join(format!("{pkg}.tsconfig.json"))
}

fn build_info_path(build_temp: &Path, kind: PassKind, pkg: &str) -> PathBuf {
    build_temp
        .join(kind.dir_name())
        .join(format!("{pkg}.tsbuildinfo"))
}

/// Strip `//` and `/* */` comments and trailing commas outside of strings.
pub fn strip_jsonc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            ',' => {
                let rest: String = chars.clone().collect();
                let following = rest.trim_start().chars().next();
                if !matches!(following, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn resolve(root: &Path, value: &str) -> String {
    root.join(value.replace("${configDir}", "."))
        .to_string_lossy()
        .into_owned()
}

fn resolve_list(root: &Path, list: &[Value], keep: impl Fn(&str) -> bool) -> Vec<Value> {
    list.iter()
        .filter_map(Value::as_str)
        .filter(|s| keep(s))
        .map(|s| Value::String(resolve(root, s)))
        .collect()
}

/// Normalize the compiler options of the config at `root`.
fn normalize_options(root: &Path, options: &mut Map<String, Value>) {
    for key in PATH_OPTIONS {
        if let Some(Value::String(path)) = options.get(*key) {
            let resolved = resolve(root, path);
            options.insert(key.to_string(), Value::String(resolved));
        }
    }
    for key in PATH_LIST_OPTIONS {
        if let Some(Value::Array(list)) = options.get(*key) {
            let resolved = resolve_list(root, list, |_| true);
            options.insert(key.to_string(), Value::Array(resolved));
        }
    }
    if let Some(Value::Array(libs)) = options.get_mut("lib") {
        for lib in libs.iter_mut() {
            if let Some(name) = lib.as_str() {
                let lower = name.to_lowercase();
                if let Some(short) = lower.strip_prefix("lib.").and_then(|l| l.split('.').next()) {
                    *lib = Value::String(short.to_string());
                }
            }
        }
    }
    options.insert("incremental".to_string(), Value::Bool(true));
}

/// Derive the split configs of the package whose `tsconfig.json` is at
/// `cfg_path`, write them under the build-temp dir and return them.
///
/// A package whose own options already disable emission gets no fast pass.
pub fn split_config(fs: &dyn FileSystem, cfg_path: &Path, opts: &SplitOptions<'_>) -> Result<Vec<SplitConfig>> {
    let root = cfg_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let text = fs.read_to_string(cfg_path)?;
    let mut config: Map<String, Value> = serde_json::from_str(&strip_jsonc(&text))
        .with_context(|| format!("'{}': malformed compiler config", cfg_path.display()))?;

    let mut options = match config.remove("compilerOptions") {
        Some(Value::Object(options)) => options,
        _ => Map::new(),
    };
    normalize_options(&root, &mut options);
    let no_emit = options.get("noEmit").and_then(Value::as_bool).unwrap_or(false);

    if let Some(Value::String(base)) = config.get("extends") {
        if base.starts_with('.') {
            let resolved = resolve(&root, base);
            config.insert("extends".to_string(), Value::String(resolved));
        }
    }

    let include = match config.get("include") {
        Some(Value::Array(list)) => resolve_list(&root, list, |_| true),
        _ => {
            let default = match options.get("rootDir").and_then(Value::as_str) {
                Some(dir) => format!("{dir}/**/*"),
                None => format!("{}/src/**/*", root.display()),
            };
            vec![Value::String(default)]
        }
    };
    config.insert("include".to_string(), Value::Array(include));

    if let Some(Value::Array(list)) = config.get("exclude") {
        let exclude = resolve_list(&root, list, |glob| !opts.test || !glob.contains("tests"));
        config.insert("exclude".to_string(), Value::Array(exclude));
    }
    if let Some(Value::Array(list)) = config.get("files") {
        let files = resolve_list(&root, list, |_| true);
        config.insert("files".to_string(), Value::Array(files));
    }

    let references: Vec<Value> = opts
        .workspace_deps
        .iter()
        .map(|dep| json!({ "path": config_path(opts.build_temp, PassKind::Fast, dep) }))
        .collect();
    config.insert("references".to_string(), Value::Array(references));

    let size = folder_size(fs, &root.join("src"));
    let mut out = Vec::with_capacity(2);

    // Full pass.
    {
        let mut full = config.clone();
        let mut full_options = options.clone();
        full_options.insert("noEmit".to_string(), Value::Bool(true));
        full_options.insert(
            "tsBuildInfoFile".to_string(),
            json!(build_info_path(opts.build_temp, PassKind::Full, opts.pkg_name)),
        );
        let mut full_size = size;
        let tests = root.join("tests");
        if opts.test && fs.is_dir(&tests) {
            if let Some(Value::Array(include)) = full.get_mut("include") {
                include.push(Value::String(tests.to_string_lossy().into_owned()));
            }
            full_options.insert("rootDir".to_string(), json!(root));
            full_options.insert("skipLibCheck".to_string(), Value::Bool(true));
            full_size += folder_size(fs, &tests);
        }
        full.insert("compilerOptions".to_string(), Value::Object(full_options));
        let file = config_path(opts.build_temp, PassKind::Full, opts.pkg_name);
        fs.write(&file, serde_json::to_string_pretty(&full)?.as_bytes())?;
        out.push(SplitConfig {
            kind: PassKind::Full,
            config_file: file,
            pkg_name: opts.pkg_name.to_string(),
            size: full_size,
        });
    }

    if !no_emit {
        let mut fast = config;
        let mut fast_options = options;
        fast_options.insert("noCheck".to_string(), Value::Bool(true));
        fast_options.insert("emitDeclarationOnly".to_string(), Value::Bool(true));
        fast_options.insert(
            "tsBuildInfoFile".to_string(),
            json!(build_info_path(opts.build_temp, PassKind::Fast, opts.pkg_name)),
        );
        fast.insert("compilerOptions".to_string(), Value::Object(fast_options));
        let file = config_path(opts.build_temp, PassKind::Fast, opts.pkg_name);
        fs.write(&file, serde_json::to_string_pretty(&fast)?.as_bytes())?;
        out.push(SplitConfig {
            kind: PassKind::Fast,
            config_file: file,
            pkg_name: opts.pkg_name.to_string(),
            size,
        });
    }

    Ok(out)
}

// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Raw configuration as read from `uibuild.toml`.
///
/// ```toml
/// [paths]
/// ui_dir = "ui"
/// out_dir = "public"
///
/// [tools]
/// esbuild = ["pnpm", "exec", "esbuild"]
/// bundle_host = ["node", "ui/.build/esbuild-host.mjs"]
/// typecheck_worker = ["node", "ui/.build/tsc-worker.mjs"]
///
/// [debounce]
/// bundle_ms = 300
/// ```
///
/// Every section is optional. Use `ConfigFile::try_from` to validate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub tools: ToolsSection,

    #[serde(default)]
    pub debounce: DebounceSection,

    #[serde(default)]
    pub typecheck: TypecheckSection,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub debounce: DebounceSection,
    pub typecheck: TypecheckSection,
}

impl ConfigFile {
    /// Wrap a raw config without validating it. Callers go through
    /// `TryFrom<RawConfigFile>` instead.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            paths: raw.paths,
            tools: raw.tools,
            debounce: raw.debounce,
            typecheck: raw.typecheck,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[paths]` section. All paths are relative to the repository root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub ui_dir: String,
    pub out_dir: String,
    /// Relative to `out_dir`.
    pub js_out: String,
    /// Relative to `out_dir`.
    pub css_out: String,
    /// Relative to `out_dir`.
    pub hashed_out: String,
    pub build_temp: String,
    pub i18n_glob: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            ui_dir: "ui".to_string(),
            out_dir: "public".to_string(),
            js_out: "compiled".to_string(),
            css_out: "css".to_string(),
            hashed_out: "hashed".to_string(),
            build_temp: "ui/.build/build".to_string(),
            i18n_glob: "translation/js/*.js".to_string(),
        }
    }
}

/// `[tools]` section: argv prefixes for the external engines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// One-shot transforms.
    pub esbuild: Vec<String>,
    /// Long-lived bundle contexts; see `bundle::host`.
    pub bundle_host: Vec<String>,
    pub sass: Vec<String>,
    pub typecheck_worker: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            esbuild: vec!["esbuild".to_string()],
            bundle_host: vec!["node".to_string(), "ui/.build/esbuild-host.mjs".to_string()],
            sass: vec!["sass".to_string()],
            typecheck_worker: vec!["node".to_string(), "ui/.build/tsc-worker.mjs".to_string()],
        }
    }
}

/// `[debounce]` section, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DebounceSection {
    pub bundle_ms: u64,
    pub sync_ms: u64,
    pub hash_ms: u64,
    pub style_ms: u64,
    pub monitor_ms: u64,
    pub manifest_ms: u64,
}

impl Default for DebounceSection {
    fn default() -> Self {
        Self {
            bundle_ms: 300,
            sync_ms: 300,
            hash_ms: 300,
            style_ms: 300,
            monitor_ms: 1000,
            manifest_ms: 500,
        }
    }
}

impl DebounceSection {
    pub fn bundle(&self) -> Duration {
        Duration::from_millis(self.bundle_ms)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_millis(self.sync_ms)
    }

    pub fn hash(&self) -> Duration {
        Duration::from_millis(self.hash_ms)
    }

    pub fn style(&self) -> Duration {
        Duration::from_millis(self.style_ms)
    }

    pub fn monitor(&self) -> Duration {
        Duration::from_millis(self.monitor_ms)
    }

    pub fn manifest(&self) -> Duration {
        Duration::from_millis(self.manifest_ms)
    }
}

/// `[typecheck]` section: upper bounds for the two worker pools.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TypecheckSection {
    pub fast_workers_max: usize,
    pub full_workers_max: usize,
}

impl Default for TypecheckSection {
    fn default() -> Self {
        Self {
            fast_workers_max: 4,
            full_workers_max: 8,
        }
    }
}

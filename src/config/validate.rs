// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BuildError, Result};

/// Longest debounce window we accept; anything above is almost certainly a
/// unit mistake (seconds written as milliseconds).
const MAX_DEBOUNCE_MS: u64 = 10_000;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BuildError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_paths(cfg)?;
    validate_tools(cfg)?;
    validate_debounce(cfg)?;
    validate_typecheck(cfg)?;
    Ok(())
}

fn validate_paths(cfg: &RawConfigFile) -> Result<()> {
    let paths = &cfg.paths;
    for (key, value) in [
        ("ui_dir", &paths.ui_dir),
        ("out_dir", &paths.out_dir),
        ("js_out", &paths.js_out),
        ("css_out", &paths.css_out),
        ("hashed_out", &paths.hashed_out),
        ("build_temp", &paths.build_temp),
    ] {
        if value.trim().is_empty() {
            return Err(BuildError::Config(format!("[paths].{key} must not be empty")));
        }
    }
    Ok(())
}

fn validate_tools(cfg: &RawConfigFile) -> Result<()> {
    let tools = &cfg.tools;
    for (key, argv) in [
        ("esbuild", &tools.esbuild),
        ("bundle_host", &tools.bundle_host),
        ("sass", &tools.sass),
        ("typecheck_worker", &tools.typecheck_worker),
    ] {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(BuildError::Config(format!(
                "[tools].{key} must name a program"
            )));
        }
    }
    Ok(())
}

fn validate_debounce(cfg: &RawConfigFile) -> Result<()> {
    let d = &cfg.debounce;
    for (key, ms) in [
        ("bundle_ms", d.bundle_ms),
        ("sync_ms", d.sync_ms),
        ("hash_ms", d.hash_ms),
        ("style_ms", d.style_ms),
        ("monitor_ms", d.monitor_ms),
        ("manifest_ms", d.manifest_ms),
    ] {
        if ms > MAX_DEBOUNCE_MS {
            return Err(BuildError::Config(format!(
                "[debounce].{key} must be <= {MAX_DEBOUNCE_MS} (got {ms})"
            )));
        }
    }
    Ok(())
}

fn validate_typecheck(cfg: &RawConfigFile) -> Result<()> {
    if cfg.typecheck.fast_workers_max == 0 || cfg.typecheck.full_workers_max == 0 {
        return Err(BuildError::Config(
            "[typecheck] worker maxima must be >= 1".to_string(),
        ));
    }
    Ok(())
}

// src/config/mod.rs

//! Configuration loading and validation for uibuild.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load an optional `uibuild.toml` from disk (`loader.rs`).
//! - Validate basic invariants like sane debounce windows (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, DebounceSection, PathsSection, RawConfigFile, ToolsSection, TypecheckSection,
};

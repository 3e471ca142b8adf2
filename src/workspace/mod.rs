// src/workspace/mod.rs

//! Package discovery and workspace dependency ordering.
//!
//! - [`package`] parses one package's `build` declaration.
//! - [`graph`] holds every package and answers "what must be built, in which
//!   order" for a requested package.

pub mod graph;
pub mod package;

pub use graph::PackageGraph;
pub use package::{BundleEntry, HashEntry, Package, SyncEntry};

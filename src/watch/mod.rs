// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Anchoring glob patterns at a directory and deriving the watch root and
//!   depth each one needs.
//! - Wiring up a cross-platform filesystem watcher (`notify`) with one
//!   non-recursive OS watch per directory, shared between subscriptions.
//! - Debouncing events per subscription and computing the changed-file set
//!   from cached file stamps.
//!
//! It knows nothing about stages or packages; callers hand it a build
//! callback and get it invoked with the changed and matched paths.

pub mod cache;
pub mod event_handler;
pub mod glob;
pub mod path_utils;
pub mod watcher;

pub use glob::CwdGlob;
pub use watcher::{build_fn, BuildFn, Subscription, Watcher};

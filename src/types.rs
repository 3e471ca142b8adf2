use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::Deserialize;

/// Build stages tracked by the [`StatusRegistry`](crate::status::StatusRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Style,
    TypeCheck,
    Bundle,
    Sync,
    I18n,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Style,
        Stage::TypeCheck,
        Stage::Bundle,
        Stage::Sync,
        Stage::I18n,
    ];

    /// Stages whose exit code must be 0 before the workspace counts as built.
    ///
    /// `Sync` is tracked for logging only; its subscriptions gate publication
    /// through the watcher instead.
    pub const GATING: [Stage; 4] = [Stage::Style, Stage::TypeCheck, Stage::Bundle, Stage::I18n];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Style => "style",
            Stage::TypeCheck => "typecheck",
            Stage::Bundle => "bundle",
            Stage::Sync => "sync",
            Stage::I18n => "i18n",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "style" | "sass" => Ok(Stage::Style),
            "typecheck" | "tsc" => Ok(Stage::TypeCheck),
            "bundle" | "esbuild" => Ok(Stage::Bundle),
            "sync" => Ok(Stage::Sync),
            "i18n" => Ok(Stage::I18n),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Result of the last rebuild of a watch subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    Ok,
    Error,
}

/// The two halves of a split type-check.
///
/// - `Fast`: no type errors checked, declarations only.
/// - `Full`: nothing emitted, complete diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Fast,
    Full,
}

impl PassKind {
    /// Directory name under the build-temp dir holding this pass's configs.
    pub fn dir_name(&self) -> &'static str {
        match self {
            PassKind::Fast => "noCheck",
            PassKind::Full => "noEmit",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Boxed future returned by the async trait seams (bundler, worker backend,
/// watch callbacks).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip_through_from_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
        }
        assert_eq!("tsc".parse::<Stage>(), Ok(Stage::TypeCheck));
        assert!("lint".parse::<Stage>().is_err());
    }
}

// src/bundle/plugin.rs

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::bundle::BuildResult;

static HTML_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$html`([^`]*)`").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Build-time hooks handed to a bundle context.
pub trait BundlePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Replacement contents for a loaded source, if any.
    fn on_load(&self, _path: &Path, _source: &str) -> Option<String> {
        None
    }

    /// Called after every build with its result.
    fn on_end(&self, _result: &BuildResult) {}
}

/// Apply every load hook in order. Returns `None` when nothing changed.
pub fn apply_on_load(plugins: &[Arc<dyn BundlePlugin>], path: &Path, source: &str) -> Option<String> {
    let mut current: Option<String> = None;
    for plugin in plugins {
        let input = current.as_deref().unwrap_or(source);
        if let Some(next) = plugin.on_load(path, input) {
            current = Some(next);
        }
    }
    current
}

pub fn run_on_end(plugins: &[Arc<dyn BundlePlugin>], result: &BuildResult) {
    for plugin in plugins {
        plugin.on_end(result);
    }
}

/// Trim a string and collapse whitespace runs to one space.
pub fn compress_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Compact `$html`...`` literals into plain template literals.
///
/// Only the text up to the next backtick is compacted; a nested literal
/// inside an interpolation ends the match and stays as it is.
pub fn compact_html_literals(source: &str) -> Cow<'_, str> {
    HTML_LITERAL.replace_all(source, |caps: &regex::Captures<'_>| {
        format!("`{}`", compress_whitespace(&caps[1]))
    })
}

/// Load hook compacting inline HTML in `.ts` sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlCompaction;

impl BundlePlugin for HtmlCompaction {
    fn name(&self) -> &'static str {
        "$html"
    }

    fn on_load(&self, path: &Path, source: &str) -> Option<String> {
        if path.extension().is_none_or(|ext| ext != "ts") {
            return None;
        }
        match compact_html_literals(source) {
            Cow::Borrowed(_) => None,
            Cow::Owned(compacted) => Some(compacted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compacts_simple_literals_and_drops_the_tag() {
        let src = "const x = $html`\n  <div>\n    <span>hi</span>\n  </div>\n`;";
        assert_eq!(
            compact_html_literals(src),
            "const x = `<div> <span>hi</span> </div>`;"
        );
    }

    #[test]
    fn stops_at_the_first_nested_backtick() {
        let src = "$html`     <div>    ${    x ?      `<- 2nd backtick   ${y}${z}` : ''    }     </div>`";
        assert_eq!(
            compact_html_literals(src),
            "`<div> ${ x ?`<- 2nd backtick   ${y}${z}` : ''    }     </div>`"
        );
    }

    #[test]
    fn leaves_untagged_sources_alone() {
        let src = "const s = `  spaced  `;";
        assert!(matches!(compact_html_literals(src), Cow::Borrowed(_)));
        assert_eq!(HtmlCompaction.on_load(Path::new("/a.ts"), src), None);
        assert_eq!(
            HtmlCompaction.on_load(Path::new("/a.js"), "$html` <b> `"),
            None
        );
    }

    #[test]
    fn load_hooks_chain() {
        let plugins: Vec<Arc<dyn BundlePlugin>> = vec![Arc::new(HtmlCompaction)];
        assert_eq!(
            apply_on_load(&plugins, Path::new("/x.ts"), "$html` <p> `").as_deref(),
            Some("`<p>`")
        );
    }
}

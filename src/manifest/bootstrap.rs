// src/manifest/bootstrap.rs

//! Rendering of the client bootstrap script and the server manifest JSON.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::manifest::aggregator::ManifestTables;
use crate::manifest::fragment::{Fragment, FragmentTable};

/// Shared chunks are only reached through imports, never by name.
static COMMON_CHUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"common\.[A-Z0-9]{8}").expect("valid regex"));

/// Values baked into the bootstrap script besides the manifest maps.
#[derive(Debug, Clone, Default)]
pub struct BootstrapInfo {
    pub commit: String,
    pub message: String,
    pub debug: bool,
    pub remote_log: Option<String>,
}

fn escape_message(message: &str) -> String {
    message.replace('\'', "&#39;").replace('"', "&quot;")
}

fn pair_lines<'a>(table: impl IntoIterator<Item = (&'a String, &'a Fragment)>) -> String {
    table
        .into_iter()
        .filter_map(|(name, frag)| {
            frag.hash
                .as_ref()
                .map(|hash| format!("'{}':'{}'", name.replace('\'', "\\'"), hash))
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn script_pairs(js: &FragmentTable) -> String {
    pair_lines(js.iter().filter(|(name, _)| !COMMON_CHUNK.is_match(name)))
}

/// Console forwarder injected for `--remote-log`.
pub fn remote_log_snippet(url: &str) -> String {
    let url = url.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "(function(){{const u='{url}';for(const m of ['log','info','warn','error']){{\
const o=console[m];console[m]=function(...a){{try{{navigator.sendBeacon(u,\
JSON.stringify({{level:m,args:a.map(String)}}))}}catch(_){{}}o.apply(console,a);}};}}}})();"
    )
}

/// The hashable part of the bootstrap script.
pub fn client_script(info: &BootstrapInfo, tables: &ManifestTables) -> String {
    let mut lines = vec![
        "if (!window.site) window.site={};".to_string(),
        "if (!window.site.info) window.site.info={};".to_string(),
        format!("window.site.info.commit='{}';", info.commit.trim()),
        format!(
            "window.site.info.message='{}';",
            escape_message(info.message.trim())
        ),
        format!("window.site.debug={};", info.debug),
    ];
    if let Some(url) = &info.remote_log {
        lines.push(remote_log_snippet(url));
    }
    lines.push(format!(
        "window.site.manifest={{\ncss:{{{}}},\njs:{{{}}},\nhashed:{{{}}}\n}};",
        pair_lines(&tables.css),
        script_pairs(&tables.js),
        pair_lines(&tables.hashed),
    ));
    lines.join("\n")
}

/// Trailing line appended after hashing, so the date never changes the hash.
pub fn date_line(now: DateTime<Utc>) -> String {
    format!(
        "\nwindow.site.info.date='{}';\n",
        now.format("%Y-%m-%dT%H:%M:%S+00:00")
    )
}

/// Server-side manifest: script entries (with the bootstrap hash under
/// `manifest` and localization entries folded in), style and hashed tables.
pub fn server_json(tables: &ManifestTables, bootstrap_hash: &str, pretty: bool) -> serde_json::Result<String> {
    let mut js = Map::new();
    js.insert(
        "manifest".to_string(),
        serde_json::json!({ "hash": bootstrap_hash }),
    );
    for (name, frag) in tables.js.iter().chain(tables.i18n.iter()) {
        js.insert(name.clone(), serde_json::to_value(frag)?);
    }

    let mut doc = Map::new();
    doc.insert("js".to_string(), Value::Object(js));
    doc.insert("css".to_string(), serde_json::to_value(&tables.css)?);
    doc.insert("hashed".to_string(), serde_json::to_value(&tables.hashed)?);

    let doc = Value::Object(doc);
    if pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    }
}

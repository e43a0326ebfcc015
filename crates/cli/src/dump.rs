//! Envoy proxy config dumps read from files.
//!
//! Accepts a full admin `config_dump`, the `dynamic_listeners` /
//! `dynamic_active_clusters` arrays on their own, or a plain array of
//! listener or cluster objects as printed by `istioctl proxy-config -o json`.
//! Everything is normalized to camelCase and wrapped so that each record
//! carries its `listener` or `cluster` under that key, plus a top-level `name`.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use kinspect_core::Item;
use kinspect_diff::{snake_to_camel, transform};
use serde_json::{Map, Value as Json};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProxyKind {
    Listeners,
    Clusters,
}

impl ProxyKind {
    fn inner_key(self) -> &'static str {
        match self {
            ProxyKind::Listeners => "listener",
            ProxyKind::Clusters => "cluster",
        }
    }

    fn dump_type_suffix(self) -> &'static str {
        match self {
            ProxyKind::Listeners => "ListenersConfigDump",
            ProxyKind::Clusters => "ClustersConfigDump",
        }
    }

    fn sections(self) -> &'static [&'static str] {
        match self {
            ProxyKind::Listeners => &["staticListeners", "dynamicListeners"],
            ProxyKind::Clusters => &["staticClusters", "dynamicActiveClusters", "dynamicWarmingClusters"],
        }
    }
}

pub fn load(path: &Path) -> Result<Json> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} as JSON", path.display()))
}

fn entries(dump: &Json, kind: ProxyKind) -> Vec<Json> {
    if let Some(configs) = dump.get("configs").and_then(|v| v.as_array()) {
        let section = configs.iter().find(|c| {
            c.get("@type").and_then(|t| t.as_str()).map(|t| t.ends_with(kind.dump_type_suffix())).unwrap_or(false)
        });
        return section.map(|s| entries(s, kind)).unwrap_or_default();
    }
    if let Some(obj) = dump.as_object() {
        return kind
            .sections()
            .iter()
            .filter_map(|k| obj.get(*k).and_then(|v| v.as_array()))
            .flatten()
            .cloned()
            .collect();
    }
    dump.as_array().cloned().unwrap_or_default()
}

fn record(entry: Json, kind: ProxyKind) -> Option<Item> {
    let inner = kind.inner_key();
    let Json::Object(mut obj) = entry else { return None; };
    // dynamic listeners nest the interesting part under activeState
    if let Some(Json::Object(active)) = obj.remove("activeState") {
        let name = obj.remove("name");
        obj = active;
        if let Some(n) = name { obj.entry("name").or_insert(n); }
    }
    if !obj.contains_key(inner) {
        let mut wrapped = Map::new();
        wrapped.insert(inner.to_string(), Json::Object(obj));
        obj = wrapped;
    }
    if !obj.contains_key("name") {
        let name = obj.get(inner).and_then(|l| l.get("name")).cloned()?;
        obj.insert("name".to_string(), name);
    }
    Some(Item::Structured(obj))
}

/// Records of one kind from a dump, in dump order.
pub fn records(dump: &Json, kind: ProxyKind) -> Vec<Item> {
    let normalized = transform(dump, &snake_to_camel);
    entries(&normalized, kind).into_iter().filter_map(|e| record(e, kind)).collect()
}

//! Discovered items keyed by cluster and namespace.
//!
//! The whole cache is tagged with a cache key naming the kind of data it
//! holds ("namespaces", "services", ...). Switching keys wipes it; clusters
//! and namespaces that left the topology are pruned on every access.

use kinspect_core::{Item, Topology};
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct ClusterEntry {
    /// Set when the entry came from one cluster-wide fetch, so it can answer
    /// for the whole cluster and not just the namespaces it happens to hold.
    complete: bool,
    namespaces: FxHashMap<String, Vec<Item>>,
}

#[derive(Debug, Default)]
pub struct ChoiceCache {
    key: Option<String>,
    clusters: FxHashMap<String, ClusterEntry>,
}

impl ChoiceCache {
    pub fn new() -> Self { Self::default() }

    pub fn cache_key(&self) -> Option<&str> { self.key.as_deref() }

    pub fn is_empty(&self) -> bool { self.clusters.is_empty() }

    pub fn contains_cluster(&self, cluster: &str) -> bool { self.clusters.contains_key(cluster) }

    pub fn get(&self, cache_key: &str, cluster: &str, namespace: &str) -> Option<&[Item]> {
        if self.key.as_deref() != Some(cache_key) { return None; }
        self.clusters.get(cluster)?.namespaces.get(namespace).map(Vec::as_slice)
    }

    /// All buckets of a cluster, only when it was fetched cluster-wide.
    pub fn get_cluster(&self, cache_key: &str, cluster: &str) -> Option<Vec<(String, Vec<Item>)>> {
        if self.key.as_deref() != Some(cache_key) { return None; }
        let entry = self.clusters.get(cluster).filter(|e| e.complete)?;
        let mut buckets: Vec<(String, Vec<Item>)> = entry.namespaces.iter().map(|(ns, items)| (ns.clone(), items.clone())).collect();
        buckets.sort_by(|a, b| a.0.cmp(&b.0));
        Some(buckets)
    }

    fn retag(&mut self, cache_key: &str) {
        if self.key.as_deref() != Some(cache_key) {
            self.clusters.clear();
            self.key = Some(cache_key.to_string());
        }
    }

    pub fn put(&mut self, cache_key: &str, cluster: &str, namespace: &str, items: Vec<Item>) {
        self.retag(cache_key);
        self.clusters
            .entry(cluster.to_string())
            .or_default()
            .namespaces
            .insert(namespace.to_string(), items);
    }

    /// Replace a cluster with the result of one cluster-wide fetch.
    pub fn put_cluster(&mut self, cache_key: &str, cluster: &str, buckets: FxHashMap<String, Vec<Item>>) {
        self.retag(cache_key);
        self.clusters.insert(cluster.to_string(), ClusterEntry { complete: true, namespaces: buckets });
    }

    pub fn clear(&mut self) {
        self.clusters.clear();
        self.key = None;
    }

    /// Drop whatever the current request can no longer trust.
    ///
    /// A different cache key or disabled caching wipes everything. Otherwise
    /// clusters missing from `topology` are dropped, and for namespace-scoped
    /// requests so are namespaces their cluster no longer lists.
    pub fn invalidate_if_stale(&mut self, cache_key: &str, topology: &Topology, enabled: bool, namespace_scoped: bool) {
        if !enabled || self.key.as_deref() != Some(cache_key) {
            if !self.clusters.is_empty() {
                debug!(old = ?self.key, new = %cache_key, enabled, "choice cache: wiped");
            }
            self.clusters.clear();
            self.key = if enabled { Some(cache_key.to_string()) } else { None };
            return;
        }
        self.clusters.retain(|name, _| {
            let keep = topology.has_cluster(name);
            if !keep { debug!(cluster = %name, "choice cache: cluster left topology"); }
            keep
        });
        if !namespace_scoped { return; }
        for (name, entry) in self.clusters.iter_mut() {
            let Some(cluster) = topology.cluster(name) else { continue; };
            if cluster.namespaces.is_none() { continue; }
            let before = entry.namespaces.len();
            entry.namespaces.retain(|ns, _| cluster.lists_namespace(ns) == Some(true));
            if entry.namespaces.len() != before {
                debug!(cluster = %name, dropped = before - entry.namespaces.len(), "choice cache: namespaces pruned");
                entry.complete = false;
            }
        }
    }
}

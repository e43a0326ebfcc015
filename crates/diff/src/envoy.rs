//! Refinements for Envoy/Istio proxy config records.
//!
//! Records are normalized to camelCase keys before inspection so that dumps
//! from the admin endpoint (snake_case) and from istioctl (camelCase) are
//! read the same way.

use kinspect_core::Item;
use serde::Serialize;
use serde_json::Value as Json;

use crate::keys::{snake_to_camel, transform};
use crate::reconcile::ChangedPair;
use crate::structural::{compare_flat_arrays, compare_values, values_equal, CompareOpts};

const VERSION_KEYS: [&str; 2] = ["version_info", "versionInfo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    /// Only the config version differs.
    VersionOnly,
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedChange {
    pub kind: ChangeKind,
    pub version_changed: bool,
    /// Differing keys other than the version field.
    pub other_keys: Vec<String>,
}

fn has_version(item: &Item) -> bool {
    item.as_map().map(|m| VERSION_KEYS.iter().any(|k| m.contains_key(*k))).unwrap_or(false)
}

/// Classify a changed pair. A pair whose only differing key is the version
/// field, with both sides carrying it, is a version mismatch rather than a
/// structural one.
pub fn classify_change(pair: &ChangedPair) -> ClassifiedChange {
    let both_versioned = has_version(&pair.first) && has_version(&pair.second);
    let is_version_key = |k: &String| VERSION_KEYS.contains(&k.as_str());
    let version_changed = both_versioned && pair.diff_keys.iter().any(is_version_key);
    let other_keys: Vec<String> = if both_versioned {
        pair.diff_keys.iter().filter(|k| !is_version_key(*k)).cloned().collect()
    } else {
        pair.diff_keys.clone()
    };
    let kind = if version_changed && other_keys.is_empty() { ChangeKind::VersionOnly } else { ChangeKind::Structural };
    ClassifiedChange { kind, version_changed, other_keys }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    First,
    Second,
    Both,
}

/// A filter chain that found no counterpart with equal server names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedChain {
    pub server_names: Vec<String>,
    pub chain: Json,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedChain {
    pub server_names: Vec<String>,
    pub diff_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListenerDiff {
    /// Set when a record has no `listener` sub-structure.
    pub listener_missing: Option<Side>,
    pub address_matches: bool,
    pub listener_filters_match: bool,
    pub only_in_first: Vec<UnmatchedChain>,
    pub only_in_second: Vec<UnmatchedChain>,
    pub changed_chains: Vec<ChangedChain>,
}

impl ListenerDiff {
    pub fn matches(&self) -> bool {
        self.listener_missing.is_none()
            && self.address_matches
            && self.listener_filters_match
            && self.only_in_first.is_empty()
            && self.only_in_second.is_empty()
            && self.changed_chains.is_empty()
    }
}

fn listener_of(item: &Item) -> Option<Json> {
    let normalized = transform(&item.to_value(), &snake_to_camel);
    match normalized {
        Json::Object(mut map) => map.remove("listener").filter(|l| !l.is_null()),
        _ => None,
    }
}

fn listener_filter_names(listener: &Json) -> Vec<Json> {
    listener
        .get("listenerFilters")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|f| f.get("name").cloned()).collect())
        .unwrap_or_default()
}

fn sorted_server_names(chain: &Json) -> Vec<String> {
    let mut names: Vec<String> = chain
        .get("filterChainMatch")
        .and_then(|m| m.get("serverNames"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    names.sort();
    names
}

/// The chain with its server names in sorted order, so pairing by name set
/// does not turn into an ordered array difference.
fn with_sorted_server_names(chain: &Json, sorted: &[String]) -> Json {
    let mut chain = chain.clone();
    if let Some(names) = chain.pointer_mut("/filterChainMatch/serverNames") {
        if names.is_array() {
            *names = Json::Array(sorted.iter().cloned().map(Json::String).collect());
        }
    }
    chain
}

fn chains(listener: &Json) -> Vec<Json> {
    listener.get("filterChains").and_then(|v| v.as_array()).cloned().unwrap_or_default()
}

/// Compare two listener records: socket address, listener filter names (as
/// unordered sets) and filter chains paired by their sorted server names.
pub fn compare_listeners(a: &Item, b: &Item, opts: &CompareOpts) -> ListenerDiff {
    let (la, lb) = match (listener_of(a), listener_of(b)) {
        (Some(la), Some(lb)) => (la, lb),
        (None, None) => return ListenerDiff { listener_missing: Some(Side::Both), ..Default::default() },
        (None, Some(_)) => return ListenerDiff { listener_missing: Some(Side::First), ..Default::default() },
        (Some(_), None) => return ListenerDiff { listener_missing: Some(Side::Second), ..Default::default() },
    };

    let address_matches = values_equal(
        la.get("address").and_then(|a| a.get("socketAddress")),
        lb.get("address").and_then(|a| a.get("socketAddress")),
        opts,
    );
    let listener_filters_match = compare_flat_arrays(&listener_filter_names(&la), &listener_filter_names(&lb), false);

    let chains_a = chains(&la);
    let chains_b = chains(&lb);
    let keys_b: Vec<Vec<String>> = chains_b.iter().map(sorted_server_names).collect();
    let mut claimed_b = vec![false; chains_b.len()];
    let mut diff = ListenerDiff { address_matches, listener_filters_match, ..Default::default() };

    for chain_a in chains_a.iter() {
        let key = sorted_server_names(chain_a);
        let hit = keys_b.iter().enumerate().position(|(j, kb)| !claimed_b[j] && *kb == key);
        match hit {
            Some(j) => {
                claimed_b[j] = true;
                let cmp = compare_values(
                    &with_sorted_server_names(chain_a, &key),
                    &with_sorted_server_names(&chains_b[j], &keys_b[j]),
                    opts,
                );
                if !cmp.matches {
                    diff.changed_chains.push(ChangedChain { server_names: key, diff_keys: cmp.diff_keys });
                }
            }
            None => diff.only_in_first.push(UnmatchedChain { server_names: key, chain: chain_a.clone() }),
        }
    }
    for (j, chain_b) in chains_b.into_iter().enumerate() {
        if !claimed_b[j] {
            diff.only_in_second.push(UnmatchedChain { server_names: keys_b[j].clone(), chain: chain_b });
        }
    }
    diff
}

//! Key naming convention transforms.
//!
//! Config dumps of the same object come back snake_case from one API and
//! camelCase from another; transforming both to one convention first lets
//! them be compared structurally.

use kinspect_core::Item;
use serde_json::{Map, Value as Json};

/// Recursively rewrite every map key with `key_fn`. Arrays keep their
/// structure, scalar leaves are untouched.
pub fn transform<F>(v: &Json, key_fn: &F) -> Json
where
    F: Fn(&str) -> String,
{
    match v {
        Json::Object(map) => Json::Object(transform_map(map, key_fn)),
        Json::Array(arr) => Json::Array(arr.iter().map(|vv| transform(vv, key_fn)).collect()),
        other => other.clone(),
    }
}

pub fn transform_item<F>(item: &Item, key_fn: &F) -> Item
where
    F: Fn(&str) -> String,
{
    match item {
        Item::Identity(s) => Item::Identity(s.clone()),
        Item::Structured(map) => Item::Structured(transform_map(map, key_fn)),
    }
}

fn transform_map<F>(map: &Map<String, Json>, key_fn: &F) -> Map<String, Json>
where
    F: Fn(&str) -> String,
{
    map.iter().map(|(k, v)| (key_fn(k), transform(v, key_fn))).collect()
}

/// `version_info` -> `versionInfo`.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, piece) in key.split('_').enumerate() {
        if i == 0 {
            out.push_str(piece);
            continue;
        }
        let mut chars = piece.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// `versionInfo` -> `version_info`.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 { out.push('_'); }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

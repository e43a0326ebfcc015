//! Deep structural equality between two records.
//!
//! A difference anywhere below a top-level key is attributed to that key, so
//! `Comparison::diff_keys` is always a list of top-level names.

use std::borrow::Cow;

use kinspect_core::Item;
use serde::Serialize;
use serde_json::{Map, Value as Json};

/// Replacement for a stripped value prefix.
pub const PLACEHOLDER: &str = "<*>";

#[derive(Debug, Clone, Default)]
pub struct CompareOpts {
    /// Keys excluded at every depth (timestamps, uids, resource versions).
    pub ignore_keys: Vec<String>,
    /// Value prefixes normalized on the first (left) record.
    pub first_prefixes: Vec<String>,
    /// Value prefixes normalized on the second (right) record.
    pub second_prefixes: Vec<String>,
}

impl CompareOpts {
    pub fn new() -> Self { Self::default() }

    pub fn ignore_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn value_prefixes<I, J, S, T>(mut self, first: I, second: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.first_prefixes = first.into_iter().map(Into::into).collect();
        self.second_prefixes = second.into_iter().map(Into::into).collect();
        self
    }

    /// Same options with the two sides' prefixes swapped.
    pub fn swapped(&self) -> Self {
        Self {
            ignore_keys: self.ignore_keys.clone(),
            first_prefixes: self.second_prefixes.clone(),
            second_prefixes: self.first_prefixes.clone(),
        }
    }

    fn is_ignored(&self, key: &str) -> bool { self.ignore_keys.iter().any(|k| k == key) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub matches: bool,
    pub diff_keys: Vec<String>,
}

impl Comparison {
    fn same() -> Self { Self { matches: true, diff_keys: Vec::new() } }
}

/// Replace the first matching prefix with [`PLACEHOLDER`].
pub(crate) fn normalize_prefix<'a>(s: &'a str, prefixes: &[String]) -> Cow<'a, str> {
    for p in prefixes {
        if !p.is_empty() {
            if let Some(rest) = s.strip_prefix(p.as_str()) {
                return Cow::Owned(format!("{}{}", PLACEHOLDER, rest));
            }
        }
    }
    Cow::Borrowed(s)
}

/// Compare two items. Structured records are diffed key by key; any pairing
/// that involves a bare identity degrades to a name comparison with no
/// diff keys.
pub fn compare(a: &Item, b: &Item, opts: &CompareOpts) -> Comparison {
    match (a, b) {
        (Item::Structured(ma), Item::Structured(mb)) => compare_maps(ma, mb, opts),
        _ => Comparison { matches: a.name() == b.name(), diff_keys: Vec::new() },
    }
}

/// Compare two JSON values. Non-object values produce no diff keys.
pub fn compare_values(a: &Json, b: &Json, opts: &CompareOpts) -> Comparison {
    match (a, b) {
        (Json::Object(ma), Json::Object(mb)) => compare_maps(ma, mb, opts),
        _ => Comparison { matches: values_equal(Some(a), Some(b), opts), diff_keys: Vec::new() },
    }
}

fn compare_maps(a: &Map<String, Json>, b: &Map<String, Json>, opts: &CompareOpts) -> Comparison {
    let mut out = Comparison::same();
    let keys = a.keys().chain(b.keys().filter(|k| !a.contains_key(*k)));
    for k in keys {
        if opts.is_ignored(k) { continue; }
        if !values_equal(a.get(k), b.get(k), opts) {
            out.matches = false;
            out.diff_keys.push(k.clone());
        }
    }
    out
}

fn is_absent(v: Option<&Json>) -> bool { matches!(v, None | Some(Json::Null)) }

/// Recursive equality. `a` belongs to the first side and `b` to the second
/// for prefix normalization purposes.
pub fn values_equal(a: Option<&Json>, b: Option<&Json>, opts: &CompareOpts) -> bool {
    if is_absent(a) && is_absent(b) { return true; }
    let (Some(a), Some(b)) = (a, b) else { return false; };
    match (a, b) {
        (Json::String(sa), Json::String(sb)) => {
            normalize_prefix(sa, &opts.first_prefixes) == normalize_prefix(sb, &opts.second_prefixes)
        }
        (Json::Bool(x), Json::Bool(y)) => x == y,
        (Json::Number(x), Json::Number(y)) => x == y,
        (Json::Array(xa), Json::Array(ya)) => {
            xa.len() == ya.len() && xa.iter().zip(ya.iter()).all(|(x, y)| values_equal(Some(x), Some(y), opts))
        }
        (Json::Object(ma), Json::Object(mb)) => {
            let keys = ma.keys().chain(mb.keys().filter(|k| !ma.contains_key(*k)));
            for k in keys {
                if opts.is_ignored(k) { continue; }
                if !values_equal(ma.get(k), mb.get(k), opts) { return false; }
            }
            true
        }
        _ => false,
    }
}

/// Compare two flat arrays.
///
/// Ordered mode requires index-wise equality. Unordered mode only checks that
/// every element of each side is present somewhere on the other side, so
/// `["a", "a", "b"]` and `["a", "b", "b"]` compare equal.
pub fn compare_flat_arrays(a: &[Json], b: &[Json], in_order: bool) -> bool {
    if in_order {
        return a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y);
    }
    a.iter().all(|x| b.contains(x)) && b.iter().all(|y| a.contains(y))
}

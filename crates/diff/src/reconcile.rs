//! Partition two named collections into matching / changed / missing.

use std::collections::VecDeque;

use kinspect_core::Item;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::structural::{compare, normalize_prefix, CompareOpts, Comparison};

/// How an item's identity name is derived on each side.
#[derive(Debug, Clone, Default)]
pub struct IdentityOpts {
    /// Fields tried in order; empty means `name`.
    pub fields: Vec<String>,
    pub first_prefixes: Vec<String>,
    pub second_prefixes: Vec<String>,
}

impl IdentityOpts {
    pub fn by(field: impl Into<String>) -> Self {
        Self { fields: vec![field.into()], ..Default::default() }
    }

    pub fn with_prefixes<I, J, S, T>(mut self, first: I, second: J) -> Self
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

    fn name_for(&self, item: &Item, first: bool) -> String {
        let raw = item.name_by(&self.fields);
        let prefixes = if first { &self.first_prefixes } else { &self.second_prefixes };
        normalize_prefix(&raw, prefixes).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Named {
    pub name: String,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedPair {
    pub name: String,
    pub first: Item,
    pub second: Item,
    pub diff_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    /// Names present and structurally equal on both sides (second side's item).
    pub matching: Vec<Named>,
    /// Present in the first collection only.
    pub missing_from_b: Vec<Named>,
    /// Present in the second collection only.
    pub missing_from_a: Vec<Named>,
    pub changed: Vec<ChangedPair>,
}

impl Reconciliation {
    pub fn is_identical(&self) -> bool {
        self.changed.is_empty() && self.missing_from_a.is_empty() && self.missing_from_b.is_empty()
    }
}

/// Reconcile `a` against `b`.
///
/// Iteration follows `b`'s order. When a name occurs more than once, entries
/// pair up in insertion order. No sorting is applied.
pub fn reconcile(a: &[Item], b: &[Item], identity: &IdentityOpts, opts: &CompareOpts) -> Reconciliation {
    let mut pending: FxHashMap<String, VecDeque<usize>> = FxHashMap::default();
    let names_a: Vec<String> = a.iter().map(|it| identity.name_for(it, true)).collect();
    for (idx, name) in names_a.iter().enumerate() {
        pending.entry(name.clone()).or_default().push_back(idx);
    }
    let mut claimed = vec![false; a.len()];
    let mut out = Reconciliation::default();

    for item_b in b {
        let name = identity.name_for(item_b, false);
        let idx = pending.get_mut(&name).and_then(|q| q.pop_front());
        match idx {
            Some(idx) => {
                claimed[idx] = true;
                // names already agree; bare identities have nothing further to diff
                let cmp = match (&a[idx], item_b) {
                    (Item::Structured(_), Item::Structured(_)) => compare(&a[idx], item_b, opts),
                    _ => Comparison { matches: true, diff_keys: Vec::new() },
                };
                if cmp.matches {
                    out.matching.push(Named { name, item: item_b.clone() });
                } else {
                    out.changed.push(ChangedPair {
                        name,
                        first: a[idx].clone(),
                        second: item_b.clone(),
                        diff_keys: cmp.diff_keys,
                    });
                }
            }
            None => out.missing_from_a.push(Named { name, item: item_b.clone() }),
        }
    }
    for (idx, item_a) in a.iter().enumerate() {
        if !claimed[idx] {
            out.missing_from_b.push(Named { name: names_a[idx].clone(), item: item_a.clone() });
        }
    }
    debug!(
        matching = out.matching.len(),
        changed = out.changed.len(),
        missing_from_a = out.missing_from_a.len(),
        missing_from_b = out.missing_from_b.len(),
        "reconcile: done"
    );
    out
}

/// Reconcile the first collection against each of the others.
pub fn reconcile_against_first(
    collections: &[Vec<Item>],
    identity: &IdentityOpts,
    opts: &CompareOpts,
) -> Vec<Reconciliation> {
    let Some((first, rest)) = collections.split_first() else { return Vec::new(); };
    rest.iter().map(|other| reconcile(first, other, identity, opts)).collect()
}

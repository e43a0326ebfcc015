//! Comparison output rows.
//!
//! Under-selection and empty inputs are normal here and become message rows,
//! never errors.

use std::collections::BTreeSet;

use kinspect_core::{Cell, Choice, Item, Output, OutputStyle};
use metrics::counter;
use serde_json::Value as Json;

use crate::envoy::{classify_change, ChangeKind, ListenerDiff, Side};
use crate::reconcile::{reconcile_against_first, IdentityOpts, Reconciliation};
use crate::structural::{compare, CompareOpts};

pub const NOTHING_TO_COMPARE: &str = "Nothing to compare";
pub const NOT_ENOUGH_CLUSTERS: &str = "Not enough clusters to compare";

fn yes_no(b: bool) -> Cell { if b { "Yes".into() } else { "No".into() } }

/// Render a JSON value for a table cell. Strings are shown verbatim.
pub fn render_cell(v: Option<&Json>) -> Cell {
    match v {
        None | Some(Json::Null) => String::new(),
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn nothing_selected(kind: &str) -> Output { Output::message(format!("No {} selected", kind)) }

/// Presence matrix: one row per name (sorted), one Yes/No column per cluster.
///
/// `per_cluster` pairs each cluster label with the names found there.
pub fn presence_table(label: &str, per_cluster: &[(String, Vec<String>)]) -> Output {
    if per_cluster.len() < 2 {
        return Output::message(NOT_ENOUGH_CLUSTERS);
    }
    let mut header = vec![label.to_string()];
    header.extend(per_cluster.iter().map(|(c, _)| c.clone()));
    let mut out = Output::new(OutputStyle::Compare, header);

    let all: BTreeSet<&str> = per_cluster.iter().flat_map(|(_, names)| names.iter().map(String::as_str)).collect();
    for name in all {
        let mut row = vec![name.to_string()];
        row.extend(per_cluster.iter().map(|(_, names)| yes_no(names.iter().any(|n| n == name))));
        out.push_row(row);
    }
    counter!("compare_rows_total", out.body().len() as u64);
    out
}

/// Reconciliation of two collections as rows sorted by name:
/// `[name, in first, in second, status]`.
pub fn reconciliation_table(first_label: &str, second_label: &str, rec: &Reconciliation) -> Output {
    let header = vec!["Name".to_string(), first_label.to_string(), second_label.to_string(), "Status".to_string()];
    let mut out = Output::new(OutputStyle::Compare, header);
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for n in &rec.matching {
        rows.push(vec![n.name.clone(), yes_no(true), yes_no(true), "Match".into()]);
    }
    for c in &rec.changed {
        let class = classify_change(c);
        let status = match class.kind {
            ChangeKind::VersionOnly => "Version mismatch".to_string(),
            ChangeKind::Structural => format!("Differs: {}", class.other_keys.join(", ")),
        };
        rows.push(vec![c.name.clone(), yes_no(true), yes_no(true), status]);
    }
    for n in &rec.missing_from_b {
        rows.push(vec![n.name.clone(), yes_no(true), yes_no(false), format!("Missing in {}", second_label)]);
    }
    for n in &rec.missing_from_a {
        rows.push(vec![n.name.clone(), yes_no(false), yes_no(true), format!("Missing in {}", first_label)]);
    }
    rows.sort_by(|a, b| a[0].cmp(&b[0]));
    for r in rows { out.push_row(r); }
    counter!("compare_rows_total", out.body().len() as u64);
    out
}

/// Reconcile the first cluster's items against each other cluster's; one
/// table per pair, in cluster order.
pub fn compare_clusters(groups: &[(String, Vec<Item>)], identity: &IdentityOpts, opts: &CompareOpts) -> Vec<Output> {
    if groups.len() < 2 {
        return vec![Output::message(NOT_ENOUGH_CLUSTERS)];
    }
    if groups.iter().all(|(_, items)| items.is_empty()) {
        return vec![Output::message(NOTHING_TO_COMPARE)];
    }
    let collections: Vec<Vec<Item>> = groups.iter().map(|(_, items)| items.clone()).collect();
    let first_label = &groups[0].0;
    reconcile_against_first(&collections, identity, opts)
        .iter()
        .zip(&groups[1..])
        .map(|(rec, (label, _))| reconciliation_table(first_label, label, rec))
        .collect()
}

fn choice_label(c: &Choice) -> String {
    match c.data.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}@{}", ns, c.data.title, c.data.cluster),
        _ => format!("{}@{}", c.data.title, c.data.cluster),
    }
}

/// Side-by-side comparison of selected records. The first selection is the
/// reference; one row per top-level key that differs from it anywhere.
pub fn compare_selections(selections: &[Choice], opts: &CompareOpts) -> Output {
    if selections.len() < 2 {
        return Output::message(NOTHING_TO_COMPARE);
    }
    let reference = &selections[0];
    let mut keys: Vec<String> = Vec::new();
    for other in &selections[1..] {
        let cmp = compare(&reference.data.item, &other.data.item, opts);
        for k in cmp.diff_keys {
            if !keys.contains(&k) { keys.push(k); }
        }
    }

    let mut header = vec!["Key".to_string()];
    header.extend(selections.iter().map(choice_label));
    let mut out = Output::new(OutputStyle::Compare, header);
    if keys.is_empty() {
        let mut row = vec!["No differences".to_string()];
        row.extend(selections.iter().map(|_| String::new()));
        out.push_row(row);
        return out;
    }
    for k in keys {
        let mut row = vec![k.clone()];
        row.extend(selections.iter().map(|c| render_cell(c.data.item.as_map().and_then(|m| m.get(&k)))));
        out.push_row(row);
    }
    counter!("compare_rows_total", out.body().len() as u64);
    out
}

/// Rows describing a listener comparison: `[listener, finding, detail]`.
pub fn listener_rows(name: &str, first_label: &str, second_label: &str, diff: &ListenerDiff) -> Vec<Vec<Cell>> {
    let mut rows = Vec::new();
    if let Some(side) = diff.listener_missing {
        let detail = match side {
            Side::First => format!("missing in {}", first_label),
            Side::Second => format!("missing in {}", second_label),
            Side::Both => "missing in both".to_string(),
        };
        rows.push(vec![name.to_string(), "Listener missing".into(), detail]);
        return rows;
    }
    if !diff.address_matches {
        rows.push(vec![name.to_string(), "Address differs".into(), String::new()]);
    }
    if !diff.listener_filters_match {
        rows.push(vec![name.to_string(), "Listener filters differ".into(), String::new()]);
    }
    for ch in &diff.only_in_first {
        rows.push(vec![name.to_string(), format!("Filter chain only in {}", first_label), ch.server_names.join(",")]);
    }
    for ch in &diff.only_in_second {
        rows.push(vec![name.to_string(), format!("Filter chain only in {}", second_label), ch.server_names.join(",")]);
    }
    for ch in &diff.changed_chains {
        rows.push(vec![
            name.to_string(),
            format!("Filter chain differs: {}", ch.diff_keys.join(", ")),
            ch.server_names.join(","),
        ]);
    }
    if rows.is_empty() {
        rows.push(vec![name.to_string(), "Match".into(), String::new()]);
    }
    rows
}

pub fn listener_table(first_label: &str, second_label: &str, diffs: &[(String, ListenerDiff)]) -> Output {
    if diffs.is_empty() {
        return Output::message(NOTHING_TO_COMPARE);
    }
    let mut out = Output::new(OutputStyle::Compare, vec!["Listener".into(), "Finding".into(), "Detail".into()]);
    for (name, d) in diffs {
        for row in listener_rows(name, first_label, second_label, d) { out.push_row(row); }
    }
    counter!("compare_rows_total", out.body().len() as u64);
    out
}

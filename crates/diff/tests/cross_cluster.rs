#![forbid(unsafe_code)]

use kinspect_core::prelude::*;
use kinspect_diff::table::{listener_table, reconciliation_table};
use kinspect_diff::{compare_listeners, reconcile, CompareOpts, IdentityOpts};
use serde_json::json;

fn item(v: serde_json::Value) -> Item { Item::try_from_value(v).unwrap() }

fn envoy_cluster(name: &str, version: &str, lb: &str) -> Item {
    item(json!({
        "version_info": version,
        "cluster": { "name": name, "lb_policy": lb, "connect_timeout": "10s" },
        "last_updated": "2024-05-01T10:00:00Z",
        "name": name
    }))
}

#[test]
fn proxy_clusters_from_two_sidecars() {
    let east = vec![
        envoy_cluster("outbound|9080||reviews.bookinfo.svc.cluster.local", "2024-05-01T10:00:00Z/12", "ROUND_ROBIN"),
        envoy_cluster("outbound|9080||ratings.bookinfo.svc.cluster.local", "2024-05-01T10:00:00Z/12", "ROUND_ROBIN"),
        envoy_cluster("outbound|9080||details.bookinfo.svc.cluster.local", "2024-05-01T10:00:00Z/12", "ROUND_ROBIN"),
    ];
    let west = vec![
        envoy_cluster("outbound|9080||reviews.bookinfo.svc.cluster.local", "2024-05-01T10:05:00Z/14", "ROUND_ROBIN"),
        envoy_cluster("outbound|9080||ratings.bookinfo.svc.cluster.local", "2024-05-01T10:05:00Z/14", "LEAST_REQUEST"),
        envoy_cluster("outbound|9080||productpage.bookinfo.svc.cluster.local", "2024-05-01T10:05:00Z/14", "ROUND_ROBIN"),
    ];
    let opts = CompareOpts::new().ignore_keys(["last_updated"]);
    let rec = reconcile(&east, &west, &IdentityOpts::default(), &opts);
    let out = reconciliation_table("east", "west", &rec);

    assert_eq!(out.style, OutputStyle::Compare);
    let body = out.body();
    assert_eq!(body.len(), 4);
    assert_eq!(body[0][0], "outbound|9080||details.bookinfo.svc.cluster.local");
    assert_eq!(body[0][3], "Missing in west");
    assert_eq!(body[1][3], "Missing in east");
    assert_eq!(body[2][0], "outbound|9080||ratings.bookinfo.svc.cluster.local");
    assert_eq!(body[2][3], "Differs: cluster");
    assert_eq!(body[3][0], "outbound|9080||reviews.bookinfo.svc.cluster.local");
    assert_eq!(body[3][3], "Version mismatch");
}

#[test]
fn services_with_cluster_specific_prefixes() {
    let east = vec![item(json!({
        "metadata": { "name": "east-gateway", "uid": "1111", "resourceVersion": "10" },
        "spec": { "externalName": "east.mesh.example.com/gw" }
    }))];
    let west = vec![item(json!({
        "metadata": { "name": "west-gateway", "uid": "2222", "resourceVersion": "99" },
        "spec": { "externalName": "west.mesh.example.com/gw" }
    }))];
    let identity = IdentityOpts::default().with_prefixes(["east-"], ["west-"]);
    let opts = CompareOpts::new()
        .ignore_keys(["uid", "resourceVersion", "name"])
        .value_prefixes(["east.mesh.example.com"], ["west.mesh.example.com"]);
    let rec = reconcile(&east, &west, &identity, &opts);
    assert!(rec.is_identical(), "rec={:?}", rec);
    assert_eq!(rec.matching[0].name, "<*>gateway");
}

#[test]
fn listener_findings_as_rows() {
    let chain = |names: &[&str]| json!({ "filter_chain_match": { "server_names": names } });
    let a = item(json!({ "listener": {
        "address": { "socket_address": { "address": "0.0.0.0", "port_value": 443 } },
        "filter_chains": [ chain(&["a.com"]), chain(&["b.com"]) ]
    }}));
    let b = item(json!({ "listener": {
        "address": { "socket_address": { "address": "0.0.0.0", "port_value": 443 } },
        "filter_chains": [ chain(&["a.com"]) ]
    }}));
    let d = compare_listeners(&a, &b, &CompareOpts::new());
    let reverse = compare_listeners(&b, &a, &CompareOpts::new());
    assert_eq!(reverse.only_in_second.len(), 1);
    assert!(reverse.only_in_first.is_empty());

    let out = listener_table("east", "west", &[("0.0.0.0_443".to_string(), d)]);
    assert_eq!(
        out.body(),
        &[vec!["0.0.0.0_443".to_string(), "Filter chain only in east".into(), "b.com".into()]]
    );
}

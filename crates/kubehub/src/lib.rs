//! kinspect kubehub: kubeconfig contexts, discovery and list-backed fetchers

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kinspect_choice::Fetcher;
use kinspect_core::{Cluster, Item, Topology};
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use metrics::histogram;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_PAGE_SIZE: u32 = 500;

/// List page size from `KINSPECT_KUBE_PAGE_SIZE` (default 500, zero ignored).
pub fn page_size_from_env() -> u32 {
    parse_page_size(std::env::var("KINSPECT_KUBE_PAGE_SIZE").ok().as_deref())
}

fn parse_page_size(v: Option<&str>) -> u32 {
    v.and_then(|s| s.parse::<u32>().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Context names from the local kubeconfig, in file order.
pub fn list_contexts() -> Result<Vec<String>> {
    let kc = Kubeconfig::read().context("reading kubeconfig")?;
    Ok(kc.contexts.into_iter().map(|c| c.name).collect())
}

pub fn current_context() -> Result<Option<String>> {
    let kc = Kubeconfig::read().context("reading kubeconfig")?;
    Ok(kc.current_context)
}

/// Client bound to one kubeconfig context.
pub async fn client_for_context(context: &str) -> Result<Client> {
    let opts = KubeConfigOptions { context: Some(context.to_string()), ..Default::default() };
    let config = Config::from_kubeconfig(&opts)
        .await
        .with_context(|| format!("loading kubeconfig context {}", context))?;
    Client::try_from(config).with_context(|| format!("building client for context {}", context))
}

/// One cluster per context, optionally restricted to the given namespaces.
pub fn topology_for_contexts(contexts: &[String], namespaces: Option<&[String]>) -> Topology {
    let clusters = contexts
        .iter()
        .map(|ctx| {
            let c = Cluster::new(ctx.clone()).with_context(ctx.clone());
            match namespaces {
                Some(ns) => c.with_namespaces(ns.iter().cloned()),
                None => c,
            }
        })
        .collect();
    Topology::new(clusters)
}

/// Every served resource (incl. CRDs) with whether it is namespaced.
async fn served_resources(client: Client) -> Result<Vec<(ApiResource, bool)>> {
    let discovery = Discovery::new(client).run().await.context("running discovery")?;
    Ok(discovery
        .groups()
        .flat_map(|g| g.recommended_resources())
        .map(|(ar, caps)| (ar, matches!(caps.scope, Scope::Namespaced)))
        .collect())
}

fn serves(ar: &ApiResource, gvk: &GroupVersionKind) -> bool {
    ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind
}

/// Served resources of a cluster sorted by group, version and kind.
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let mut out: Vec<DiscoveredResource> = served_resources(client)
        .await?
        .into_iter()
        .map(|(ar, namespaced)| DiscoveredResource { group: ar.group, version: ar.version, kind: ar.kind, namespaced })
        .collect();
    out.sort_by(|a, b| a.group.cmp(&b.group).then(a.version.cmp(&b.version)).then(a.kind.cmp(&b.kind)));
    Ok(out)
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Raw JSON of a listed object without server-side bookkeeping noise.
pub fn item_from_object(obj: &DynamicObject) -> Result<Item> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    if let Some(meta) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
    Item::try_from_value(raw).map_err(|e| anyhow!(e))
}

async fn list_all(api: &Api<DynamicObject>, page_size: u32) -> Result<Vec<DynamicObject>> {
    let mut out = Vec::new();
    let mut lp = ListParams::default().limit(page_size);
    loop {
        let page = api.list(&lp).await.context("listing objects")?;
        out.extend(page.items);
        match page.metadata.continue_.filter(|t| !t.is_empty()) {
            Some(token) => lp = lp.continue_token(&token),
            None => break,
        }
    }
    Ok(out)
}

#[derive(Clone)]
struct Target {
    client: Client,
    ar: ApiResource,
    namespaced: bool,
}

/// Lists one GVK across kubeconfig contexts. Clients and discovery results
/// are resolved once per cluster.
pub struct KubeFetcher {
    gvk: GroupVersionKind,
    page_size: u32,
    targets: Mutex<FxHashMap<String, Target>>,
}

impl KubeFetcher {
    pub fn new(gvk_key: &str) -> Result<Self> {
        Ok(Self { gvk: parse_gvk_key(gvk_key)?, page_size: page_size_from_env(), targets: Mutex::new(FxHashMap::default()) })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn gvk(&self) -> &GroupVersionKind { &self.gvk }

    fn cached_target(&self, cluster: &str) -> Option<Target> {
        self.targets.lock().ok().and_then(|m| m.get(cluster).cloned())
    }

    async fn target(&self, cluster: &Cluster) -> Result<Target> {
        if let Some(t) = self.cached_target(&cluster.name) {
            return Ok(t);
        }
        let client = client_for_context(cluster.context_name()).await?;
        let gvk = &self.gvk;
        let (ar, namespaced) = served_resources(client.clone())
            .await?
            .into_iter()
            .find(|(ar, _)| serves(ar, gvk))
            .ok_or_else(|| anyhow!("{}/{}/{} is not served by {}", gvk.group, gvk.version, gvk.kind, cluster.name))?;
        let t = Target { client, ar, namespaced };
        if let Ok(mut m) = self.targets.lock() {
            m.insert(cluster.name.clone(), t.clone());
        }
        Ok(t)
    }
}

#[async_trait::async_trait]
impl Fetcher for KubeFetcher {
    async fn fetch(&self, cluster: &Cluster, namespace: Option<&str>) -> Result<Vec<Item>> {
        let t0 = Instant::now();
        let t = self.target(cluster).await?;
        let api: Api<DynamicObject> = if t.namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(t.client.clone(), ns, &t.ar),
                None => Api::all_with(t.client.clone(), &t.ar),
            }
        } else {
            Api::all_with(t.client.clone(), &t.ar)
        };
        let objs = list_all(&api, self.page_size)
            .await
            .with_context(|| format!("listing {} in {}", t.ar.kind, cluster.name))?;
        let items = objs.iter().map(item_from_object).collect::<Result<Vec<_>>>()?;
        histogram!("kube_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(cluster = %cluster.name, kind = %t.ar.kind, ns = ?namespace, count = items.len(), took_ms = %t0.elapsed().as_millis(), "kube: list ok");
        Ok(items)
    }

    async fn fetch_namespaces(&self, cluster: &Cluster) -> Result<Vec<String>> {
        let t = self.target(cluster).await?;
        list_namespace_names(t.client).await
    }
}

async fn list_namespace_names(client: Client) -> Result<Vec<String>> {
    let api: Api<Namespace> = Api::all(client);
    let list = api.list(&ListParams::default()).await.context("listing namespaces")?;
    let mut names: Vec<String> = list.items.into_iter().filter_map(|ns| ns.metadata.name).collect();
    names.sort();
    Ok(names)
}

/// Namespace names of each cluster as bare identity items.
#[derive(Default)]
pub struct NamespaceFetcher {
    clients: Mutex<FxHashMap<String, Client>>,
}

impl NamespaceFetcher {
    pub fn new() -> Self { Self::default() }

    async fn client(&self, cluster: &Cluster) -> Result<Client> {
        if let Some(c) = self.clients.lock().ok().and_then(|m| m.get(&cluster.name).cloned()) {
            return Ok(c);
        }
        let client = client_for_context(cluster.context_name()).await?;
        if let Ok(mut m) = self.clients.lock() {
            m.insert(cluster.name.clone(), client.clone());
        }
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Fetcher for NamespaceFetcher {
    async fn fetch(&self, cluster: &Cluster, _namespace: Option<&str>) -> Result<Vec<Item>> {
        let t0 = Instant::now();
        let names = self.fetch_namespaces(cluster).await?;
        debug!(cluster = %cluster.name, count = names.len(), took_ms = %t0.elapsed().as_millis(), "kube: namespaces ok");
        Ok(names.into_iter().map(Item::identity).collect())
    }

    async fn fetch_namespaces(&self, cluster: &Cluster) -> Result<Vec<String>> {
        let client = self.client(cluster).await?;
        list_namespace_names(client)
            .await
            .with_context(|| format!("listing namespaces in {}", cluster.name))
    }
}

/// Items of every cluster, fetched concurrently; fails on the first error.
pub async fn fetch_per_cluster(
    fetcher: &dyn Fetcher,
    topology: &Topology,
    namespace: Option<&str>,
) -> Result<Vec<(String, Vec<Item>)>> {
    let futs = topology.clusters().iter().map(|c| async move {
        let items = fetcher.fetch(c, namespace).await?;
        Ok::<_, anyhow::Error>((c.name.clone(), items))
    });
    futures::future::try_join_all(futs).await
}

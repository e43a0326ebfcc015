//! Read-only snapshots of the clusters and namespaces currently in scope.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Kubeconfig context backing this cluster, when it differs from `name`.
    pub context: Option<String>,
    /// Namespaces selected for this cluster. `None` means not yet known.
    pub namespaces: Option<Vec<String>>,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), context: None, namespaces: None }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    pub fn context_name(&self) -> &str { self.context.as_deref().unwrap_or(&self.name) }

    /// `Some(listed)` when the namespace list is known, `None` otherwise.
    pub fn lists_namespace(&self, ns: &str) -> Option<bool> {
        self.namespaces.as_ref().map(|list| list.iter().any(|n| n == ns))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub clusters: Vec<Cluster>,
}

impl Topology {
    pub fn new(clusters: Vec<Cluster>) -> Self { Self { clusters } }

    pub fn clusters(&self) -> &[Cluster] { &self.clusters }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn has_cluster(&self, name: &str) -> bool { self.cluster(name).is_some() }

    /// Flattened `(cluster, namespace)` pairs for clusters with known namespaces.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.clusters
            .iter()
            .flat_map(|c| {
                c.namespaces
                    .iter()
                    .flatten()
                    .map(move |ns| Namespace { name: ns.clone(), cluster: c.name.clone() })
            })
            .collect()
    }
}

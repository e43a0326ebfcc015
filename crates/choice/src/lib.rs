//! kinspect choice engine.
//!
//! A selection round fetches (or reuses cached) items for every cluster and
//! namespace in scope, turns them into sorted choices, and either resolves
//! immediately when the count is within bounds or hands the choices to a
//! presenter and waits for the user's pick. Rounds overtaken by an unrelated
//! user action are abandoned silently.

#![forbid(unsafe_code)]

use anyhow::anyhow;
use kinspect_core::{Choice, Cluster, Item};

pub mod cache;
pub mod config;
pub mod filter;
pub mod manager;
pub mod session;
pub mod stages;

pub use cache::ChoiceCache;
pub use config::ChoiceConfig;
pub use filter::filter_choices;
pub use manager::{ChoiceManager, PendingChoice, RoundOutcome, SelectionRequest};
pub use session::{OperationCounter, RoundToken, SelectionSession};
pub use stages::choose_two_stage;

#[derive(Debug, thiserror::Error)]
pub enum ChoiceError {
    #[error("fetch failed for cluster {cluster} namespace {}: {source}", .namespace.as_deref().unwrap_or("(all)"))]
    Fetch {
        cluster: String,
        namespace: Option<String>,
        #[source]
        source: anyhow::Error,
    },
    #[error("listing namespaces failed for cluster {cluster}: {source}")]
    Namespaces {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid selection bounds: min {min} > max {max}")]
    InvalidBounds { min: usize, max: usize },
}

pub type ChoiceResult<T> = Result<T, ChoiceError>;

/// Source of items for one cluster (and optionally one namespace).
///
/// Implementations must hand back a fresh vector; the engine keeps it for
/// caching.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, cluster: &Cluster, namespace: Option<&str>) -> anyhow::Result<Vec<Item>>;

    /// Namespace names of a cluster, used when the topology does not carry them.
    async fn fetch_namespaces(&self, cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        Err(anyhow!("namespace listing not implemented for cluster {}", cluster.name))
    }
}

/// What the presenter receives when a round cannot resolve on its own.
#[derive(Debug, Clone)]
pub struct PresentRequest {
    pub prompt: String,
    pub choices: Vec<Choice>,
    pub min: usize,
    pub max: Option<usize>,
    pub show_sub_items: bool,
    /// Picks from the previous round under the same cache key.
    pub previous_selections: Vec<Choice>,
}

/// UI collaborator for selection rounds.
pub trait ChoicePresenter: Send + Sync {
    fn init_choices(&self, request: PresentRequest);
    /// The round resolved without user input.
    fn skip_choices(&self);
    /// The last pending round was abandoned.
    fn cancel_choice(&self);
}

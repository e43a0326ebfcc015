//! Selection rounds: fetch or reuse items, build choices, auto-resolve or
//! present them.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use kinspect_core::{Choice, ChoiceData, Cluster, Item, Topology};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ChoiceConfig;
use crate::session::{OperationCounter, RoundToken, SelectionSession};
use crate::{ChoiceError, ChoicePresenter, ChoiceResult, Fetcher, PresentRequest};

/// Parameters of one selection round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Plural noun shown in the prompt ("services", "namespaces").
    pub label: String,
    pub min: usize,
    /// `None` leaves the upper bound open; such rounds always present.
    pub max: Option<usize>,
    pub namespace_scoped: bool,
    pub cached: bool,
    /// Semantic source of the items; defaults to `label`.
    pub cache_key: Option<String>,
    /// Extra fields shown after title, namespace and cluster.
    pub identity_fields: Vec<String>,
    pub show_sub_items: bool,
}

impl SelectionRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            min: 0,
            max: None,
            namespace_scoped: false,
            cached: true,
            cache_key: None,
            identity_fields: Vec::new(),
            show_sub_items: false,
        }
    }

    pub fn min(mut self, n: usize) -> Self {
        self.min = n;
        self
    }

    pub fn max(mut self, n: usize) -> Self {
        self.max = Some(n);
        self
    }

    pub fn exactly(self, n: usize) -> Self { self.min(n).max(n) }

    pub fn namespace_scoped(mut self, scoped: bool) -> Self {
        self.namespace_scoped = scoped;
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn identity_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn show_sub_items(mut self, show: bool) -> Self {
        self.show_sub_items = show;
        self
    }

    pub fn effective_cache_key(&self) -> &str { self.cache_key.as_deref().unwrap_or(&self.label) }

    /// Whether `count` choices can be taken as the selection without asking.
    pub fn accepts(&self, count: usize) -> bool {
        match self.max {
            Some(max) => self.min <= count && count <= max,
            None => false,
        }
    }

    pub fn prompt(&self) -> String {
        let label = &self.label;
        match (self.min, self.max) {
            (0, None) => format!("Choose {}", label),
            (min, None) => format!("Choose at least {} {}", min, label),
            (0, Some(max)) => format!("Choose up to {} {}", max, label),
            (min, Some(max)) if min == max => format!("Choose exactly {} {}", min, label),
            (min, Some(max)) => format!("Choose at least {}, up to {} {}", min, max, label),
        }
    }

    fn validate(&self) -> ChoiceResult<()> {
        match self.max {
            Some(max) if self.min > max => Err(ChoiceError::InvalidBounds { min: self.min, max }),
            _ => Ok(()),
        }
    }
}

/// Handle on a round handed to the presenter.
#[derive(Debug)]
pub struct PendingChoice {
    rx: oneshot::Receiver<Vec<Choice>>,
}

impl PendingChoice {
    /// Resolves with the user's picks, or `None` when the pick was cancelled
    /// or superseded by a newer presented round.
    pub async fn wait(self) -> Option<Vec<Choice>> { self.rx.await.ok() }
}

#[derive(Debug)]
pub enum RoundOutcome {
    AutoResolved(Vec<Choice>),
    Presented(PendingChoice),
    /// Overtaken by an unrelated user action.
    Cancelled,
}

impl RoundOutcome {
    pub async fn resolved(self) -> Option<Vec<Choice>> {
        match self {
            RoundOutcome::AutoResolved(c) => Some(c),
            RoundOutcome::Presented(p) => p.wait().await,
            RoundOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, RoundOutcome::Cancelled) }
}

#[derive(Clone)]
pub struct ChoiceManager {
    session: Arc<SelectionSession>,
}

enum Fetched {
    Items(Vec<(String, Option<String>, Vec<Item>)>),
    Stale,
}

impl ChoiceManager {
    pub fn new(config: ChoiceConfig, operation: OperationCounter, topology: Topology) -> Self {
        Self { session: Arc::new(SelectionSession::new(config, operation, topology)) }
    }

    pub fn with_session(session: Arc<SelectionSession>) -> Self { Self { session } }

    pub fn session(&self) -> &Arc<SelectionSession> { &self.session }

    /// Run one selection round.
    ///
    /// Stale rounds are not errors: they return `Cancelled`, and the presenter's
    /// cancel hook fires once the last pending round has been abandoned.
    pub async fn request_selection(
        &self,
        fetcher: &dyn Fetcher,
        presenter: &dyn ChoicePresenter,
        request: &SelectionRequest,
    ) -> ChoiceResult<RoundOutcome> {
        request.validate()?;
        let t0 = Instant::now();
        let token = self.session.operation().token();
        self.session.begin_round();
        let cache_key = request.effective_cache_key().to_string();
        let cache_enabled = request.cached && !self.session.config().cache_disabled;
        debug!(label = %request.label, key = %cache_key, cache_enabled, op = token.snapshot(), "choice: round start");

        let previous_selections = {
            let mut st = self.session.state();
            let same_key = st.last_cache_key.as_deref() == Some(cache_key.as_str());
            if request.cached && !same_key {
                st.selections.clear();
            }
            st.last_cache_key = Some(cache_key.clone());
            if same_key { st.selections.clone() } else { Vec::new() }
        };

        let fetched = match self.gather(fetcher, request, &cache_key, cache_enabled, &token).await {
            Ok(f) => f,
            Err(e) => {
                self.session.end_round();
                counter!("choice_rounds_total", 1u64, "outcome" => "error");
                warn!(label = %request.label, error = %e, "choice: round failed");
                return Err(e);
            }
        };
        let buckets = match fetched {
            Fetched::Items(b) => b,
            Fetched::Stale => return Ok(self.abandon(presenter, request)),
        };

        let choices = build_choices(buckets, &request.identity_fields);

        if request.accepts(choices.len()) {
            self.session.state().selections = choices.clone();
            presenter.skip_choices();
            self.finish(request, "auto", choices.len(), t0);
            return Ok(RoundOutcome::AutoResolved(choices));
        }

        if token.is_stale() {
            return Ok(self.abandon(presenter, request));
        }

        let (tx, rx) = oneshot::channel();
        // replacing the sender drops any older waiter
        self.session.state().pending_pick = Some(tx);
        let count = choices.len();
        presenter.init_choices(PresentRequest {
            prompt: request.prompt(),
            choices,
            min: request.min,
            max: request.max,
            show_sub_items: request.show_sub_items,
            previous_selections,
        });
        self.finish(request, "presented", count, t0);
        Ok(RoundOutcome::Presented(PendingChoice { rx }))
    }

    /// Store the user's picks and wake the presented round, if any.
    /// Returns whether a round was waiting.
    pub fn submit_choices(&self, picks: Vec<Choice>) -> bool {
        let mut st = self.session.state();
        st.selections = picks.clone();
        match st.pending_pick.take() {
            Some(tx) => tx.send(picks).is_ok(),
            None => false,
        }
    }

    /// Drop the presented round; its `PendingChoice` resolves to `None`.
    pub fn cancel_choices(&self) {
        if self.session.state().pending_pick.take().is_some() {
            debug!("choice: user cancelled");
        }
    }

    pub fn selections(&self) -> Vec<Choice> { self.session.selections() }

    fn finish(&self, request: &SelectionRequest, outcome: &'static str, count: usize, t0: Instant) {
        self.session.end_round();
        self.session.rearm_idle_timer();
        counter!("choice_rounds_total", 1u64, "outcome" => outcome);
        info!(label = %request.label, outcome, count, took_ms = %t0.elapsed().as_millis(), "choice: round done");
    }

    fn abandon(&self, presenter: &dyn ChoicePresenter, request: &SelectionRequest) -> RoundOutcome {
        let remaining = self.session.end_round();
        counter!("choice_rounds_total", 1u64, "outcome" => "cancelled");
        debug!(label = %request.label, remaining, "choice: round abandoned");
        if remaining == 0 {
            presenter.cancel_choice();
        }
        RoundOutcome::Cancelled
    }

    async fn gather(
        &self,
        fetcher: &dyn Fetcher,
        request: &SelectionRequest,
        cache_key: &str,
        cache_enabled: bool,
        token: &RoundToken,
    ) -> ChoiceResult<Fetched> {
        let topology = self.session.topology();
        let mut out = Vec::new();
        for cluster in topology.clusters() {
            if request.namespace_scoped {
                let namespaces = match &cluster.namespaces {
                    Some(list) => list.clone(),
                    None => {
                        if token.is_stale() { return Ok(Fetched::Stale); }
                        let list = fetcher
                            .fetch_namespaces(cluster)
                            .await
                            .map_err(|source| ChoiceError::Namespaces { cluster: cluster.name.clone(), source })?;
                        if token.is_stale() { return Ok(Fetched::Stale); }
                        list
                    }
                };
                for ns in namespaces {
                    let cached = {
                        let mut st = self.session.state();
                        st.cache.invalidate_if_stale(cache_key, &topology, cache_enabled, true);
                        if cache_enabled { st.cache.get(cache_key, &cluster.name, &ns).map(<[Item]>::to_vec) } else { None }
                    };
                    let items = match cached {
                        Some(items) => {
                            counter!("choice_cache_hits_total", 1u64);
                            items
                        }
                        None => {
                            counter!("choice_cache_misses_total", 1u64);
                            let Some(items) = self.fetch_one(fetcher, cluster, Some(&ns), token).await? else {
                                return Ok(Fetched::Stale);
                            };
                            if cache_enabled {
                                self.session.state().cache.put(cache_key, &cluster.name, &ns, items.clone());
                            }
                            items
                        }
                    };
                    out.push((cluster.name.clone(), Some(ns), items));
                }
            } else {
                let cached = {
                    let mut st = self.session.state();
                    st.cache.invalidate_if_stale(cache_key, &topology, cache_enabled, false);
                    if cache_enabled { st.cache.get_cluster(cache_key, &cluster.name) } else { None }
                };
                let buckets = match cached {
                    Some(b) => {
                        counter!("choice_cache_hits_total", 1u64);
                        b
                    }
                    None => {
                        counter!("choice_cache_misses_total", 1u64);
                        let Some(items) = self.fetch_one(fetcher, cluster, None, token).await? else {
                            return Ok(Fetched::Stale);
                        };
                        let buckets = bucket_by_namespace(items);
                        if cache_enabled {
                            self.session.state().cache.put_cluster(cache_key, &cluster.name, buckets.clone());
                        }
                        let mut sorted: Vec<(String, Vec<Item>)> = buckets.into_iter().collect();
                        sorted.sort_by(|a, b| a.0.cmp(&b.0));
                        sorted
                    }
                };
                for (ns, items) in buckets {
                    let ns = if ns.is_empty() { None } else { Some(ns) };
                    out.push((cluster.name.clone(), ns, items));
                }
            }
        }
        Ok(Fetched::Items(out))
    }

    /// `Ok(None)` when the round went stale around the fetch.
    async fn fetch_one(
        &self,
        fetcher: &dyn Fetcher,
        cluster: &Cluster,
        namespace: Option<&str>,
        token: &RoundToken,
    ) -> ChoiceResult<Option<Vec<Item>>> {
        if token.is_stale() { return Ok(None); }
        let t0 = Instant::now();
        let res = fetcher.fetch(cluster, namespace).await;
        histogram!("choice_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let items = res.map_err(|source| ChoiceError::Fetch {
            cluster: cluster.name.clone(),
            namespace: namespace.map(str::to_string),
            source,
        })?;
        if token.is_stale() {
            debug!(cluster = %cluster.name, "choice: fetch result discarded, round is stale");
            return Ok(None);
        }
        debug!(cluster = %cluster.name, namespace = ?namespace, count = items.len(), took_ms = %t0.elapsed().as_millis(), "choice: fetched");
        Ok(Some(items))
    }
}

fn bucket_by_namespace(items: Vec<Item>) -> FxHashMap<String, Vec<Item>> {
    let mut buckets: FxHashMap<String, Vec<Item>> = FxHashMap::default();
    for item in items {
        let ns = item.namespace().unwrap_or_default().to_string();
        buckets.entry(ns).or_default().push(item);
    }
    buckets
}

fn title_of(item: &Item, fields: &[String]) -> String {
    let name = item.name();
    if name.is_empty() { item.name_by(fields) } else { name }
}

pub(crate) fn build_choices(buckets: Vec<(String, Option<String>, Vec<Item>)>, fields: &[String]) -> Vec<Choice> {
    let mut choices = Vec::new();
    for (cluster, namespace, items) in buckets {
        for item in items {
            let title = title_of(&item, fields);
            let extracted: SmallVec<[(String, String); 4]> = fields
                .iter()
                .filter(|f| f.as_str() != "name")
                .filter_map(|f| item.field_text(f).map(|v| (f.clone(), v)))
                .collect();
            let mut display: SmallVec<[String; 4]> = SmallVec::new();
            display.push(title.clone());
            display.push(namespace.clone().unwrap_or_default());
            display.push(cluster.clone());
            display.extend(extracted.iter().map(|(_, v)| v.clone()));
            choices.push(Choice {
                display,
                data: ChoiceData { title, namespace: namespace.clone(), cluster: cluster.clone(), item, fields: extracted },
            });
        }
    }
    choices.sort_by(compare_choices);
    choices
}

/// Primary display key, case-insensitive first, then namespace.
fn compare_choices(a: &Choice, b: &Choice) -> Ordering {
    let (pa, pb) = (a.primary(), b.primary());
    pa.to_lowercase()
        .cmp(&pb.to_lowercase())
        .then_with(|| pa.cmp(pb))
        .then_with(|| a.secondary().cmp(b.secondary()))
}

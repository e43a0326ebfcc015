#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kinspect_choice::{
    choose_two_stage, ChoiceConfig, ChoiceError, ChoiceManager, ChoicePresenter, Fetcher, OperationCounter,
    PresentRequest, RoundOutcome, SelectionRequest,
};
use kinspect_core::{Choice, Cluster, Item, Topology};
use serde_json::json;
use tokio::sync::Semaphore;

fn named(name: &str) -> Item { Item::try_from_value(json!({ "metadata": { "name": name } })).unwrap() }

fn named_in(name: &str, ns: &str) -> Item {
    Item::try_from_value(json!({ "metadata": { "name": name, "namespace": ns } })).unwrap()
}

type Key = (String, Option<String>);

#[derive(Default)]
struct MapFetcher {
    data: HashMap<Key, Vec<Item>>,
    namespaces: HashMap<String, Vec<String>>,
    fail: Option<Key>,
    calls: AtomicUsize,
}

impl MapFetcher {
    fn with(mut self, cluster: &str, ns: Option<&str>, items: Vec<Item>) -> Self {
        self.data.insert((cluster.to_string(), ns.map(str::to_string)), items);
        self
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, cluster: &Cluster, namespace: Option<&str>) -> anyhow::Result<Vec<Item>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (cluster.name.clone(), namespace.map(str::to_string));
        if self.fail.as_ref() == Some(&key) {
            anyhow::bail!("apiserver unavailable");
        }
        Ok(self.data.get(&key).cloned().unwrap_or_default())
    }

    async fn fetch_namespaces(&self, cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        self.namespaces.get(&cluster.name).cloned().ok_or_else(|| anyhow::anyhow!("no namespaces for {}", cluster.name))
    }
}

/// Blocks inside `fetch` until released.
struct GatedFetcher {
    items: Vec<Item>,
    entered: Semaphore,
    release: Semaphore,
}

impl GatedFetcher {
    fn new(items: Vec<Item>) -> Self { Self { items, entered: Semaphore::new(0), release: Semaphore::new(0) } }
}

#[async_trait::async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, _cluster: &Cluster, _namespace: Option<&str>) -> anyhow::Result<Vec<Item>> {
        self.entered.add_permits(1);
        self.release.acquire().await?.forget();
        Ok(self.items.clone())
    }
}

#[derive(Default)]
struct Presenter {
    inits: Mutex<Vec<PresentRequest>>,
    skips: AtomicUsize,
    cancels: AtomicUsize,
    /// When set, answers every presentation with the first `max(min, 1)` choices.
    auto_pick: Mutex<Option<ChoiceManager>>,
}

impl Presenter {
    fn picking(manager: &ChoiceManager) -> Self {
        let p = Self::default();
        *p.auto_pick.lock().unwrap() = Some(manager.clone());
        p
    }

    fn inits(&self) -> usize { self.inits.lock().unwrap().len() }
    fn last_init(&self) -> PresentRequest { self.inits.lock().unwrap().last().cloned().unwrap() }
    fn skips(&self) -> usize { self.skips.load(Ordering::SeqCst) }
    fn cancels(&self) -> usize { self.cancels.load(Ordering::SeqCst) }
}

impl ChoicePresenter for Presenter {
    fn init_choices(&self, request: PresentRequest) {
        let n = request.min.max(1);
        let picks: Vec<Choice> = request.choices.iter().take(n).cloned().collect();
        self.inits.lock().unwrap().push(request);
        if let Some(m) = self.auto_pick.lock().unwrap().as_ref() {
            m.submit_choices(picks);
        }
    }

    fn skip_choices(&self) { self.skips.fetch_add(1, Ordering::SeqCst); }

    fn cancel_choice(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
}

fn one_cluster() -> Topology { Topology::new(vec![Cluster::new("c1")]) }

fn manager(topology: Topology) -> ChoiceManager {
    ChoiceManager::new(ChoiceConfig::default(), OperationCounter::new(), topology)
}

#[tokio::test]
async fn auto_resolve_boundary_exactly_two() {
    for (count, expect_skip) in [(1usize, false), (2, true), (3, false)] {
        let m = manager(one_cluster());
        let items = (0..count).map(|i| named(&format!("svc-{}", i))).collect();
        let f = MapFetcher::default().with("c1", None, items);
        let p = Presenter::default();
        let req = SelectionRequest::new("services").exactly(2);

        let out = m.request_selection(&f, &p, &req).await.unwrap();
        if expect_skip {
            assert!(matches!(out, RoundOutcome::AutoResolved(ref c) if c.len() == 2));
            assert_eq!((p.skips(), p.inits()), (1, 0), "count={}", count);
            assert_eq!(m.selections().len(), 2);
        } else {
            assert!(matches!(out, RoundOutcome::Presented(_)));
            assert_eq!((p.skips(), p.inits()), (0, 1), "count={}", count);
            assert_eq!(p.last_init().prompt, "Choose exactly 2 services");
        }
        assert_eq!(m.session().pending(), 0);
    }
}

#[tokio::test]
async fn overtaken_round_is_abandoned_without_caching() {
    let ops = OperationCounter::new();
    let m = ChoiceManager::new(ChoiceConfig::default(), ops.clone(), one_cluster());
    let gated = Arc::new(GatedFetcher::new(vec![named("stale")]));
    let p = Arc::new(Presenter::default());
    let req = SelectionRequest::new("services").exactly(1);

    let first = {
        let (m, f, p, req) = (m.clone(), gated.clone(), p.clone(), req.clone());
        tokio::spawn(async move { m.request_selection(&*f, &*p, &req).await })
    };
    gated.entered.acquire().await.unwrap().forget();
    assert_eq!(m.session().pending(), 1);

    // unrelated user action, then a fresh round that needs the user
    ops.bump();
    let fresh = MapFetcher::default().with("c1", None, vec![named("a"), named("b")]);
    let second = m.request_selection(&fresh, &*p, &req).await.unwrap();
    assert!(matches!(second, RoundOutcome::Presented(_)));
    assert_eq!(p.cancels(), 0);

    gated.release.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert!(first.is_cancelled());
    assert_eq!(p.inits(), 1);
    assert_eq!(p.skips(), 0);
    assert_eq!(p.cancels(), 1);
    assert_eq!(m.session().pending(), 0);

    let cached: Vec<String> = m.session().cached_items("services", "c1", "").unwrap().iter().map(Item::name).collect();
    assert_eq!(cached, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn cancel_fires_once_for_the_last_stale_round() {
    let ops = OperationCounter::new();
    let m = ChoiceManager::new(ChoiceConfig::default(), ops.clone(), one_cluster());
    let gated = Arc::new(GatedFetcher::new(vec![named("x")]));
    let p = Arc::new(Presenter::default());
    let req = SelectionRequest::new("services");

    let mut handles = Vec::new();
    for _ in 0..2 {
        let (m, f, p, req) = (m.clone(), gated.clone(), p.clone(), req.clone());
        handles.push(tokio::spawn(async move { m.request_selection(&*f, &*p, &req).await }));
    }
    gated.entered.acquire_many(2).await.unwrap().forget();
    assert_eq!(m.session().pending(), 2);

    ops.bump();
    gated.release.add_permits(2);
    for h in handles {
        assert!(h.await.unwrap().unwrap().is_cancelled());
    }
    assert_eq!(p.cancels(), 1);
    assert_eq!(p.inits() + p.skips(), 0);
    assert_eq!(m.session().pending(), 0);
}

#[tokio::test]
async fn failed_fetch_leaves_no_entry_for_its_namespace() {
    let topo = Topology::new(vec![Cluster::new("c1").with_namespaces(["ok", "bad"])]);
    let m = manager(topo);
    let mut f = MapFetcher::default().with("c1", Some("ok"), vec![named("svc")]);
    f.fail = Some(("c1".to_string(), Some("bad".to_string())));
    let p = Presenter::default();
    let req = SelectionRequest::new("services").namespace_scoped(true).exactly(1);

    let err = m.request_selection(&f, &p, &req).await.unwrap_err();
    match &err {
        ChoiceError::Fetch { cluster, namespace, .. } => {
            assert_eq!(cluster, "c1");
            assert_eq!(namespace.as_deref(), Some("bad"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("apiserver unavailable"));
    assert!(m.session().cached_items("services", "c1", "ok").is_some());
    assert!(m.session().cached_items("services", "c1", "bad").is_none());
    assert_eq!(m.session().pending(), 0);
    assert_eq!(p.inits() + p.skips() + p.cancels(), 0);
}

#[tokio::test]
async fn namespace_list_is_fetched_lazily() {
    let m = manager(one_cluster());
    let mut f = MapFetcher::default()
        .with("c1", Some("a"), vec![named("one")])
        .with("c1", Some("b"), vec![named("two")]);
    f.namespaces.insert("c1".into(), vec!["a".into(), "b".into()]);
    let p = Presenter::default();
    let req = SelectionRequest::new("services").namespace_scoped(true).max(5);

    let out = m.request_selection(&f, &p, &req).await.unwrap();
    let RoundOutcome::AutoResolved(choices) = out else { panic!("expected auto resolve") };
    let ns: Vec<_> = choices.iter().map(|c| c.data.namespace.clone().unwrap()).collect();
    assert_eq!(ns, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(f.calls(), 2);
}

#[tokio::test]
async fn cache_is_reused_until_key_changes() {
    let m = manager(one_cluster());
    let f = MapFetcher::default().with("c1", None, vec![named_in("web", "prod"), named_in("api", "dev")]);
    let p = Presenter::default();
    let svc = SelectionRequest::new("services").max(2);

    m.request_selection(&f, &p, &svc).await.unwrap();
    m.request_selection(&f, &p, &svc).await.unwrap();
    assert_eq!(f.calls(), 1);
    assert_eq!(m.session().cached_items("services", "c1", "prod").map(|v| v.len()), Some(1));

    let other = SelectionRequest::new("services").cache_key("services-v2").max(2);
    m.request_selection(&f, &p, &other).await.unwrap();
    assert_eq!(f.calls(), 2);
    assert!(m.session().cached_items("services", "c1", "prod").is_none());

    let uncached = other.clone().cached(false);
    m.request_selection(&f, &p, &uncached).await.unwrap();
    m.request_selection(&f, &p, &uncached).await.unwrap();
    assert_eq!(f.calls(), 4);
}

#[tokio::test]
async fn removed_cluster_is_dropped_from_cache() {
    let m = manager(Topology::new(vec![Cluster::new("c1"), Cluster::new("c2")]));
    let f = MapFetcher::default().with("c1", None, vec![named("a")]).with("c2", None, vec![named("b")]);
    let p = Presenter::default();
    let req = SelectionRequest::new("services").max(2);

    m.request_selection(&f, &p, &req).await.unwrap();
    assert!(m.session().cached_items("services", "c2", "").is_some());

    m.session().set_topology(one_cluster());
    let out = m.request_selection(&f, &p, &req).await.unwrap().resolved().await.unwrap();
    assert_eq!(out.len(), 1);
    assert!(m.session().cached_items("services", "c2", "").is_none());
    assert_eq!(f.calls(), 2);
}

#[tokio::test]
async fn previous_selections_follow_the_cache_key() {
    let m = manager(one_cluster());
    let f = MapFetcher::default().with("c1", None, vec![named("a"), named("b"), named("c")]);
    let p = Presenter::picking(&m);
    let svc = SelectionRequest::new("services").min(1);

    let picks = m.request_selection(&f, &p, &svc).await.unwrap().resolved().await.unwrap();
    assert_eq!(picks.len(), 1);
    assert!(p.last_init().previous_selections.is_empty());

    m.request_selection(&f, &p, &svc).await.unwrap();
    assert_eq!(p.last_init().previous_selections, picks);

    let pods = SelectionRequest::new("pods").min(1);
    m.request_selection(&f, &p, &pods).await.unwrap();
    assert!(p.last_init().previous_selections.is_empty());
}

#[tokio::test]
async fn user_cancel_resolves_pending_to_none() {
    let m = manager(one_cluster());
    let f = MapFetcher::default().with("c1", None, vec![named("a"), named("b")]);
    let p = Presenter::default();
    let req = SelectionRequest::new("services").exactly(1);

    let out = m.request_selection(&f, &p, &req).await.unwrap();
    m.cancel_choices();
    assert!(out.resolved().await.is_none());
    assert!(!m.submit_choices(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn idle_timer_clears_cache_and_restarts_per_round() {
    let config = ChoiceConfig::default().with_idle_eviction(Duration::from_millis(1000));
    let m = ChoiceManager::new(config, OperationCounter::new(), one_cluster());
    let f = MapFetcher::default().with("c1", None, vec![named("a")]);
    let p = Presenter::default();
    let req = SelectionRequest::new("services").exactly(1);

    m.request_selection(&f, &p, &req).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!m.session().cache_is_empty());

    // a completed round restarts the countdown
    m.request_selection(&f, &p, &req).await.unwrap();
    assert_eq!(f.calls(), 1);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!m.session().cache_is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(m.session().cache_is_empty());

    m.request_selection(&f, &p, &req).await.unwrap();
    assert_eq!(f.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_survives_an_overtaken_round() {
    let ops = OperationCounter::new();
    let config = ChoiceConfig::default().with_idle_eviction(Duration::from_millis(1000));
    let m = ChoiceManager::new(config, ops.clone(), one_cluster());
    let p = Arc::new(Presenter::default());
    let req = SelectionRequest::new("services").exactly(1);

    let f = MapFetcher::default().with("c1", None, vec![named("a")]);
    m.request_selection(&f, &*p, &req).await.unwrap();
    assert!(m.session().cached_items("services", "c1", "").is_some());

    // same key, a new cluster to fetch; the user moves on mid-fetch
    m.session().set_topology(Topology::new(vec![Cluster::new("c1"), Cluster::new("c2")]));
    let gated = Arc::new(GatedFetcher::new(vec![named("b")]));
    let round = {
        let (m, f, p, req) = (m.clone(), gated.clone(), p.clone(), req.clone());
        tokio::spawn(async move { m.request_selection(&*f, &*p, &req).await })
    };
    gated.entered.acquire().await.unwrap().forget();
    ops.bump();
    gated.release.add_permits(1);
    assert!(round.await.unwrap().unwrap().is_cancelled());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(m.session().cache_is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_waits_for_a_round_in_flight() {
    let config = ChoiceConfig::default().with_idle_eviction(Duration::from_millis(1000));
    let m = ChoiceManager::new(config, OperationCounter::new(), one_cluster());
    let p = Arc::new(Presenter::default());
    let req = SelectionRequest::new("services").exactly(1);

    let f = MapFetcher::default().with("c1", None, vec![named("a")]);
    m.request_selection(&f, &*p, &req).await.unwrap();

    m.session().set_topology(Topology::new(vec![Cluster::new("c1"), Cluster::new("c2")]));
    let gated = Arc::new(GatedFetcher::new(vec![named("b")]));
    let round = {
        let (m, f, p, req) = (m.clone(), gated.clone(), p.clone(), req.clone());
        tokio::spawn(async move { m.request_selection(&*f, &*p, &req).await })
    };
    gated.entered.acquire().await.unwrap().forget();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!m.session().cache_is_empty());

    gated.release.add_permits(1);
    assert!(matches!(round.await.unwrap().unwrap(), RoundOutcome::Presented(_)));
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!m.session().cache_is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(m.session().cache_is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_survives_a_failed_round() {
    let config = ChoiceConfig::default().with_idle_eviction(Duration::from_millis(1000));
    let m = ChoiceManager::new(config, OperationCounter::new(), one_cluster());
    let p = Presenter::default();
    let req = SelectionRequest::new("services").exactly(1);

    let f = MapFetcher::default().with("c1", None, vec![named("a")]);
    m.request_selection(&f, &p, &req).await.unwrap();

    m.session().set_topology(Topology::new(vec![Cluster::new("c1"), Cluster::new("c2")]));
    let mut failing = MapFetcher::default();
    failing.fail = Some(("c2".to_string(), None));
    assert!(m.request_selection(&failing, &p, &req).await.is_err());
    assert!(!m.session().cache_is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(m.session().cache_is_empty());
}

#[tokio::test]
async fn two_stage_feeds_first_picks_into_second_round() {
    let m = manager(Topology::new(vec![Cluster::new("c1").with_namespaces(Vec::<String>::new())]));
    let f = MapFetcher::default()
        .with("c1", None, vec![Item::identity("prod"), Item::identity("dev")])
        .with("c1", Some("prod"), vec![named("web"), named("api")])
        .with("c1", Some("dev"), vec![named("dev-only")]);
    let p = Presenter::picking(&m);

    let namespaces = SelectionRequest::new("namespaces").min(1);
    let first = m.request_selection(&f, &p, &namespaces);
    let second = |picked: Vec<Choice>| {
        let names: Vec<String> = picked.iter().map(|c| c.data.title.clone()).collect();
        m.session().set_topology(Topology::new(vec![Cluster::new("c1").with_namespaces(names)]));
        let req = SelectionRequest::new("services").namespace_scoped(true).max(10);
        let (m, f, p) = (m.clone(), &f, &p);
        async move { m.request_selection(f, p, &req).await }
    };
    let result = choose_two_stage(first, second, |ns, svcs| {
        (ns[0].data.title.clone(), svcs.iter().map(|c| c.data.title.clone()).collect::<Vec<_>>())
    })
    .await
    .unwrap();

    // "dev" sorts before "prod", so the first pick is dev
    assert_eq!(result, Some(("dev".to_string(), vec!["dev-only".to_string()])));
}

#[tokio::test]
async fn two_stage_stops_when_first_round_is_cancelled() {
    let m = manager(one_cluster());
    let f = MapFetcher::default().with("c1", None, vec![named("a"), named("b")]);
    let p = Presenter::default();
    let req = SelectionRequest::new("services").exactly(1);

    let first = async {
        let out = m.request_selection(&f, &p, &req).await;
        m.cancel_choices();
        out
    };
    let second_called = AtomicUsize::new(0);
    let result = choose_two_stage(
        first,
        |_picks| {
            second_called.fetch_add(1, Ordering::SeqCst);
            async { Ok(RoundOutcome::Cancelled) }
        },
        |_a, _b| (),
    )
    .await
    .unwrap();
    assert!(result.is_none());
    assert_eq!(second_called.load(Ordering::SeqCst), 0);
}

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kinspect_choice::{ChoiceConfig, ChoiceManager, Fetcher, OperationCounter, RoundOutcome, SelectionRequest};
use kinspect_core::{Choice, Item, Output, Topology};
use kinspect_diff::envoy::Side;
use kinspect_diff::table::{self, listener_table, presence_table, reconciliation_table};
use kinspect_diff::{compare_listeners, reconcile, CompareOpts, IdentityOpts, ListenerDiff};
use tokio::signal;
use tracing::{error, info, warn};

mod dump;
mod term;

use dump::ProxyKind;
use term::{parse_picks, TerminalPresenter, TerminalSink};

/// Bookkeeping fields that differ between any two live objects.
const DEFAULT_IGNORE: [&str; 6] = ["uid", "resourceVersion", "creationTimestamp", "generation", "managedFields", "lastUpdated"];

#[derive(Parser, Debug)]
#[command(name = "kinspect", version, about = "Compare Kubernetes and Istio state across clusters")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Format::Human)]
    output: Format,

    /// Kubeconfig contexts to inspect, one cluster each (default: all contexts)
    #[arg(long = "context", global = true, value_delimiter = ',')]
    contexts: Vec<String>,

    /// Restrict to these namespaces
    #[arg(long = "ns", global = true, value_delimiter = ',')]
    namespaces: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Format { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List kubeconfig contexts
    Contexts,
    /// Discover served resources (incl. CRDs) on the first context
    Discover,
    /// Namespace presence matrix across contexts
    Namespaces,
    /// Reconcile one resource kind: the first context against each other one
    Compare {
        /// GVK key, e.g. "v1/Service" or "networking.istio.io/v1beta1/VirtualService"
        #[arg(long = "gvk")]
        gvk: String,
        /// Identity fields tried in order (default: name)
        #[arg(long = "id-field")]
        id_fields: Vec<String>,
        /// Extra keys to ignore at every depth
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },
    /// Pick objects interactively and show where they differ
    Choose {
        #[arg(long = "gvk")]
        gvk: String,
        #[arg(long = "min", default_value_t = 2)]
        min: usize,
        #[arg(long = "max")]
        max: Option<usize>,
        /// Fuzzy filter over the listed choices (supports ns:NAME and c:NAME)
        #[arg(long = "filter")]
        filter: Option<String>,
        /// Extra fields shown next to each choice
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },
    /// Compare two Envoy config dumps (admin config_dump or istioctl JSON)
    ProxyConfig {
        #[arg(value_enum)]
        kind: ProxyKind,
        first: PathBuf,
        second: PathBuf,
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Contexts => "contexts",
            Commands::Discover => "discover",
            Commands::Namespaces => "namespaces",
            Commands::Compare { .. } => "compare",
            Commands::Choose { .. } => "choose",
            Commands::ProxyConfig { .. } => "proxy-config",
        }
    }
}

/// Logs go to stderr; stdout carries the tables.
fn init_tracing() {
    let filter = std::env::var("KINSPECT_LOG")
        .ok()
        .and_then(|v| tracing_subscriber::EnvFilter::from_str(&v).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Prometheus endpoint for `KINSPECT_METRICS_ADDR`; metrics are no-ops without it.
fn init_metrics() {
    let Ok(addr) = std::env::var("KINSPECT_METRICS_ADDR") else { return; };
    let sock = match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => sock,
        Err(e) => {
            warn!(addr = %addr, error = %e, "metrics: KINSPECT_METRICS_ADDR is not host:port");
            return;
        }
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(()) => info!(addr = %sock, "metrics: exporter listening"),
        Err(e) => warn!(error = %e, "metrics: exporter not installed"),
    }
}

fn compare_opts(extra: &[String]) -> CompareOpts {
    CompareOpts::new().ignore_keys(DEFAULT_IGNORE).ignore_keys(extra.iter().cloned())
}

fn resolve_contexts(cli: &Cli) -> Result<Vec<String>> {
    if !cli.contexts.is_empty() {
        return Ok(cli.contexts.clone());
    }
    kinspect_kubehub::list_contexts()
}

fn topology(cli: &Cli) -> Result<Topology> {
    let contexts = resolve_contexts(cli)?;
    let ns = if cli.namespaces.is_empty() { None } else { Some(cli.namespaces.as_slice()) };
    Ok(kinspect_kubehub::topology_for_contexts(&contexts, ns))
}

/// Choices of the resolved round grouped per cluster, in topology order.
fn group_by_cluster(topology: &Topology, choices: &[Choice]) -> Vec<(String, Vec<Choice>)> {
    topology
        .clusters()
        .iter()
        .map(|c| (c.name.clone(), choices.iter().filter(|ch| ch.data.cluster == c.name).cloned().collect()))
        .collect()
}

/// Select everything a fetcher returns; the round always auto-resolves.
async fn select_all(
    manager: &ChoiceManager,
    fetcher: &dyn Fetcher,
    request: SelectionRequest,
) -> Result<Option<Vec<Choice>>> {
    let presenter = TerminalPresenter::new(None);
    let out = manager.request_selection(fetcher, &presenter, &request.max(usize::MAX)).await?;
    Ok(out.resolved().await)
}

async fn read_line() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("joining stdin reader")?
    .context("reading stdin")
}

fn proxy_config(kind: ProxyKind, first: &Path, second: &Path, ignore: &[String]) -> Result<Output> {
    let label = |p: &Path| p.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| p.display().to_string());
    let (first_label, second_label) = (label(first), label(second));
    let a = dump::records(&dump::load(first)?, kind);
    let b = dump::records(&dump::load(second)?, kind);
    info!(kind = ?kind, first = a.len(), second = b.len(), "proxy-config: records loaded");
    let opts = compare_opts(ignore);
    let rec = reconcile(&a, &b, &IdentityOpts::default(), &opts);

    Ok(match kind {
        ProxyKind::Clusters => reconciliation_table(&first_label, &second_label, &rec),
        ProxyKind::Listeners => {
            let mut diffs: Vec<(String, ListenerDiff)> = Vec::new();
            for pair in &rec.changed {
                diffs.push((pair.name.clone(), compare_listeners(&pair.first, &pair.second, &opts)));
            }
            for n in &rec.matching {
                diffs.push((n.name.clone(), ListenerDiff { address_matches: true, listener_filters_match: true, ..Default::default() }));
            }
            for n in &rec.missing_from_b {
                diffs.push((n.name.clone(), ListenerDiff { listener_missing: Some(Side::Second), ..Default::default() }));
            }
            for n in &rec.missing_from_a {
                diffs.push((n.name.clone(), ListenerDiff { listener_missing: Some(Side::First), ..Default::default() }));
            }
            diffs.sort_by(|x, y| x.0.cmp(&y.0));
            listener_table(&first_label, &second_label, &diffs)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let sink = TerminalSink::new(cli.output);
    metrics::counter!("cli_commands_total", 1u64, "command" => cli.command.name());

    match &cli.command {
        Commands::Contexts => {
            let contexts = kinspect_kubehub::list_contexts()?;
            let current = kinspect_kubehub::current_context().unwrap_or(None);
            match cli.output {
                Format::Human => {
                    for c in contexts {
                        let mark = if current.as_deref() == Some(c.as_str()) { "*" } else { " " };
                        println!("{} {}", mark, c);
                    }
                }
                Format::Json => println!("{}", serde_json::to_string_pretty(&contexts)?),
                Format::Yaml => print!("{}", serde_yaml::to_string(&contexts)?),
            }
        }
        Commands::Discover => {
            let contexts = resolve_contexts(&cli)?;
            let ctx = contexts.first().ok_or_else(|| anyhow!("no kubeconfig context available"))?;
            info!(context = %ctx, "discover invoked");
            let client = kinspect_kubehub::client_for_context(ctx).await?;
            match kinspect_kubehub::discover(client).await {
                Ok(resources) => match cli.output {
                    Format::Human => {
                        for r in resources {
                            let scope = if r.namespaced { "namespaced" } else { "cluster" };
                            println!("{} • {}", r.gvk_key(), scope);
                        }
                    }
                    Format::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
                    Format::Yaml => print!("{}", serde_yaml::to_string(&resources)?),
                },
                Err(e) => {
                    error!(error = ?e, "discover failed");
                    eprintln!("discover error: {}", e);
                }
            }
        }
        Commands::Namespaces => {
            let topo = topology(&cli)?;
            let manager = ChoiceManager::new(ChoiceConfig::from_env(), OperationCounter::new(), topo.clone());
            let fetcher = kinspect_kubehub::NamespaceFetcher::new();
            let req = SelectionRequest::new("namespaces").cache_key("namespaces");
            let out = match select_all(&manager, &fetcher, req).await? {
                Some(choices) => {
                    let per_cluster: Vec<(String, Vec<String>)> = group_by_cluster(&topo, &choices)
                        .into_iter()
                        .map(|(c, chs)| (c, chs.into_iter().map(|ch| ch.data.title).collect()))
                        .collect();
                    presence_table("Namespace", &per_cluster)
                }
                None => table::nothing_selected("namespaces"),
            };
            out.emit(&sink);
        }
        Commands::Compare { gvk, id_fields, ignore } => {
            let topo = topology(&cli)?;
            info!(gvk = %gvk, clusters = topo.clusters().len(), "compare invoked");
            if topo.clusters().len() < 2 {
                warn!(clusters = topo.clusters().len(), "compare needs at least two contexts");
                Output::message(table::NOT_ENOUGH_CLUSTERS).emit(&sink);
                return Ok(());
            }
            let fetcher = kinspect_kubehub::KubeFetcher::new(gvk)?;
            let scopes: Vec<Option<&str>> = if cli.namespaces.is_empty() {
                vec![None]
            } else {
                cli.namespaces.iter().map(|n| Some(n.as_str())).collect()
            };
            let mut groups: Vec<(String, Vec<Item>)> = topo.clusters().iter().map(|c| (c.name.clone(), Vec::new())).collect();
            for ns in scopes {
                let fetched = kinspect_kubehub::fetch_per_cluster(&fetcher, &topo, ns).await?;
                for (group, (_, items)) in groups.iter_mut().zip(fetched) {
                    group.1.extend(items);
                }
            }
            let identity = IdentityOpts { fields: id_fields.clone(), ..Default::default() };
            for out in table::compare_clusters(&groups, &identity, &compare_opts(ignore)) {
                out.emit(&sink);
            }
        }
        Commands::Choose { gvk, min, max, filter, fields, ignore } => {
            let topo = topology(&cli)?;
            let ops = OperationCounter::new();
            let manager = ChoiceManager::new(ChoiceConfig::from_env(), ops.clone(), topo);
            let fetcher = kinspect_kubehub::KubeFetcher::new(gvk)?;
            let presenter = TerminalPresenter::new(filter.clone());
            let mut req = SelectionRequest::new(fetcher.gvk().kind.clone())
                .cache_key(gvk.clone())
                .namespace_scoped(!cli.namespaces.is_empty())
                .min(*min)
                .identity_fields(fields.iter().cloned());
            if let Some(m) = max {
                req = req.max(*m);
            }

            let picks = match manager.request_selection(&fetcher, &presenter, &req).await? {
                RoundOutcome::AutoResolved(choices) => Some(choices),
                RoundOutcome::Cancelled => None,
                RoundOutcome::Presented(pending) => {
                    let Some((shown_req, shown)) = presenter.take_shown() else {
                        return Err(anyhow!("presenter lost the presented choices"));
                    };
                    eprint!("> ");
                    tokio::select! {
                        line = read_line() => {
                            let line = line?;
                            if line.trim().is_empty() {
                                manager.cancel_choices();
                            } else {
                                let idx = parse_picks(&line, shown.len(), shown_req.min, shown_req.max)?;
                                manager.submit_choices(idx.into_iter().map(|i| shown[i].clone()).collect());
                            }
                        }
                        _ = signal::ctrl_c() => {
                            info!("Ctrl-C received; cancelling selection");
                            ops.bump();
                            manager.cancel_choices();
                        }
                    }
                    pending.wait().await
                }
            };
            let out = match picks {
                Some(p) if !p.is_empty() => table::compare_selections(&p, &compare_opts(ignore)),
                _ => table::nothing_selected(&fetcher.gvk().kind),
            };
            out.emit(&sink);
        }
        Commands::ProxyConfig { kind, first, second, ignore } => {
            proxy_config(*kind, first, second, ignore)?.emit(&sink);
        }
    }

    Ok(())
}

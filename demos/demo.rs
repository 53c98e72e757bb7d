//! Traffic simulation against a `HitCounter`, printing live counts and
//! process stats in different formats.
//!
//! Run with:
//! ```bash
//! cargo run --example demo --features demo -- --help
//! RUST_LOG=hitcount=debug cargo run --example demo --features demo -- --sites 3 --interval 50
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use hitcount::observers::json::JsonObserver;
use hitcount::observers::prometheus::{MetricType, PrometheusObserver};
use hitcount::observers::table::{CompactSeparator, TableObserver, TableStyle};
use hitcount::{
    Config, HitCounter, SiteId, SiteSnapshot, Stats, StoreBackend, UnknownSitePolicy,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Two-column tables
    Table,
    /// Stats as a multi-column grid
    Compact,
    Json,
    /// Prometheus exposition format
    Prometheus,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Modern,
    Markdown,
    Dots,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Modern => TableStyle::Modern,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Dots => TableStyle::Dots,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum PolicyChoice {
    #[default]
    Reject,
    Accept,
}

impl From<PolicyChoice> for UnknownSitePolicy {
    fn from(choice: PolicyChoice) -> Self {
        match choice {
            PolicyChoice::Reject => UnknownSitePolicy::Reject,
            PolicyChoice::Accept => UnknownSitePolicy::Accept,
        }
    }
}

/// Simulates concurrent visits to a few sites and prints the resulting
/// counts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; command-line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of registered sites
    #[arg(long, default_value = "3")]
    sites: usize,

    /// Distinct visitors per site
    #[arg(long, default_value = "500")]
    visitors: usize,

    /// Concurrent ingestion tasks
    #[arg(long, default_value = "8")]
    tasks: usize,

    /// Events per task
    #[arg(long, default_value = "10000")]
    events: usize,

    /// Flush interval in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// What to do with events for unregistered sites
    #[arg(long, value_enum)]
    policy: Option<PolicyChoice>,

    /// Send every tenth event to an unregistered site
    #[arg(long)]
    stray: bool,

    /// Persist to this redb file instead of memory
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Table style (table/compact formats)
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Columns in compact format
    #[arg(short, long, default_value = "3")]
    columns: usize,

    #[arg(long)]
    pretty: bool,

    /// Prometheus metric namespace
    #[arg(long, default_value = "hitcount")]
    namespace: String,

    /// Prometheus instance label
    #[arg(long)]
    instance: Option<String>,
}

impl Args {
    fn build_config(&self) -> hitcount::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(ms) = self.interval {
            config.sync.interval_ms = ms;
        }
        if let Some(policy) = self.policy {
            config.ingest.unknown_site = policy.into();
        }
        if let Some(db) = &self.db {
            config.store.backend = StoreBackend::Redb;
            config.store.path = db.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Spreads events over sites and visitors with a multiplicative hash so
/// every task revisits the same visitors in a different order.
fn simulate(
    counter: Arc<HitCounter>,
    sites: Arc<Vec<SiteId>>,
    task: usize,
    args: &Args,
) -> tokio::task::JoinHandle<()> {
    let events = args.events;
    let visitors = args.visitors.max(1);
    let stray = args.stray;
    tokio::spawn(async move {
        let stray_site = SiteId::new("unregistered").ok();
        for i in 0..events {
            let n = (task * events + i).wrapping_mul(2_654_435_761);
            let site = match (&stray_site, stray && i % 10 == 0) {
                (Some(stray_site), true) => stray_site,
                _ => &sites[n % sites.len()],
            };
            let visitor = (n >> 8) % visitors;
            let addr = format!(
                "10.{}.{}.{}",
                (visitor >> 16) & 0xff,
                (visitor >> 8) & 0xff,
                visitor & 0xff
            );
            counter.record(site, &addr, "demo-agent/1.0").await;
            if i % 256 == 0 {
                tokio::task::yield_now().await;
            }
        }
    })
}

fn render(args: &Args, sites: &[SiteSnapshot], stats: &Stats) -> String {
    match args.format {
        OutputFormat::Table => {
            let observer = TableObserver::new().with_style(args.style.into());
            format!(
                "{}\n\n{}",
                observer.clone().with_title("Sites").render_sites(sites),
                observer
                    .with_title("Stats")
                    .render(stats.observables().into_iter())
            )
        }
        OutputFormat::Compact => {
            let observer = TableObserver::new().with_style(args.style.into());
            format!(
                "{}\n\n{}",
                observer.clone().render_sites(sites),
                observer
                    .compact(true)
                    .columns(args.columns)
                    .separator(CompactSeparator::Colon)
                    .render(stats.observables().into_iter())
            )
        }
        OutputFormat::Json => {
            let observer = JsonObserver::new()
                .pretty(args.pretty)
                .wrap_in_snapshot(true)
                .include_timestamp(true);
            let sites = observer
                .sites_to_json(sites)
                .unwrap_or_else(|e| format!("Error: {e}"));
            let stats = observer
                .to_json(stats.observables().into_iter())
                .unwrap_or_else(|e| format!("Error: {e}"));
            format!("{sites}\n{stats}")
        }
        OutputFormat::Prometheus => {
            let mut observer = PrometheusObserver::new()
                .with_namespace(&args.namespace)
                .with_help("recorded_total", "Visits buffered")
                .with_help("new_visitors_total", "Visits that raised a unique count")
                .with_help("flushes_total", "Committed flushes")
                .with_help("flush_failures_total", "Flushes restored after a failed commit");
            if let Some(instance) = &args.instance {
                observer = observer.with_const_label("instance", instance);
            }
            let sites = observer
                .render_sites(sites)
                .unwrap_or_else(|e| format!("Error: {e}"));
            let stats = observer
                .with_type("recorded_total", MetricType::Counter)
                .render(stats.observables().into_iter())
                .unwrap_or_else(|e| format!("Error: {e}"));
            format!("{sites}{stats}")
        }
    }
}

#[tokio::main]
async fn main() -> hitcount::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.build_config()?;
    let counter = Arc::new(HitCounter::open(config)?);

    let mut sites = Vec::with_capacity(args.sites.max(1));
    for n in 0..args.sites.max(1) {
        let id = SiteId::new(format!("site{n}"))?;
        counter.register_site(id.clone(), format!("Site {n}")).await?;
        sites.push(id);
    }
    let sites = Arc::new(sites);

    let worker = counter.start();
    let started = Instant::now();
    info!(
        tasks = args.tasks,
        events = args.events,
        sites = sites.len(),
        "simulating traffic"
    );

    let tasks: Vec<_> = (0..args.tasks)
        .map(|task| simulate(Arc::clone(&counter), Arc::clone(&sites), task, &args))
        .collect();
    for task in tasks {
        if let Err(err) = task.await {
            tracing::error!(error = %err, "simulation task failed");
        }
    }

    // One more tick so scheduled flushes show up in the stats.
    tokio::time::sleep(Duration::from_millis(counter.config().sync.interval_ms.min(100))).await;
    let last = worker.shutdown().await?;
    info!(elapsed = ?started.elapsed(), final_flush = ?last, "simulation done");

    let snapshot = counter.live_snapshot(&sites).await;
    for site in sites.iter() {
        if let Some(estimate) = counter.unique_estimate(site).await {
            info!(site = %site, estimate, "sketch estimate");
        }
    }
    println!("{}", render(&args, &snapshot, counter.stats()));
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{self, BackendKind, Config};
use crate::data::InteractionService;
use crate::engine::{Engine, HostCallbacks};
use crate::model::{FeedItem, OrderKey};
use crate::playback::{Generation, MediaSink};
use crate::rest;
use crate::source::{ContentQuery, CursorSource, LatestSource, RandomPoolSource, SourceMode};
use crate::storage;

const DEFAULT_LOG_FILTER: &str = "reel_feed=info";
const WATCH_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    /// Overrides `backend.database_path` and forces the SQLite backend.
    pub database_path: Option<PathBuf>,
    pub watch: Option<Duration>,
    /// Demo items to insert into the SQLite store before loading.
    pub seed: Option<usize>,
}

pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Media sink without a screen: every attached source is ready at once.
struct HeadlessSink {
    ready: Sender<(String, Generation)>,
}

impl MediaSink for HeadlessSink {
    fn attach(&mut self, id: &str, media_ref: &str, generation: Generation) {
        debug!(id, media_ref, ?generation, "attach");
        let _ = self.ready.send((id.to_string(), generation));
    }

    fn detach(&mut self, id: &str) {
        debug!(id, "detach");
    }

    fn play(&mut self, id: &str) {
        info!(id, "playing");
    }

    fn pause(&mut self, id: &str) {
        debug!(id, "pause");
    }

    fn set_muted(&mut self, id: &str, muted: bool) {
        debug!(id, muted, "mute");
    }
}

struct LogHost;

impl HostCallbacks for LogHost {
    fn on_focus_change(&mut self, index: usize, id: &str) {
        info!(index, id, "focus");
    }

    fn on_request_more(&mut self, id: &str) {
        info!(id, "more requested");
    }

    fn on_notice(&mut self, message: &str) {
        warn!(message, "notice");
    }
}

pub fn run(opts: RunOptions) -> Result<()> {
    init_logging();

    let mut cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(path) = opts.database_path.clone() {
        cfg.backend.kind = BackendKind::Sqlite;
        cfg.backend.database_path = Some(path);
    }

    let (query, interactions) = open_backend(&cfg, opts.seed)?;
    let source = build_source(&cfg, query);

    let (ready_tx, ready_rx) = unbounded();
    let options = cfg.engine_options();
    let settle = options.feed.fetch_timeout + Duration::from_secs(1);
    let mut engine = Engine::new(
        source,
        interactions,
        Box::new(HeadlessSink { ready: ready_tx }),
        Box::new(LogHost),
        options,
    );

    engine.start();
    if !engine.wait_idle(settle) {
        warn!("initial load still pending");
    }
    drain_ready(&mut engine, &ready_rx);

    if let Some(err) = engine.last_error() {
        eprintln!("load failed: {err}");
    }
    if engine.is_empty() {
        println!("feed is empty; run with --seed N to add demo items");
    } else {
        for (index, item) in engine.items().iter().enumerate() {
            println!("{}", format_row(index, item));
        }
        if engine.has_more() {
            println!("... more available");
        }
    }

    if let Some(watch) = opts.watch {
        watch_feed(&mut engine, &ready_rx, watch);
    }

    info!(items = engine.len(), "done");
    Ok(())
}

fn open_backend(
    cfg: &Config,
    seed: Option<usize>,
) -> Result<(Arc<dyn ContentQuery>, Arc<dyn InteractionService>)> {
    match cfg.backend.kind {
        BackendKind::Sqlite => {
            let store = Arc::new(
                storage::Store::open(cfg.storage_options()).context("open storage")?,
            );
            if let Some(count) = seed {
                let inserted = store.seed_demo(count, Utc::now()).context("seed demo items")?;
                info!(inserted, "seeded demo items");
            }
            let query: Arc<dyn ContentQuery> = store.clone();
            let interactions: Arc<dyn InteractionService> = store;
            Ok((query, interactions))
        }
        BackendKind::Http => {
            if seed.is_some() {
                bail!("--seed needs the sqlite backend");
            }
            let client = Arc::new(rest::Client::new(cfg.rest_config()).context("open http backend")?);
            let query: Arc<dyn ContentQuery> = client.clone();
            let interactions: Arc<dyn InteractionService> = client;
            Ok((query, interactions))
        }
    }
}

fn build_source(cfg: &Config, query: Arc<dyn ContentQuery>) -> Arc<dyn CursorSource> {
    match cfg.feed.mode {
        SourceMode::Latest => Arc::new(LatestSource::new(query)),
        SourceMode::Random => {
            let seed = cfg.feed.random_seed.unwrap_or_else(rand::random);
            info!(seed, batch = cfg.feed.random_batch, "random discovery feed");
            Arc::new(RandomPoolSource::new(query, seed, cfg.feed.random_batch.max(1)))
        }
    }
}

fn drain_ready(engine: &mut Engine, ready: &Receiver<(String, Generation)>) {
    while let Ok((id, generation)) = ready.try_recv() {
        let outcome = engine.media_ready(&id, generation);
        debug!(id, ?outcome, "media ready");
    }
}

/// Keeps the poller running and prints items merged at the head.
fn watch_feed(engine: &mut Engine, ready: &Receiver<(String, Generation)>, duration: Duration) {
    info!(seconds = duration.as_secs(), "watching for new items");
    let deadline = Instant::now() + duration;
    let mut head: Option<OrderKey> = engine.items().first().map(|item| item.order_key.clone());
    while Instant::now() < deadline {
        engine.pump_for(WATCH_STEP.min(deadline.saturating_duration_since(Instant::now())));
        drain_ready(engine, ready);

        let fresh: Vec<&FeedItem> = engine
            .items()
            .iter()
            .take_while(|item| head.as_ref().map_or(true, |h| item.order_key.is_newer_than(h)))
            .collect();
        if fresh.is_empty() {
            continue;
        }
        info!(added = fresh.len(), "new items");
        for item in &fresh {
            println!("{}", format_row(0, item));
        }
        head = fresh.first().map(|item| item.order_key.clone());
    }
}

fn format_row(index: usize, item: &FeedItem) -> String {
    let likes = item
        .like_count
        .map(|count| format!("  {count} likes"))
        .unwrap_or_default();
    format!(
        "{index:>3}  {}  {}  {}  {}{likes}",
        item.order_key.timestamp.format("%Y-%m-%d %H:%M"),
        item.id(),
        item.display_title(),
        item.owner_label(),
    )
}

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{self, FeedSettings};
use crate::media::PosterConvention;
use crate::rest;
use crate::source::SourceMode;
use crate::storage;
use crate::window::WindowConfig;

const DEFAULT_ENV_PREFIX: &str = "REEL_FEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_random_batch")]
    pub random_batch: usize,
    /// Fixed shuffle seed; a fresh one is drawn per session when unset.
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_preload_threshold")]
    pub preload_threshold: usize,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            mode: SourceMode::default(),
            random_batch: default_random_batch(),
            random_seed: None,
            preload_threshold: default_preload_threshold(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

fn default_page_size() -> usize {
    15
}

fn default_random_batch() -> usize {
    10
}

fn default_preload_threshold() -> usize {
    5
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub pause_when_hidden: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            enabled: true,
            pause_when_hidden: true,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(6)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSection {
    #[serde(default = "default_radius")]
    pub radius: usize,
    #[serde(default = "default_item_extent")]
    pub item_extent: f64,
    #[serde(default = "default_preload_ahead")]
    pub preload_ahead: usize,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            item_extent: default_item_extent(),
            preload_ahead: default_preload_ahead(),
        }
    }
}

fn default_radius() -> usize {
    2
}

fn default_item_extent() -> f64 {
    844.0
}

fn default_preload_ahead() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    #[serde(default = "default_scroll_debounce", with = "humantime_serde")]
    pub scroll_debounce: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            scroll_debounce: default_scroll_debounce(),
        }
    }
}

fn default_visibility_threshold() -> f64 {
    0.6
}

fn default_scroll_debounce() -> Duration {
    Duration::from_millis(120)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_poster_extension")]
    pub poster_extension: String,
    #[serde(default = "default_placeholder_poster")]
    pub placeholder_poster: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            poster_extension: default_poster_extension(),
            placeholder_poster: default_placeholder_poster(),
            public_base_url: None,
        }
    }
}

fn default_poster_extension() -> String {
    "webp".into()
}

fn default_placeholder_poster() -> String {
    "/placeholder.jpg".into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub viewer_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            database_path: None,
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            table: default_table(),
            viewer_id: None,
        }
    }
}

fn default_table() -> String {
    "videos".into()
}

impl Config {
    pub fn posters(&self) -> PosterConvention {
        PosterConvention {
            extension: self.media.poster_extension.clone(),
            placeholder: self.media.placeholder_poster.clone(),
            public_base_url: self.media.public_base_url.clone(),
        }
    }

    pub fn engine_options(&self) -> engine::Options {
        engine::Options {
            feed: FeedSettings {
                page_size: self.feed.page_size.max(1),
                preload_threshold: self.feed.preload_threshold,
                fetch_timeout: self.feed.fetch_timeout,
                poll_interval: self.poller.interval,
                poll_enabled: self.poller.enabled,
                pause_when_hidden: self.poller.pause_when_hidden,
            },
            window: WindowConfig {
                radius: self.window.radius,
                item_extent: self.window.item_extent,
                preload_ahead: self.window.preload_ahead,
            },
            visibility_threshold: self.playback.visibility_threshold.clamp(0.0, 1.0),
            scroll_debounce: self.playback.scroll_debounce,
        }
    }

    pub fn storage_options(&self) -> storage::Options {
        let mut opts = storage::Options {
            path: self.backend.database_path.clone(),
            posters: self.posters(),
            ..storage::Options::default()
        };
        if let Some(viewer) = self.backend.viewer_id.clone() {
            opts.viewer_id = viewer;
        }
        opts
    }

    pub fn rest_config(&self) -> rest::ClientConfig {
        rest::ClientConfig {
            base_url: self.backend.base_url.clone(),
            api_key: self.backend.api_key.clone(),
            access_token: self.backend.access_token.clone(),
            table: self.backend.table.clone(),
            viewer_id: self.backend.viewer_id.clone(),
            timeout: self.feed.fetch_timeout,
            posters: self.posters(),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let path = options.config_file.or_else(default_config_path);
    let mut cfg = match path {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in env_overrides(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: failed to read {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: failed to parse {}", path.display()))?;
    Ok(config)
}

/// `PREFIX_SECTION__KEY=value` pairs as `section.key`.
fn env_overrides(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse::<T>().ok();
    if parsed.is_none() {
        warn!(key, value, "ignoring unparseable config override");
    }
    parsed
}

fn parse_duration(key: &str, value: &str) -> Option<Duration> {
    match humantime::parse_duration(value.trim()) {
        Ok(duration) => Some(duration),
        Err(err) => {
            warn!(key, value, error = %err, "ignoring unparseable duration override");
            None
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feed.page_size" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.mode" => match value.trim().to_ascii_lowercase().as_str() {
            "latest" => cfg.feed.mode = SourceMode::Latest,
            "random" => cfg.feed.mode = SourceMode::Random,
            other => warn!(key, value = other, "unknown feed mode"),
        },
        "feed.random_batch" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.feed.random_batch = parsed;
            }
        }
        "feed.random_seed" => cfg.feed.random_seed = parse_or_warn(key, &value),
        "feed.preload_threshold" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.feed.preload_threshold = parsed;
            }
        }
        "feed.fetch_timeout" => {
            if let Some(duration) = parse_duration(key, &value) {
                cfg.feed.fetch_timeout = duration;
            }
        }
        "poller.interval" => {
            if let Some(duration) = parse_duration(key, &value) {
                cfg.poller.interval = duration;
            }
        }
        "poller.enabled" => cfg.poller.enabled = parse_bool(&value),
        "poller.pause_when_hidden" => cfg.poller.pause_when_hidden = parse_bool(&value),
        "window.radius" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.window.radius = parsed;
            }
        }
        "window.item_extent" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.window.item_extent = parsed;
            }
        }
        "window.preload_ahead" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.window.preload_ahead = parsed;
            }
        }
        "playback.visibility_threshold" => {
            if let Some(parsed) = parse_or_warn(key, &value) {
                cfg.playback.visibility_threshold = parsed;
            }
        }
        "playback.scroll_debounce" => {
            if let Some(duration) = parse_duration(key, &value) {
                cfg.playback.scroll_debounce = duration;
            }
        }
        "media.poster_extension" => {
            if let Some(value) = non_empty(value) {
                cfg.media.poster_extension = value;
            }
        }
        "media.placeholder_poster" => {
            if let Some(value) = non_empty(value) {
                cfg.media.placeholder_poster = value;
            }
        }
        "media.public_base_url" => cfg.media.public_base_url = non_empty(value),
        "backend.kind" => match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => cfg.backend.kind = BackendKind::Sqlite,
            "http" => cfg.backend.kind = BackendKind::Http,
            other => warn!(key, value = other, "unknown backend kind"),
        },
        "backend.database_path" => {
            cfg.backend.database_path = non_empty(value).map(PathBuf::from)
        }
        "backend.base_url" => cfg.backend.base_url = value.trim().to_string(),
        "backend.api_key" => cfg.backend.api_key = value.trim().to_string(),
        "backend.access_token" => cfg.backend.access_token = non_empty(value),
        "backend.table" => {
            if let Some(value) = non_empty(value) {
                cfg.backend.table = value;
            }
        }
        "backend.viewer_id" => cfg.backend.viewer_id = non_empty(value),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reel-feed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str) -> LoadOptions {
        let dir = tempdir().unwrap();
        LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated("REEL_FEED_TEST_DEFAULTS")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.feed.page_size, 15);
        assert_eq!(cfg.poller.interval, Duration::from_secs(6));
        assert_eq!(cfg.backend.kind, BackendKind::Sqlite);
        assert_eq!(cfg.engine_options(), engine::Options::default());
    }

    #[test]
    fn file_values_fill_missing_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "feed:\n  mode: random\n  random_seed: 42\n  fetch_timeout: 3s\npoller:\n  interval: 500ms\nmedia:\n  public_base_url: https://store.example.com\nbackend:\n  kind: http\n  base_url: https://store.example.com\n  api_key: anon\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("REEL_FEED_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.mode, SourceMode::Random);
        assert_eq!(cfg.feed.random_seed, Some(42));
        assert_eq!(cfg.feed.page_size, 15);
        assert_eq!(cfg.feed.fetch_timeout, Duration::from_secs(3));
        assert_eq!(cfg.poller.interval, Duration::from_millis(500));
        assert_eq!(cfg.backend.kind, BackendKind::Http);
        assert_eq!(cfg.backend.table, "videos");

        let rest = cfg.rest_config();
        assert_eq!(rest.timeout, Duration::from_secs(3));
        assert_eq!(
            rest.posters.public_base_url.as_deref(),
            Some("https://store.example.com")
        );
    }

    #[test]
    fn env_overrides() {
        env::set_var("REEL_FEED_TEST_ENV_POLLER__INTERVAL", "250ms");
        env::set_var("REEL_FEED_TEST_ENV_FEED__PAGE_SIZE", "30");
        env::set_var("REEL_FEED_TEST_ENV_FEED__RANDOM_BATCH", "lots");
        env::set_var("REEL_FEED_TEST_ENV_BACKEND__VIEWER_ID", "viewer-9");
        let cfg = load(isolated("REEL_FEED_TEST_ENV")).unwrap();
        env::remove_var("REEL_FEED_TEST_ENV_POLLER__INTERVAL");
        env::remove_var("REEL_FEED_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("REEL_FEED_TEST_ENV_FEED__RANDOM_BATCH");
        env::remove_var("REEL_FEED_TEST_ENV_BACKEND__VIEWER_ID");

        assert_eq!(cfg.poller.interval, Duration::from_millis(250));
        assert_eq!(cfg.feed.page_size, 30);
        assert_eq!(cfg.feed.random_batch, 10);
        assert_eq!(cfg.storage_options().viewer_id, "viewer-9");
    }

    #[test]
    fn bad_yaml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "feed: [not, a, map]\n").unwrap();
        let err = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("REEL_FEED_TEST_BAD".into()),
        })
        .unwrap_err();
        assert!(err.to_string().contains("config: failed to parse"));
    }
}

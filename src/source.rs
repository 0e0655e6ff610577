use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feed::FeedOrdering;
use crate::model::{FeedItem, OrderKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Strict recency, paged with `(timestamp, id)` cursors.
    #[default]
    Latest,
    /// Shuffled discovery pool, paged through in fixed batches.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Strictly before the cursor.
    #[default]
    Older,
    /// Strictly after the cursor.
    Newer,
}

/// One request against the content collection. Results always come back
/// newest first; `Newer` with a limit returns the items closest to the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub cursor: Option<OrderKey>,
    pub direction: Direction,
    pub limit: Option<usize>,
    pub ids: Option<Vec<String>>,
}

impl ListQuery {
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn older_than(cursor: &OrderKey, limit: usize) -> Self {
        Self {
            cursor: Some(cursor.clone()),
            direction: Direction::Older,
            limit: Some(limit),
            ids: None,
        }
    }

    pub fn newer_than(cursor: &OrderKey) -> Self {
        Self {
            cursor: Some(cursor.clone()),
            direction: Direction::Newer,
            limit: None,
            ids: None,
        }
    }

    pub fn members(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    /// Whether `key` passes the cursor filter (open interval).
    pub fn admits(&self, key: &OrderKey) -> bool {
        match (&self.cursor, self.direction) {
            (None, _) => true,
            (Some(cursor), Direction::Older) => key.is_older_than(cursor),
            (Some(cursor), Direction::Newer) => key.is_newer_than(cursor),
        }
    }
}

/// The backing store's list interface.
pub trait ContentQuery: Send + Sync {
    fn list(&self, query: &ListQuery) -> Result<Vec<FeedItem>>;
    /// `list` plus the number of rows the store matched, counted before any
    /// malformed row was dropped. Paging decides `has_more` from this count.
    fn list_counted(&self, query: &ListQuery) -> Result<(Vec<FeedItem>, usize)> {
        let items = self.list(query)?;
        let matched = items.len();
        Ok((items, matched))
    }
    /// Every id in the collection, for the discovery pool.
    fn list_ids(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<FeedItem>,
    pub has_more: bool,
}

pub trait CursorSource: Send + Sync {
    fn fetch_initial(&self, limit: usize) -> Result<Page>;
    fn fetch_older(&self, after: &OrderKey, limit: usize) -> Result<Page>;
    fn fetch_newer(&self, since: &OrderKey) -> Result<Vec<FeedItem>>;

    fn ordering(&self) -> FeedOrdering {
        FeedOrdering::Chronological
    }
}

pub struct LatestSource {
    query: Arc<dyn ContentQuery>,
}

impl LatestSource {
    pub fn new(query: Arc<dyn ContentQuery>) -> Self {
        Self { query }
    }

    // One extra row tells us whether another page exists.
    fn page(&self, mut query: ListQuery, limit: usize) -> Result<Page> {
        query.limit = Some(limit.saturating_add(1));
        let (mut items, matched) = self.query.list_counted(&query)?;
        let has_more = matched > limit;
        items.truncate(limit);
        Ok(Page { items, has_more })
    }
}

impl CursorSource for LatestSource {
    fn fetch_initial(&self, limit: usize) -> Result<Page> {
        self.page(ListQuery::first(limit), limit)
            .context("source: fetch initial page")
    }

    fn fetch_older(&self, after: &OrderKey, limit: usize) -> Result<Page> {
        self.page(ListQuery::older_than(after, limit), limit)
            .context("source: fetch older page")
    }

    fn fetch_newer(&self, since: &OrderKey) -> Result<Vec<FeedItem>> {
        self.query
            .list(&ListQuery::newer_than(since))
            .context("source: fetch newer items")
    }
}

/// Discovery mode: the whole id space is fetched once, shuffled with a fixed
/// seed, and handed out in batches. The cursor is the last id handed out.
pub struct RandomPoolSource {
    query: Arc<dyn ContentQuery>,
    seed: u64,
    batch: usize,
    pool: Mutex<Option<Arc<Vec<String>>>>,
}

impl RandomPoolSource {
    pub fn new(query: Arc<dyn ContentQuery>, seed: u64, batch: usize) -> Self {
        Self {
            query,
            seed,
            batch: batch.max(1),
            pool: Mutex::new(None),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn pool(&self) -> Result<Arc<Vec<String>>> {
        let mut guard = self.pool.lock();
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let mut ids = self.query.list_ids().context("source: list id pool")?;
        ids.sort();
        ids.dedup();
        let mut rng = StdRng::seed_from_u64(self.seed);
        ids.shuffle(&mut rng);
        debug!(size = ids.len(), seed = self.seed, "shuffled discovery pool");
        let pool = Arc::new(ids);
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Next batch from `start` with at least one surviving item. Batches whose
    /// ids were all deleted since the pool was built are skipped, so a page
    /// with `has_more` always moves the cursor.
    fn batch_from(&self, start: usize) -> Result<Page> {
        let pool = self.pool()?;
        let mut start = start.min(pool.len());
        while start < pool.len() {
            let end = start.saturating_add(self.batch).min(pool.len());
            let wanted = &pool[start..end];
            let mut hydrated: HashMap<String, FeedItem> = self
                .query
                .list(&ListQuery::members(wanted.to_vec()))
                .context("source: hydrate pool batch")?
                .into_iter()
                .map(|item| (item.id().to_string(), item))
                .collect();
            let items: Vec<FeedItem> = wanted
                .iter()
                .filter_map(|id| hydrated.remove(id))
                .collect();
            if !items.is_empty() {
                return Ok(Page {
                    items,
                    has_more: end < pool.len(),
                });
            }
            debug!(start, end, "pool batch vanished, skipping");
            start = end;
        }
        Ok(Page::default())
    }
}

impl CursorSource for RandomPoolSource {
    fn fetch_initial(&self, _limit: usize) -> Result<Page> {
        self.batch_from(0)
    }

    fn fetch_older(&self, after: &OrderKey, _limit: usize) -> Result<Page> {
        let pool = self.pool()?;
        let position = pool
            .iter()
            .position(|id| *id == after.id)
            .ok_or_else(|| anyhow!("source: cursor {} is not in the discovery pool", after.id))?;
        self.batch_from(position + 1)
    }

    fn fetch_newer(&self, _since: &OrderKey) -> Result<Vec<FeedItem>> {
        Ok(Vec::new())
    }

    fn ordering(&self) -> FeedOrdering {
        FeedOrdering::Sequenced
    }
}

/// In-process collection, used for tests, demos and offline previews.
#[derive(Default)]
pub struct MemoryCollection {
    items: RwLock<Vec<FeedItem>>,
    failing: AtomicBool,
}

impl MemoryCollection {
    pub fn new(items: impl IntoIterator<Item = FeedItem>) -> Self {
        let collection = Self::default();
        for item in items {
            collection.insert(item);
        }
        collection
    }

    /// Publishes an item, as a concurrent producer would.
    pub fn insert(&self, item: FeedItem) {
        let mut items = self.items.write();
        items.retain(|existing| existing.id() != item.id());
        let index = items.partition_point(|existing| existing.order_key > item.order_key);
        items.insert(index, item);
    }

    pub fn remove(&self, id: &str) {
        self.items.write().retain(|item| item.id() != id);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Makes every query fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory collection: simulated outage");
        }
        Ok(())
    }
}

impl ContentQuery for MemoryCollection {
    fn list(&self, query: &ListQuery) -> Result<Vec<FeedItem>> {
        self.check()?;
        let items = self.items.read();
        let matching = items.iter().filter(|item| {
            query.admits(&item.order_key)
                && query
                    .ids
                    .as_ref()
                    .map_or(true, |ids| ids.iter().any(|id| id == item.id()))
        });
        let limit = query.limit.unwrap_or(usize::MAX);
        let out = match query.direction {
            Direction::Older => matching.take(limit).cloned().collect(),
            Direction::Newer => {
                let mut closest: Vec<FeedItem> = matching.rev().take(limit).cloned().collect();
                closest.reverse();
                closest
            }
        };
        Ok(out)
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .items
            .read()
            .iter()
            .map(|item| item.id().to_string())
            .collect())
    }
}

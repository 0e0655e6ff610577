use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::data::{InteractionService, LikeTruth};
use crate::feed::FeedState;
use crate::model::{FeedItem, OrderKey};
use crate::overlay::{
    BookmarkState, LikeState, Mutation, MutationKind, Overlay, OverlayError, Phase, Settled, Toggle,
};
use crate::playback::{Generation, MediaSink, PlaybackScheduler, ReadyOutcome, Visibility};
use crate::poller::{poll_once, HeadCursor, PollEvent, Poller};
use crate::source::{CursorSource, Page};
use crate::window::{index_at, offset_for, Materializer, ScrollDebounce, Window, WindowConfig};

/// Events the engine emits; navigation, reservation and detail panels live in the host.
pub trait HostCallbacks: Send {
    fn on_focus_change(&mut self, _index: usize, _id: &str) {}
    fn on_request_close(&mut self) {}
    fn on_request_reserve(&mut self, _id: &str) {}
    fn on_request_more(&mut self, _id: &str) {}
    /// Non-blocking notice, e.g. a rolled back like.
    fn on_notice(&mut self, _message: &str) {}
}

#[derive(Debug, Default)]
pub struct NoopHost;

impl HostCallbacks for NoopHost {}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub page_size: usize,
    /// Items left below the focus that trigger the next older page.
    pub preload_threshold: usize,
    pub fetch_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_enabled: bool,
    pub pause_when_hidden: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 15,
            preload_threshold: 5,
            fetch_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(6),
            poll_enabled: true,
            pause_when_hidden: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub feed: FeedSettings,
    pub window: WindowConfig,
    pub visibility_threshold: f64,
    pub scroll_debounce: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            window: WindowConfig::default(),
            visibility_threshold: 0.6,
            scroll_debounce: Duration::from_millis(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine: no item is focused")]
    NoFocus,
    #[error("engine: index {index} is out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Initial,
    Older,
}

enum AsyncResponse {
    Page {
        request_id: u64,
        kind: FetchKind,
        result: Result<Page>,
    },
    Refresh {
        request_id: u64,
        event: PollEvent,
    },
    Like {
        id: String,
        ticket: u64,
        result: Result<LikeTruth>,
    },
    Bookmark {
        id: String,
        ticket: u64,
        result: Result<bool>,
    },
    Bookmarks {
        result: Result<Vec<String>>,
    },
    Likes {
        result: Result<Vec<String>>,
    },
}

struct PendingFetch {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
    started: Instant,
}

impl PendingFetch {
    fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }
}

pub struct Engine {
    options: Options,
    source: Arc<dyn CursorSource>,
    interactions: Arc<dyn InteractionService>,
    host: Box<dyn HostCallbacks>,
    feed: FeedState,
    overlay: Overlay,
    scheduler: PlaybackScheduler,
    materializer: Materializer,
    debounce: ScrollDebounce,
    focused: Option<OrderKey>,
    focus_index: usize,
    has_more: bool,
    last_error: Option<String>,
    epoch: u64,
    head: HeadCursor,
    poller: Option<Poller>,
    poll_tx: Sender<PollEvent>,
    poll_rx: Receiver<PollEvent>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_initial: Option<PendingFetch>,
    pending_older: Option<PendingFetch>,
    pending_refresh: Option<PendingFetch>,
    mutations_in_flight: usize,
    seeding_bookmarks: bool,
    seeding_likes: bool,
    hidden: bool,
}

impl Engine {
    pub fn new(
        source: Arc<dyn CursorSource>,
        interactions: Arc<dyn InteractionService>,
        sink: Box<dyn MediaSink>,
        host: Box<dyn HostCallbacks>,
        options: Options,
    ) -> Self {
        let (poll_tx, poll_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        Self {
            feed: FeedState::new(source.ordering()),
            scheduler: PlaybackScheduler::new(sink, options.visibility_threshold),
            debounce: ScrollDebounce::new(options.scroll_debounce),
            options,
            source,
            interactions,
            host,
            overlay: Overlay::new(),
            materializer: Materializer::new(),
            focused: None,
            focus_index: 0,
            has_more: true,
            last_error: None,
            epoch: 0,
            head: HeadCursor::new(),
            poller: None,
            poll_tx,
            poll_rx,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_initial: None,
            pending_older: None,
            pending_refresh: None,
            mutations_in_flight: 0,
            seeding_bookmarks: false,
            seeding_likes: false,
            hidden: false,
        }
    }

    /// Initial load, viewer state seeding and the background poller.
    pub fn start(&mut self) {
        self.load_initial();
        self.seed_bookmarks();
        self.seed_likes();
        self.start_poller();
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn items(&self) -> &[FeedItem] {
        self.feed.items()
    }

    pub fn feed(&self) -> &FeedState {
        &self.feed
    }

    pub fn len(&self) -> usize {
        self.feed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Error from the last failed initial or manual load, for a visible affordance.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending_initial.is_some() || self.pending_older.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading()
            || self.pending_refresh.is_some()
            || self.mutations_in_flight > 0
            || self.seeding_bookmarks
            || self.seeding_likes
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn focus_index(&self) -> usize {
        self.focus_index
    }

    pub fn focused_item(&self) -> Option<&FeedItem> {
        self.focused.as_ref()?;
        self.feed.get(self.focus_index)
    }

    pub fn window(&self) -> Option<Window> {
        Window::compute(self.focus_index, self.feed.len(), &self.options.window)
    }

    /// Scroll offset that shows the focused item. Hosts re-scroll to it after
    /// a prepend so the visible item stays put.
    pub fn anchor_offset(&self) -> f64 {
        offset_for(self.focus_index, self.options.window.item_extent)
    }

    pub fn materialized(&self) -> &[String] {
        self.materializer.live()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn like_state(&self, id: &str) -> LikeState {
        self.overlay.like(id)
    }

    pub fn bookmark_state(&self, id: &str) -> BookmarkState {
        self.overlay.bookmark(id)
    }

    pub fn playing(&self) -> Option<&str> {
        self.scheduler.playing()
    }

    pub fn muted(&self) -> bool {
        self.scheduler.muted()
    }

    fn take_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        request_id
    }

    fn begin_fetch(&mut self) -> (u64, Arc<AtomicBool>, PendingFetch) {
        let request_id = self.take_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let pending = PendingFetch {
            request_id,
            cancel_flag: cancel_flag.clone(),
            started: Instant::now(),
        };
        (request_id, cancel_flag, pending)
    }

    pub fn load_initial(&mut self) {
        if self.pending_initial.is_some() {
            return;
        }
        let (request_id, cancel_flag, pending) = self.begin_fetch();
        self.pending_initial = Some(pending);
        let limit = self.options.feed.page_size;
        debug!(request_id, limit, "dispatching initial page");
        self.spawn_page(request_id, cancel_flag, FetchKind::Initial, move |source| {
            source.fetch_initial(limit)
        });
    }

    /// Next older page after the tail. No-op while a page is loading or when
    /// the source reported the end.
    pub fn load_older(&mut self) {
        if self.pending_older.is_some() || self.pending_initial.is_some() || !self.has_more {
            return;
        }
        let Some(tail) = self.feed.tail().cloned() else {
            return;
        };
        let (request_id, cancel_flag, pending) = self.begin_fetch();
        self.pending_older = Some(pending);
        let limit = self.options.feed.page_size;
        debug!(request_id, %tail, limit, "dispatching older page");
        self.spawn_page(request_id, cancel_flag, FetchKind::Older, move |source| {
            source.fetch_older(&tail, limit)
        });
    }

    fn spawn_page<F>(
        &self,
        request_id: u64,
        cancel_flag: Arc<AtomicBool>,
        kind: FetchKind,
        fetch: F,
    ) where
        F: FnOnce(&dyn CursorSource) -> Result<Page> + Send + 'static,
    {
        let tx = self.response_tx.clone();
        let source = self.source.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = fetch(source.as_ref());
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Page {
                request_id,
                kind,
                result,
            });
        });
    }

    /// On-demand poll for items newer than the head.
    pub fn refresh_newer(&mut self) {
        if self.pending_refresh.is_some() {
            return;
        }
        let (request_id, cancel_flag, pending) = self.begin_fetch();
        self.pending_refresh = Some(pending);
        let tx = self.response_tx.clone();
        let source = self.source.clone();
        let head = self.head.clone();
        let page_size = self.options.feed.page_size;
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let event = poll_once(source.as_ref(), &head, page_size);
            let _ = tx.send(AsyncResponse::Refresh { request_id, event });
        });
    }

    fn seed_bookmarks(&mut self) {
        self.seeding_bookmarks = true;
        let tx = self.response_tx.clone();
        let interactions = self.interactions.clone();
        thread::spawn(move || {
            let result = interactions.bookmarked_ids();
            let _ = tx.send(AsyncResponse::Bookmarks { result });
        });
    }

    fn seed_likes(&mut self) {
        self.seeding_likes = true;
        let tx = self.response_tx.clone();
        let interactions = self.interactions.clone();
        thread::spawn(move || {
            let result = interactions.liked_ids();
            let _ = tx.send(AsyncResponse::Likes { result });
        });
    }

    fn start_poller(&mut self) {
        self.poller = None;
        if !self.options.feed.poll_enabled {
            return;
        }
        let poller = Poller::spawn(
            self.source.clone(),
            self.head.clone(),
            self.options.feed.poll_interval,
            self.options.feed.page_size,
            self.poll_tx.clone(),
        );
        if self.hidden && self.options.feed.pause_when_hidden {
            poller.pause();
        }
        self.poller = Some(poller);
    }

    pub fn pause_polling(&self) {
        if let Some(poller) = &self.poller {
            poller.pause();
        }
    }

    pub fn resume_polling(&self) {
        if let Some(poller) = &self.poller {
            poller.resume();
        }
    }

    /// Host visibility. Polling pauses while hidden when configured to.
    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
        if !self.options.feed.pause_when_hidden {
            return;
        }
        if hidden {
            self.pause_polling();
        } else {
            self.resume_polling();
        }
    }

    /// Drops the list (the overlay survives), cancels in-flight fetches,
    /// releases every slot and loads again.
    pub fn reset(&mut self) {
        for pending in [
            self.pending_initial.take(),
            self.pending_older.take(),
            self.pending_refresh.take(),
        ]
        .into_iter()
        .flatten()
        {
            pending.cancel();
        }
        self.epoch += 1;
        self.feed.reset(self.source.ordering());
        self.materializer.clear();
        self.scheduler.clear();
        self.debounce.cancel();
        self.focused = None;
        self.focus_index = 0;
        self.has_more = true;
        self.last_error = None;
        self.head.publish(self.epoch, None);
        info!(epoch = self.epoch, "feed reset");
        self.load_initial();
    }

    /// Switches to another source (a filter or mode change) and reloads.
    pub fn set_source(&mut self, source: Arc<dyn CursorSource>) {
        self.source = source;
        let restart = self.poller.is_some();
        self.poller = None;
        self.reset();
        if restart {
            self.start_poller();
        }
    }

    pub fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        while let Ok(event) = self.poll_rx.try_recv() {
            self.apply_newer(event, false);
            changed = true;
        }
        changed
    }

    /// Time-driven work: debounced scroll and fetch timeouts.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if let Some(offset) = self.debounce.poll(now) {
            let index = index_at(offset, self.options.window.item_extent, self.feed.len());
            if !self.feed.is_empty() {
                self.apply_focus(index, false);
                changed = true;
            }
        }
        changed |= self.expire_fetches(now);
        changed
    }

    fn expire_fetches(&mut self, now: Instant) -> bool {
        let timeout = self.options.feed.fetch_timeout;
        let expired = |pending: &Option<PendingFetch>| {
            pending
                .as_ref()
                .is_some_and(|pending| now.saturating_duration_since(pending.started) >= timeout)
        };
        let mut changed = false;
        if expired(&self.pending_initial) {
            if let Some(pending) = self.pending_initial.take() {
                pending.cancel();
            }
            warn!(timeout = ?timeout, "initial page timed out");
            self.has_more = false;
            self.last_error = Some(format!(
                "initial load timed out after {}",
                humantime::format_duration(timeout)
            ));
            changed = true;
        }
        if expired(&self.pending_older) {
            if let Some(pending) = self.pending_older.take() {
                pending.cancel();
            }
            warn!(timeout = ?timeout, "older page timed out");
            self.has_more = false;
            self.last_error = Some(format!(
                "loading more timed out after {}",
                humantime::format_duration(timeout)
            ));
            changed = true;
        }
        if expired(&self.pending_refresh) {
            if let Some(pending) = self.pending_refresh.take() {
                pending.cancel();
            }
            warn!(timeout = ?timeout, "refresh timed out");
            changed = true;
        }
        changed
    }

    /// Drains responses until nothing is outstanding or `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_async();
            self.tick(Instant::now());
            if !self.is_busy() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(25));
            if let Ok(message) = self.response_rx.recv_timeout(wait) {
                self.handle_async_response(message);
            }
        }
    }

    /// Runs the loop for `duration`, folding in poll results as they land.
    pub fn pump_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.poll_async();
            self.tick(Instant::now());
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(25)));
        }
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Page {
                request_id,
                kind,
                result,
            } => {
                let slot = match kind {
                    FetchKind::Initial => &mut self.pending_initial,
                    FetchKind::Older => &mut self.pending_older,
                };
                let Some(pending) = slot.as_ref() else {
                    debug!(request_id, "page response without pending request dropped");
                    return;
                };
                if pending.request_id != request_id || pending.cancel_flag.load(Ordering::SeqCst) {
                    debug!(request_id, "stale page response dropped");
                    return;
                }
                *slot = None;
                self.apply_page(kind, result);
            }
            AsyncResponse::Refresh { request_id, event } => {
                let Some(pending) = &self.pending_refresh else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_refresh = None;
                self.apply_newer(event, true);
            }
            AsyncResponse::Like { id, ticket, result } => {
                self.mutations_in_flight = self.mutations_in_flight.saturating_sub(1);
                let outcome = result.map_err(|err| format!("{err:#}"));
                let settled = self.overlay.settle_like(&id, ticket, outcome);
                self.after_settle(settled);
            }
            AsyncResponse::Bookmark { id, ticket, result } => {
                self.mutations_in_flight = self.mutations_in_flight.saturating_sub(1);
                let outcome = result.map_err(|err| format!("{err:#}"));
                let settled = self.overlay.settle_bookmark(&id, ticket, outcome);
                self.after_settle(settled);
            }
            AsyncResponse::Bookmarks { result } => {
                self.seeding_bookmarks = false;
                match result {
                    Ok(ids) => {
                        debug!(count = ids.len(), "bookmarks seeded");
                        self.overlay.seed_bookmarks(ids);
                    }
                    Err(err) => warn!(error = %err, "failed to load bookmarks"),
                }
            }
            AsyncResponse::Likes { result } => {
                self.seeding_likes = false;
                match result {
                    Ok(ids) => {
                        debug!(count = ids.len(), "likes seeded");
                        self.overlay.seed_likes(ids);
                    }
                    Err(err) => warn!(error = %err, "failed to load likes"),
                }
            }
        }
    }

    fn apply_page(&mut self, kind: FetchKind, result: Result<Page>) {
        match result {
            Ok(page) => {
                let received = page.items.len();
                let added = self.feed.merge_older(page.items);
                self.has_more = page.has_more;
                if kind == FetchKind::Older && added == 0 && self.has_more {
                    // The tail did not move, so asking again would repeat this page.
                    warn!(received, "older page added nothing; paging stopped");
                    self.has_more = false;
                }
                self.last_error = None;
                info!(
                    ?kind,
                    received,
                    added,
                    has_more = self.has_more,
                    total = self.feed.len(),
                    "page merged"
                );
                self.after_merge();
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(?kind, error = %message, "page fetch failed");
                self.has_more = false;
                self.last_error = Some(message);
            }
        }
    }

    fn apply_newer(&mut self, event: PollEvent, manual: bool) {
        if event.epoch != self.epoch {
            debug!(
                epoch = event.epoch,
                current = self.epoch,
                "poll result from before reset dropped"
            );
            return;
        }
        match event.result {
            Ok(items) => {
                if items.is_empty() {
                    return;
                }
                let was_empty = self.feed.is_empty();
                let added = self.feed.merge_newer(items);
                if added == 0 {
                    return;
                }
                if was_empty {
                    self.has_more = event.has_more.unwrap_or(true);
                }
                info!(added, manual, total = self.feed.len(), "newer items merged");
                self.after_merge();
            }
            Err(err) => {
                let message = format!("{err:#}");
                if manual {
                    warn!(error = %message, "refresh failed");
                    self.last_error = Some(message);
                } else {
                    debug!(error = %message, "background poll failed");
                }
            }
        }
    }

    /// Re-anchors focus on the focused item, then refreshes the window.
    fn after_merge(&mut self) {
        self.head.publish(self.epoch, self.feed.head());
        let anchored = self.focused.as_ref().and_then(|key| self.feed.position(key));
        match anchored {
            Some(index) => {
                let moved = index as f64 - self.focus_index as f64;
                if moved != 0.0 {
                    // A held scroll offset was measured against the old list.
                    self.debounce.shift(moved * self.options.window.item_extent);
                }
                self.focus_index = index;
                self.sync_window();
            }
            None if !self.feed.is_empty() => self.apply_focus(0, true),
            None => {}
        }
    }

    fn apply_focus(&mut self, index: usize, promote: bool) {
        let Some(item) = self.feed.get(index.min(self.feed.len().saturating_sub(1))) else {
            return;
        };
        let index = index.min(self.feed.len() - 1);
        let key = item.order_key.clone();
        let changed = self.focused.as_ref() != Some(&key);
        self.focus_index = index;
        self.focused = Some(key.clone());
        self.sync_window();
        if promote {
            self.scheduler.promote(&key.id);
        }
        if changed {
            self.scheduler.set_muted(true);
            debug!(index, id = %key.id, "focus changed");
            self.host.on_focus_change(index, &key.id);
        }
    }

    fn sync_window(&mut self) {
        let window = self.window();
        let diff = self.materializer.update(self.feed.items(), window.as_ref());
        if !diff.is_empty() {
            debug!(
                entered = diff.entered.len(),
                left = diff.left.len(),
                "window moved"
            );
        }
        for id in &diff.left {
            self.scheduler.teardown(id);
        }
        for (index, id) in &diff.entered {
            if let Some(item) = self.feed.get(*index) {
                self.scheduler.materialize(id, &item.media_ref);
                self.overlay.observe_like_count(id, item.like_count);
            }
        }
        for ahead in 1..=self.options.window.preload_ahead {
            if let Some(item) = self.feed.get(self.focus_index + ahead) {
                let id = item.id().to_string();
                self.scheduler.preload(&id);
            }
        }
        self.maybe_request_more();
    }

    fn maybe_request_more(&mut self) {
        if self.feed.is_empty() || !self.has_more {
            return;
        }
        let remaining = self
            .feed
            .len()
            .saturating_sub(self.focus_index.saturating_add(1));
        if remaining > self.options.feed.preload_threshold {
            return;
        }
        self.load_older();
    }

    /// Programmatic navigation: focus moves and the item plays without
    /// waiting for the observer.
    pub fn navigate_to(&mut self, index: usize) -> Result<(), EngineError> {
        let len = self.feed.len();
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        self.debounce.cancel();
        self.apply_focus(index, true);
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), EngineError> {
        self.navigate_to(self.focus_index.saturating_add(1))
    }

    pub fn previous(&mut self) -> Result<(), EngineError> {
        let index = self
            .focus_index
            .checked_sub(1)
            .ok_or(EngineError::IndexOutOfRange {
                index: 0,
                len: self.feed.len(),
            })?;
        self.navigate_to(index)
    }

    /// Raw scroll offset; applied after the debounce quiet period in `tick`.
    pub fn on_scroll(&mut self, offset: f64, now: Instant) {
        self.debounce.record(offset, now);
    }

    /// Observer sample. The winner plays and becomes the focus.
    pub fn report_visibility(&mut self, samples: &[Visibility]) {
        let Some(winner) = self.scheduler.observe(samples) else {
            return;
        };
        let current = self.focused.as_ref().map(|key| key.id.as_str());
        if current == Some(winner.as_str()) {
            return;
        }
        if let Some(index) = self.feed.items().iter().position(|item| item.id() == winner) {
            self.apply_focus(index, false);
        }
    }

    pub fn media_ready(&mut self, id: &str, generation: Generation) -> ReadyOutcome {
        self.scheduler.media_ready(id, generation)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.scheduler.set_muted(muted);
    }

    pub fn toggle_muted(&mut self) -> bool {
        let muted = !self.scheduler.muted();
        self.scheduler.set_muted(muted);
        muted
    }

    pub fn toggle_like(&mut self, id: &str) -> Toggle {
        let count = self
            .feed
            .items()
            .iter()
            .find(|item| item.id() == id)
            .and_then(|item| item.like_count);
        self.overlay.observe_like_count(id, count);
        let toggle = self.overlay.toggle_like(id);
        if let Toggle::Started(mutation) = &toggle {
            self.dispatch_mutation(mutation.clone());
        }
        toggle
    }

    pub fn toggle_bookmark(&mut self, id: &str) -> Toggle {
        let toggle = self.overlay.toggle_bookmark(id);
        if let Toggle::Started(mutation) = &toggle {
            self.dispatch_mutation(mutation.clone());
        }
        toggle
    }

    pub fn toggle_like_focused(&mut self) -> Result<Toggle, EngineError> {
        let id = self.focused_id()?;
        Ok(self.toggle_like(&id))
    }

    pub fn toggle_bookmark_focused(&mut self) -> Result<Toggle, EngineError> {
        let id = self.focused_id()?;
        Ok(self.toggle_bookmark(&id))
    }

    fn focused_id(&self) -> Result<String, EngineError> {
        self.focused_item()
            .map(|item| item.id().to_string())
            .ok_or(EngineError::NoFocus)
    }

    fn dispatch_mutation(&mut self, mutation: Mutation) {
        self.mutations_in_flight += 1;
        debug!(
            id = %mutation.id,
            ticket = mutation.ticket,
            kind = ?mutation.kind,
            "dispatching mutation"
        );
        let tx = self.response_tx.clone();
        let interactions = self.interactions.clone();
        thread::spawn(move || {
            let Mutation { ticket, id, kind } = mutation;
            let message = match kind {
                MutationKind::Like => AsyncResponse::Like {
                    result: interactions.like(&id),
                    id,
                    ticket,
                },
                MutationKind::Unlike => AsyncResponse::Like {
                    result: interactions.unlike(&id),
                    id,
                    ticket,
                },
                MutationKind::Bookmark => AsyncResponse::Bookmark {
                    result: interactions.bookmark(&id),
                    id,
                    ticket,
                },
                MutationKind::Unbookmark => AsyncResponse::Bookmark {
                    result: interactions.unbookmark(&id),
                    id,
                    ticket,
                },
            };
            let _ = tx.send(message);
        });
    }

    fn after_settle(&mut self, settled: Result<Settled, OverlayError>) {
        let settled = match settled {
            Ok(settled) => settled,
            Err(err) => {
                warn!(error = %err, "unexpected mutation settlement");
                return;
            }
        };
        if settled.phase == Phase::RolledBack {
            let error = settled.error.as_deref().unwrap_or("unknown error");
            warn!(id = %settled.id, error, "mutation rolled back");
            let notice = format!("Couldn't update {}: {error}", settled.id);
            self.host.on_notice(&notice);
        }
        if let Some(next) = settled.next {
            self.dispatch_mutation(next);
        }
    }

    pub fn request_close(&mut self) {
        self.host.on_request_close();
    }

    pub fn request_reserve(&mut self) -> Result<(), EngineError> {
        let id = self.focused_id()?;
        self.host.on_request_reserve(&id);
        Ok(())
    }

    pub fn request_more(&mut self) -> Result<(), EngineError> {
        let id = self.focused_id()?;
        self.host.on_request_more(&id);
        Ok(())
    }
}

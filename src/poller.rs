use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{tick, unbounded, Sender};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::model::{FeedItem, OrderKey};
use crate::source::CursorSource;

/// Head of the feed as the engine last published it, tagged with the reset
/// epoch so that results computed against a discarded list can be dropped.
#[derive(Debug, Clone, Default)]
pub struct HeadCursor {
    inner: Arc<RwLock<(u64, Option<OrderKey>)>>,
}

impl HeadCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, epoch: u64, head: Option<&OrderKey>) {
        *self.inner.write() = (epoch, head.cloned());
    }

    pub fn snapshot(&self) -> (u64, Option<OrderKey>) {
        self.inner.read().clone()
    }
}

#[derive(Debug)]
pub struct PollEvent {
    pub epoch: u64,
    /// `None` when the feed was empty and the first page was requested instead.
    pub since: Option<OrderKey>,
    pub result: Result<Vec<FeedItem>>,
    /// Whether older items remain, known only when the first page was fetched.
    pub has_more: Option<bool>,
}

/// One "newer than head" request. An empty feed asks for the first page.
pub fn poll_once(source: &dyn CursorSource, head: &HeadCursor, page_size: usize) -> PollEvent {
    let (epoch, since) = head.snapshot();
    let (result, has_more) = match &since {
        Some(since) => (source.fetch_newer(since), None),
        None => match source.fetch_initial(page_size) {
            Ok(page) => (Ok(page.items), Some(page.has_more)),
            Err(err) => (Err(err), None),
        },
    };
    PollEvent {
        epoch,
        since,
        result,
        has_more,
    }
}

/// Background ticker. Runs on its own thread until stopped or dropped.
pub struct Poller {
    stop: Sender<()>,
    paused: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(
        source: Arc<dyn CursorSource>,
        head: HeadCursor,
        interval: Duration,
        page_size: usize,
        events: Sender<PollEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let paused = Arc::new(AtomicBool::new(false));
        let worker_paused = paused.clone();
        let interval = interval.max(Duration::from_millis(10));

        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            debug!(interval = ?interval, "poller started");
            loop {
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if worker_paused.load(Ordering::SeqCst) {
                            trace!("poller paused, tick skipped");
                            continue;
                        }
                        let event = poll_once(source.as_ref(), &head, page_size);
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("poller stopped");
        });

        Self {
            stop: stop_tx,
            paused,
            handle: Some(handle),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::item;
    use crate::source::{LatestSource, MemoryCollection};

    fn source(collection: &Arc<MemoryCollection>) -> Arc<dyn CursorSource> {
        Arc::new(LatestSource::new(collection.clone()))
    }

    #[test]
    fn poll_once_asks_for_items_after_head() {
        let collection = Arc::new(MemoryCollection::new([item(1, "a"), item(2, "b")]));
        let head = HeadCursor::new();
        head.publish(3, Some(&OrderKey::at_millis(1, "a")));
        let event = poll_once(source(&collection).as_ref(), &head, 10);
        assert_eq!(event.epoch, 3);
        let ids: Vec<String> = event
            .result
            .unwrap()
            .iter()
            .map(|item| item.id().to_string())
            .collect();
        assert_eq!(ids, ["b"]);
        assert_eq!(event.has_more, None);
    }

    #[test]
    fn empty_head_requests_first_page() {
        let collection = Arc::new(MemoryCollection::new([item(1, "a")]));
        let event = poll_once(source(&collection).as_ref(), &HeadCursor::new(), 10);
        assert_eq!(event.since, None);
        assert_eq!(event.has_more, Some(false));
        assert_eq!(event.result.unwrap().len(), 1);

        let collection = Arc::new(MemoryCollection::new([item(1, "a"), item(2, "b")]));
        let event = poll_once(source(&collection).as_ref(), &HeadCursor::new(), 1);
        assert_eq!(event.has_more, Some(true));
    }

    #[test]
    fn ticks_until_stopped() {
        let collection = Arc::new(MemoryCollection::new([item(1, "a")]));
        let head = HeadCursor::new();
        head.publish(0, Some(&OrderKey::at_millis(1, "a")));
        let (tx, rx) = unbounded();
        let mut poller = Poller::spawn(
            source(&collection),
            head,
            Duration::from_millis(20),
            10,
            tx,
        );
        collection.insert(item(2, "b"));
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(event.result.is_ok());
        poller.stop();
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn paused_poller_stays_quiet() {
        let collection = Arc::new(MemoryCollection::new([item(1, "a")]));
        let (tx, rx) = unbounded();
        let poller = Poller::spawn(
            source(&collection),
            HeadCursor::new(),
            Duration::from_millis(20),
            10,
            tx,
        );
        poller.pause();
        // Let a tick that raced the pause finish before draining.
        thread::sleep(Duration::from_millis(50));
        while rx.try_recv().is_ok() {}
        assert!(poller.is_paused());
        assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
        poller.resume();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}

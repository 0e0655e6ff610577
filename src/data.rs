use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;

/// Authoritative like state after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeTruth {
    pub count: i64,
    pub liked: bool,
}

/// Remote mutation interface. Every call is idempotent and returns the
/// post-mutation state as the store sees it.
pub trait InteractionService: Send + Sync {
    fn like(&self, id: &str) -> Result<LikeTruth>;
    fn unlike(&self, id: &str) -> Result<LikeTruth>;
    fn bookmark(&self, id: &str) -> Result<bool>;
    fn unbookmark(&self, id: &str) -> Result<bool>;
    /// Ids the viewer has bookmarked, used to seed the overlay.
    fn bookmarked_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    /// Ids the viewer has liked, so a liked item shows as liked after a restart.
    fn liked_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct MockState {
    counts: HashMap<String, i64>,
    liked: HashSet<String>,
    bookmarked: HashSet<String>,
}

/// In-memory service for tests and offline runs.
#[derive(Default)]
pub struct MockInteractionService {
    state: Mutex<MockState>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MockInteractionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the aggregate count for an item, as other viewers' likes would.
    pub fn with_count(self, id: &str, count: i64) -> Self {
        self.state.lock().counts.insert(id.to_string(), count);
        self
    }

    /// Marks an item as already liked by the viewer.
    pub fn with_liked(self, id: &str) -> Self {
        self.state.lock().liked.insert(id.to_string());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Calls received so far, as `"like:<id>"` style entries.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn enter(&self, call: &str, id: &str) -> Result<()> {
        self.calls.lock().push(format!("{call}:{id}"));
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            thread::sleep(latency);
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("mock interaction: {call} {id} rejected");
        }
        Ok(())
    }
}

impl InteractionService for MockInteractionService {
    fn like(&self, id: &str) -> Result<LikeTruth> {
        self.enter("like", id)?;
        let mut state = self.state.lock();
        let newly = state.liked.insert(id.to_string());
        let count = state.counts.entry(id.to_string()).or_insert(0);
        if newly {
            *count += 1;
        }
        Ok(LikeTruth {
            count: *count,
            liked: true,
        })
    }

    fn unlike(&self, id: &str) -> Result<LikeTruth> {
        self.enter("unlike", id)?;
        let mut state = self.state.lock();
        let removed = state.liked.remove(id);
        let count = state.counts.entry(id.to_string()).or_insert(0);
        if removed {
            *count = (*count - 1).max(0);
        }
        Ok(LikeTruth {
            count: *count,
            liked: false,
        })
    }

    fn bookmark(&self, id: &str) -> Result<bool> {
        self.enter("bookmark", id)?;
        self.state.lock().bookmarked.insert(id.to_string());
        Ok(true)
    }

    fn unbookmark(&self, id: &str) -> Result<bool> {
        self.enter("unbookmark", id)?;
        self.state.lock().bookmarked.remove(id);
        Ok(false)
    }

    fn bookmarked_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.state.lock().bookmarked.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn liked_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.state.lock().liked.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likes_are_idempotent() {
        let service = MockInteractionService::new().with_count("v1", 5);
        assert_eq!(service.like("v1").unwrap(), LikeTruth { count: 6, liked: true });
        assert_eq!(service.like("v1").unwrap(), LikeTruth { count: 6, liked: true });
        assert_eq!(service.unlike("v1").unwrap(), LikeTruth { count: 5, liked: false });
        assert_eq!(service.unlike("v1").unwrap(), LikeTruth { count: 5, liked: false });
    }

    #[test]
    fn liked_ids_follow_mutations() {
        let service = MockInteractionService::new().with_liked("v2");
        service.like("v1").unwrap();
        assert_eq!(service.liked_ids().unwrap(), ["v1", "v2"]);
        service.unlike("v2").unwrap();
        assert_eq!(service.liked_ids().unwrap(), ["v1"]);
    }

    #[test]
    fn failing_service_records_the_call() {
        let service = MockInteractionService::new();
        service.set_failing(true);
        assert!(service.bookmark("v1").is_err());
        assert_eq!(service.calls(), ["bookmark:v1"]);
        service.set_failing(false);
        assert!(service.bookmark("v1").unwrap());
        assert_eq!(service.bookmarked_ids().unwrap(), ["v1"]);
    }
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{FeedItem, OrderKey};

/// How the list is sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedOrdering {
    /// Strictly decreasing by `OrderKey`, newest first.
    #[default]
    Chronological,
    /// Arrival order, as handed out by a discovery pool. Only uniqueness is enforced.
    Sequenced,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("feed: id {0} appears more than once")]
    DuplicateId(String),
    #[error("feed: item at {index} is not newer than its successor")]
    OutOfOrder { index: usize },
    #[error("feed: id set holds {ids} entries for {items} items")]
    IdSetMismatch { ids: usize, items: usize },
}

/// Single writer for the merged list and its companion id set.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    items: Vec<FeedItem>,
    ids: HashSet<String>,
    ordering: FeedOrdering,
}

impl FeedState {
    pub fn new(ordering: FeedOrdering) -> Self {
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
            ordering,
        }
    }

    pub fn ordering(&self) -> FeedOrdering {
        self.ordering
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FeedItem> {
        self.items.get(index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Newest key held, the cursor for "items after".
    pub fn head(&self) -> Option<&OrderKey> {
        self.items.first().map(FeedItem::order_key)
    }

    /// Oldest key held, the cursor for "items before".
    pub fn tail(&self) -> Option<&OrderKey> {
        self.items.last().map(FeedItem::order_key)
    }

    /// Current index of the item with `key`.
    pub fn position(&self, key: &OrderKey) -> Option<usize> {
        if !self.ids.contains(&key.id) {
            return None;
        }
        match self.ordering {
            FeedOrdering::Chronological => {
                let index = self.items.partition_point(|item| item.order_key > *key);
                (self.items.get(index).map(FeedItem::order_key) == Some(key)).then_some(index)
            }
            FeedOrdering::Sequenced => self.items.iter().position(|item| item.id() == key.id),
        }
    }

    /// Appends an older page. Returns the number of items actually added.
    pub fn merge_older(&mut self, items: Vec<FeedItem>) -> usize {
        let survivors = self.survivors(items);
        let added = survivors.len();
        if added == 0 {
            return 0;
        }
        match self.ordering {
            FeedOrdering::Sequenced => self.items.extend(survivors),
            FeedOrdering::Chronological => {
                let fits_after_tail = match (self.tail(), survivors.first()) {
                    (Some(tail), Some(first)) => first.order_key.is_older_than(tail),
                    _ => true,
                };
                if fits_after_tail {
                    self.items.extend(survivors);
                } else {
                    self.insert_sorted(survivors);
                }
            }
        }
        added
    }

    /// Prepends a newer batch. Returns the number of items actually added.
    pub fn merge_newer(&mut self, items: Vec<FeedItem>) -> usize {
        let survivors = self.survivors(items);
        let added = survivors.len();
        if added == 0 {
            return 0;
        }
        match self.ordering {
            FeedOrdering::Sequenced => {
                self.items.splice(0..0, survivors);
            }
            FeedOrdering::Chronological => {
                let fits_before_head = match (self.head(), survivors.last()) {
                    (Some(head), Some(last)) => last.order_key.is_newer_than(head),
                    _ => true,
                };
                if fits_before_head {
                    self.items.splice(0..0, survivors);
                } else {
                    self.insert_sorted(survivors);
                }
            }
        }
        added
    }

    /// Drops everything, e.g. on a filter change.
    pub fn reset(&mut self, ordering: FeedOrdering) {
        self.items.clear();
        self.ids.clear();
        self.ordering = ordering;
    }

    pub fn check_invariants(&self) -> Result<(), FeedError> {
        if self.ids.len() != self.items.len() {
            return Err(FeedError::IdSetMismatch {
                ids: self.ids.len(),
                items: self.items.len(),
            });
        }
        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.id()) || !self.ids.contains(item.id()) {
                return Err(FeedError::DuplicateId(item.id().to_string()));
            }
        }
        if self.ordering == FeedOrdering::Chronological {
            if let Some(index) = self
                .items
                .windows(2)
                .position(|pair| !pair[0].order_key.is_newer_than(&pair[1].order_key))
            {
                return Err(FeedError::OutOfOrder { index });
            }
        }
        Ok(())
    }

    /// Filters known ids (and repeats within the batch), registers the rest.
    fn survivors(&mut self, items: Vec<FeedItem>) -> Vec<FeedItem> {
        let mut survivors: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| self.ids.insert(item.id().to_string()))
            .collect();
        if self.ordering == FeedOrdering::Chronological {
            survivors.sort_by(|a, b| b.order_key.cmp(&a.order_key));
        }
        survivors
    }

    fn insert_sorted(&mut self, survivors: Vec<FeedItem>) {
        for item in survivors {
            let index = self
                .items
                .partition_point(|existing| existing.order_key > item.order_key);
            self.items.insert(index, item);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn item(millis: i64, id: &str) -> FeedItem {
        FeedItem {
            order_key: OrderKey::at_millis(millis, id),
            media_ref: format!("https://cdn.example.com/videos/{id}.mp4"),
            poster_ref: format!("https://cdn.example.com/videos/{id}.webp"),
            title: format!("clip {id}"),
            caption: None,
            owner_ref: None,
            owner: None,
            like_count: None,
        }
    }

    fn ids(feed: &FeedState) -> Vec<&str> {
        feed.items().iter().map(FeedItem::id).collect()
    }

    #[test]
    fn newer_merge_prepends_above_existing() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        feed.merge_older(vec![item(3, "c"), item(2, "b"), item(1, "a")]);
        assert_eq!(feed.merge_newer(vec![item(4, "d")]), 1);
        assert_eq!(ids(&feed), ["d", "c", "b", "a"]);
        assert_eq!(feed.head(), Some(&OrderKey::at_millis(4, "d")));
        assert_eq!(feed.tail(), Some(&OrderKey::at_millis(1, "a")));
        feed.check_invariants().unwrap();
    }

    #[test]
    fn newer_batch_given_oldest_first_still_lands_newest_first() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        feed.merge_older(vec![item(1, "a")]);
        feed.merge_newer(vec![item(2, "b"), item(3, "c")]);
        assert_eq!(ids(&feed), ["c", "b", "a"]);
    }

    #[test]
    fn remerging_a_page_is_a_no_op() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        let page = vec![item(3, "c"), item(2, "b")];
        feed.merge_older(page.clone());
        let before = feed.items().to_vec();
        assert_eq!(feed.merge_older(page.clone()), 0);
        assert_eq!(feed.merge_newer(page), 0);
        assert_eq!(feed.items(), before.as_slice());
    }

    #[test]
    fn duplicates_inside_one_batch_are_dropped() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        assert_eq!(feed.merge_older(vec![item(2, "b"), item(2, "b"), item(1, "a")]), 2);
        feed.check_invariants().unwrap();
    }

    #[test]
    fn late_older_page_overlapping_head_is_spliced_in_order() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        feed.merge_older(vec![item(10, "j"), item(5, "e")]);
        feed.merge_older(vec![item(7, "g"), item(5, "e"), item(2, "b")]);
        assert_eq!(ids(&feed), ["j", "g", "e", "b"]);
        feed.check_invariants().unwrap();
    }

    #[test]
    fn sequenced_feed_keeps_arrival_order() {
        let mut feed = FeedState::new(FeedOrdering::Sequenced);
        feed.merge_older(vec![item(1, "a"), item(9, "z")]);
        feed.merge_older(vec![item(5, "m"), item(1, "a")]);
        assert_eq!(ids(&feed), ["a", "z", "m"]);
        assert_eq!(feed.position(&OrderKey::at_millis(5, "m")), Some(2));
        feed.check_invariants().unwrap();
    }

    #[test]
    fn position_follows_prepends() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        feed.merge_older(vec![item(3, "c"), item(2, "b")]);
        let key = OrderKey::at_millis(2, "b");
        assert_eq!(feed.position(&key), Some(1));
        feed.merge_newer(vec![item(5, "e"), item(4, "d")]);
        assert_eq!(feed.position(&key), Some(3));
        assert_eq!(feed.position(&OrderKey::at_millis(2, "nope")), None);
    }

    #[test]
    fn reset_clears_items_and_ids() {
        let mut feed = FeedState::new(FeedOrdering::Chronological);
        feed.merge_older(vec![item(1, "a")]);
        feed.reset(FeedOrdering::Sequenced);
        assert!(feed.is_empty());
        assert!(!feed.contains("a"));
        assert_eq!(feed.ordering(), FeedOrdering::Sequenced);
    }

    /// Ids map to fixed keys, and pairs of ids share a timestamp.
    fn batch() -> impl Strategy<Value = Vec<FeedItem>> {
        prop::collection::vec(0i64..24, 0..12).prop_map(|raw| {
            raw.into_iter()
                .map(|n| item(n / 2, &format!("id{n:02}")))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn interleaved_merges_keep_ids_unique_and_ordered(
            steps in prop::collection::vec((any::<bool>(), batch()), 0..16)
        ) {
            let mut feed = FeedState::new(FeedOrdering::Chronological);
            for (older, items) in steps {
                if older {
                    feed.merge_older(items);
                } else {
                    feed.merge_newer(items);
                }
                prop_assert!(feed.check_invariants().is_ok());
            }
        }

        #[test]
        fn merge_is_idempotent(items in batch()) {
            let mut feed = FeedState::new(FeedOrdering::Chronological);
            feed.merge_older(items.clone());
            let snapshot = feed.items().to_vec();
            prop_assert_eq!(feed.merge_newer(items.clone()), 0);
            prop_assert_eq!(feed.merge_older(items), 0);
            prop_assert_eq!(feed.items(), snapshot.as_slice());
        }
    }
}

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use crate::model::FeedItem;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Items materialized on each side of the focus.
    pub radius: usize,
    /// Height of one item, normally the viewport height.
    pub item_extent: f64,
    /// Items after the focus that get their media attached ahead of time.
    pub preload_ahead: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            radius: 2,
            item_extent: 844.0,
            preload_ahead: 1,
        }
    }
}

/// Materialized index range plus the spacer sizes that stand in for the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub leading_spacer: f64,
    pub trailing_spacer: f64,
}

impl Window {
    /// `[max(0, f - r), min(len - 1, f + r)]`, or `None` for an empty list.
    /// A focus past the end is clamped to the last item.
    pub fn compute(focus: usize, len: usize, cfg: &WindowConfig) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let focus = focus.min(len - 1);
        let start = focus.saturating_sub(cfg.radius);
        let end = focus.saturating_add(cfg.radius).min(len - 1);
        Some(Self {
            start,
            end,
            leading_spacer: start as f64 * cfg.item_extent,
            trailing_spacer: (len - 1 - end) as f64 * cfg.item_extent,
        })
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total scrollable height; equals the height of the fully rendered list.
    pub fn total_extent(&self, item_extent: f64) -> f64 {
        self.leading_spacer + self.len() as f64 * item_extent + self.trailing_spacer
    }
}

/// Scroll offset at which `index` starts.
pub fn offset_for(index: usize, item_extent: f64) -> f64 {
    index as f64 * item_extent
}

/// The item a snapped viewport at `offset` shows.
pub fn index_at(offset: f64, item_extent: f64, len: usize) -> usize {
    if len == 0 || item_extent <= 0.0 || !offset.is_finite() || offset <= 0.0 {
        return 0;
    }
    let index = (offset / item_extent).round() as usize;
    index.min(len - 1)
}

/// Slots that entered or left the window. Keyed by id so that a prepend,
/// which shifts every index, does not tear down media that is still shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowDiff {
    pub entered: Vec<(usize, String)>,
    pub left: Vec<String>,
}

impl WindowDiff {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Materializer {
    live: Vec<String>,
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> &[String] {
        &self.live
    }

    pub fn update(&mut self, items: &[FeedItem], window: Option<&Window>) -> WindowDiff {
        let wanted: Vec<(usize, String)> = match window {
            Some(window) => window
                .range()
                .filter_map(|index| items.get(index).map(|item| (index, item.id().to_string())))
                .collect(),
            None => Vec::new(),
        };
        let wanted_ids: HashSet<&str> = wanted.iter().map(|(_, id)| id.as_str()).collect();
        let live_ids: HashSet<&str> = self.live.iter().map(String::as_str).collect();

        let left = self
            .live
            .iter()
            .filter(|id| !wanted_ids.contains(id.as_str()))
            .cloned()
            .collect();
        let entered = wanted
            .iter()
            .filter(|(_, id)| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();

        self.live = wanted.into_iter().map(|(_, id)| id).collect();
        WindowDiff { entered, left }
    }

    pub fn clear(&mut self) -> Vec<String> {
        std::mem::take(&mut self.live)
    }
}

/// Holds scroll offsets back until the user stops moving for `delay`.
#[derive(Debug, Clone)]
pub struct ScrollDebounce {
    delay: Duration,
    pending: Option<(f64, Instant)>,
}

impl ScrollDebounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn record(&mut self, offset: f64, now: Instant) {
        self.pending = Some((offset, now));
    }

    /// The settled offset, once, after the quiet period.
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        match self.pending {
            Some((offset, at)) if now.saturating_duration_since(at) >= self.delay => {
                self.pending = None;
                Some(offset)
            }
            _ => None,
        }
    }

    /// Moves a held offset by `delta`, keeping its timestamp. Used when items
    /// are prepended above the offset it was recorded against.
    pub fn shift(&mut self, delta: f64) {
        if let Some((offset, _)) = self.pending.as_mut() {
            *offset = (*offset + delta).max(0.0);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::item;
    use proptest::prelude::*;

    fn cfg(radius: usize) -> WindowConfig {
        WindowConfig {
            radius,
            item_extent: 100.0,
            preload_ahead: 1,
        }
    }

    #[test]
    fn window_clamps_at_both_ends() {
        let top = Window::compute(0, 10, &cfg(2)).unwrap();
        assert_eq!(top.range(), 0..=2);
        assert_eq!(top.leading_spacer, 0.0);
        assert_eq!(top.trailing_spacer, 700.0);

        let bottom = Window::compute(9, 10, &cfg(2)).unwrap();
        assert_eq!(bottom.range(), 7..=9);
        assert_eq!(bottom.leading_spacer, 700.0);
        assert_eq!(bottom.trailing_spacer, 0.0);

        assert_eq!(Window::compute(50, 10, &cfg(2)), Some(bottom));
        assert_eq!(Window::compute(0, 0, &cfg(2)), None);
    }

    #[test]
    fn thousand_items_never_materialize_more_than_five() {
        let config = cfg(2);
        for focus in 0..1000 {
            let window = Window::compute(focus, 1000, &config).unwrap();
            assert!(window.len() <= 5);
            assert!(window.contains(focus));
            assert_eq!(window.total_extent(config.item_extent), 100_000.0);
        }
    }

    #[test]
    fn index_and_offset_agree() {
        assert_eq!(offset_for(3, 844.0), 2532.0);
        assert_eq!(index_at(2532.0, 844.0, 10), 3);
        assert_eq!(index_at(2532.0 + 400.0, 844.0, 10), 3);
        assert_eq!(index_at(2532.0 + 500.0, 844.0, 10), 4);
        assert_eq!(index_at(1e9, 844.0, 10), 9);
        assert_eq!(index_at(-50.0, 844.0, 10), 0);
    }

    #[test]
    fn prepend_keeps_live_slots() {
        let config = cfg(1);
        let mut items = vec![item(3, "c"), item(2, "b"), item(1, "a")];
        let mut materializer = Materializer::new();
        let diff = materializer.update(&items, Window::compute(1, items.len(), &config).as_ref());
        assert_eq!(diff.entered.len(), 3);

        // Focus follows "b" from index 1 to index 2.
        items.insert(0, item(4, "d"));
        let diff = materializer.update(&items, Window::compute(2, items.len(), &config).as_ref());
        assert!(diff.is_empty());

        let diff = materializer.update(&items, Window::compute(3, items.len(), &config).as_ref());
        assert_eq!(diff.left, ["c"]);
        assert!(diff.entered.is_empty());
        assert_eq!(materializer.live(), ["b", "a"]);
    }

    #[test]
    fn debounce_fires_once_after_quiet_period() {
        let start = Instant::now();
        let mut debounce = ScrollDebounce::new(Duration::from_millis(120));
        debounce.record(10.0, start);
        debounce.record(90.0, start + Duration::from_millis(60));
        assert_eq!(debounce.poll(start + Duration::from_millis(150)), None);
        assert_eq!(debounce.poll(start + Duration::from_millis(180)), Some(90.0));
        assert_eq!(debounce.poll(start + Duration::from_millis(400)), None);
    }

    #[test]
    fn shifted_offset_keeps_its_deadline() {
        let start = Instant::now();
        let mut debounce = ScrollDebounce::new(Duration::from_millis(120));
        debounce.shift(300.0);
        assert!(!debounce.is_pending());

        debounce.record(100.0, start);
        debounce.shift(200.0);
        assert_eq!(debounce.poll(start + Duration::from_millis(60)), None);
        assert_eq!(debounce.poll(start + Duration::from_millis(120)), Some(300.0));

        debounce.record(50.0, start);
        debounce.shift(-100.0);
        assert_eq!(debounce.poll(start + Duration::from_millis(120)), Some(0.0));
    }

    proptest! {
        #[test]
        fn window_is_bounded_and_spacers_preserve_height(
            len in 1usize..2000,
            focus in 0usize..2500,
            radius in 0usize..6,
        ) {
            let config = cfg(radius);
            let window = Window::compute(focus, len, &config).unwrap();
            prop_assert!(window.len() <= 2 * radius + 1);
            prop_assert!(window.end < len);
            let total = window.total_extent(config.item_extent);
            prop_assert!((total - len as f64 * config.item_extent).abs() < 1e-6);
        }
    }
}

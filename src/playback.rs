use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Platform media layer. Attaching is asynchronous: the sink reports
/// readiness later through [`PlaybackScheduler::media_ready`], echoing the
/// generation it was given.
pub trait MediaSink: Send {
    fn attach(&mut self, id: &str, media_ref: &str, generation: Generation);
    fn detach(&mut self, id: &str);
    fn play(&mut self, id: &str);
    fn pause(&mut self, id: &str);
    fn set_muted(&mut self, id: &str, muted: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Materialized but no source attached.
    Unloaded,
    /// Source attached, waiting for the sink.
    Loading,
    Paused,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    Playing,
    Paused,
    /// The completion belonged to an older generation and was dropped.
    Stale,
}

/// One observer sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Visibility {
    pub id: String,
    pub index: usize,
    pub ratio: f64,
}

#[derive(Debug)]
struct Slot {
    media_ref: String,
    state: SlotState,
    generation: Generation,
    wants_play: bool,
}

/// Sole writer of the "currently playing" slot.
pub struct PlaybackScheduler {
    sink: Box<dyn MediaSink>,
    slots: HashMap<String, Slot>,
    active: Option<String>,
    threshold: f64,
    muted: bool,
    issued: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn MediaSink>, threshold: f64) -> Self {
        Self {
            sink,
            slots: HashMap::new(),
            active: None,
            threshold,
            muted: true,
            issued: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Slot chosen to play. It may still be loading.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Slot actually playing right now.
    pub fn playing(&self) -> Option<&str> {
        self.active
            .as_deref()
            .filter(|id| self.state(id) == Some(SlotState::Playing))
    }

    pub fn playing_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.state == SlotState::Playing)
            .count()
    }

    pub fn state(&self, id: &str) -> Option<SlotState> {
        self.slots.get(id).map(|slot| slot.state)
    }

    pub fn generation(&self, id: &str) -> Option<Generation> {
        self.slots.get(id).map(|slot| slot.generation)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    // Tokens come from one scheduler-wide counter, so a slot that is torn
    // down and materialized again never reuses an old value.
    fn bump(&mut self) -> Generation {
        self.issued += 1;
        Generation(self.issued)
    }

    /// Registers an item that entered the window. No source is attached yet.
    pub fn materialize(&mut self, id: &str, media_ref: &str) {
        if self.slots.contains_key(id) {
            return;
        }
        let generation = self.bump();
        self.slots.insert(
            id.to_string(),
            Slot {
                media_ref: media_ref.to_string(),
                state: SlotState::Unloaded,
                generation,
                wants_play: false,
            },
        );
    }

    /// Releases an item that left the window.
    pub fn teardown(&mut self, id: &str) {
        let Some(slot) = self.slots.remove(id) else {
            return;
        };
        if slot.state != SlotState::Unloaded {
            self.sink.detach(id);
        }
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        debug!(id, "slot torn down");
    }

    pub fn clear(&mut self) {
        let ids: Vec<String> = self.slots.keys().cloned().collect();
        for id in ids {
            self.teardown(&id);
        }
        self.active = None;
    }

    /// Attaches a source ahead of need, leaving it paused once ready.
    pub fn preload(&mut self, id: &str) {
        if self.state(id) == Some(SlotState::Unloaded) {
            self.load(id, false);
        }
    }

    fn load(&mut self, id: &str, wants_play: bool) {
        let generation = self.bump();
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        slot.generation = generation;
        slot.state = SlotState::Loading;
        slot.wants_play = wants_play;
        let media_ref = slot.media_ref.clone();
        self.sink.attach(id, &media_ref, generation);
        self.sink.set_muted(id, self.muted);
    }

    /// Makes `id` the only slot allowed to play.
    pub fn promote(&mut self, id: &str) {
        if !self.slots.contains_key(id) {
            return;
        }
        if let Some(previous) = self.active.take() {
            if previous != id {
                self.deactivate(&previous);
            }
        }
        self.active = Some(id.to_string());
        let state = self.state(id);
        match state {
            Some(SlotState::Unloaded) => self.load(id, true),
            Some(SlotState::Loading) => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.wants_play = true;
                }
            }
            Some(SlotState::Paused) => {
                self.sink.set_muted(id, self.muted);
                self.sink.play(id);
                self.set_state(id, SlotState::Playing);
            }
            Some(SlotState::Playing) | None => {}
        }
        debug!(id, ?state, "slot promoted");
    }

    fn deactivate(&mut self, id: &str) {
        match self.state(id) {
            Some(SlotState::Playing) => {
                self.sink.pause(id);
                self.set_state(id, SlotState::Paused);
            }
            Some(SlotState::Loading) => {
                let generation = self.bump();
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.generation = generation;
                    slot.state = SlotState::Unloaded;
                    slot.wants_play = false;
                }
                self.sink.detach(id);
            }
            _ => {}
        }
    }

    fn set_state(&mut self, id: &str, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.state = state;
        }
    }

    /// Completion from the sink. Only the current generation may promote.
    pub fn media_ready(&mut self, id: &str, generation: Generation) -> ReadyOutcome {
        let current = self
            .slots
            .get(id)
            .filter(|slot| slot.generation == generation && slot.state == SlotState::Loading)
            .map(|slot| slot.wants_play);
        let Some(wants_play) = current else {
            // Nothing attached for this id anymore: release whatever the late load left behind.
            if matches!(self.state(id), None | Some(SlotState::Unloaded)) {
                self.sink.detach(id);
            }
            debug!(id, %generation, "stale media completion dropped");
            return ReadyOutcome::Stale;
        };
        if wants_play && self.active.as_deref() == Some(id) {
            self.sink.play(id);
            self.set_state(id, SlotState::Playing);
            ReadyOutcome::Playing
        } else {
            self.set_state(id, SlotState::Paused);
            ReadyOutcome::Paused
        }
    }

    /// Applies one observer sample and returns the winner, if any. Without a
    /// winner the current slot keeps playing.
    pub fn observe(&mut self, samples: &[Visibility]) -> Option<String> {
        let winner = pick_winner(samples, self.threshold)?;
        if self.active.as_deref() != Some(winner.as_str()) {
            self.promote(&winner);
        }
        Some(winner)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        let attached: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.state != SlotState::Unloaded)
            .map(|(id, _)| id.clone())
            .collect();
        for id in attached {
            self.sink.set_muted(&id, muted);
        }
    }
}

/// Highest ratio at or above the threshold; ties go to the lower index.
pub fn pick_winner(samples: &[Visibility], threshold: f64) -> Option<String> {
    samples
        .iter()
        .filter(|sample| sample.ratio >= threshold)
        .min_by(|a, b| {
            b.ratio
                .partial_cmp(&a.ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        })
        .map(|sample| sample.id.clone())
}

/// Sink that records every call, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<String>>>,
    attached: Arc<Mutex<HashMap<String, Generation>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Generation handed out with the latest attach of `id`.
    pub fn attached(&self, id: &str) -> Option<Generation> {
        self.attached.lock().get(id).copied()
    }

    /// Ids currently holding a source, sorted.
    pub fn attached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.attached.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn push(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

impl MediaSink for RecordingSink {
    fn attach(&mut self, id: &str, _media_ref: &str, generation: Generation) {
        self.attached.lock().insert(id.to_string(), generation);
        self.push(format!("attach:{id}"));
    }

    fn detach(&mut self, id: &str) {
        self.attached.lock().remove(id);
        self.push(format!("detach:{id}"));
    }

    fn play(&mut self, id: &str) {
        self.push(format!("play:{id}"));
    }

    fn pause(&mut self, id: &str) {
        self.push(format!("pause:{id}"));
    }

    fn set_muted(&mut self, id: &str, muted: bool) {
        self.push(format!("muted:{id}:{muted}"));
    }
}

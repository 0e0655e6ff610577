use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::data::LikeTruth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Confirmed,
    PendingLocal,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeState {
    pub server_count: i64,
    pub liked: bool,
    pub delta: i64,
    pub phase: Phase,
}

impl LikeState {
    pub fn with_count(server_count: i64) -> Self {
        Self {
            server_count,
            ..Self::default()
        }
    }

    pub fn displayed_count(&self) -> i64 {
        self.server_count + self.delta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookmarkState {
    pub bookmarked: bool,
    pub phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Like,
    Unlike,
    Bookmark,
    Unbookmark,
}

/// A remote call the caller must issue, then report back with the same ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub ticket: u64,
    pub id: String,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    Started(Mutation),
    /// A prior toggle on the same id is still in flight.
    Queued { id: String, queued: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub id: String,
    pub phase: Phase,
    pub error: Option<String>,
    /// The queued toggle that starts now that the previous one settled.
    pub next: Option<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay: nothing in flight for {0}")]
    NothingInFlight(String),
    #[error("overlay: ticket {ticket} does not match the in-flight mutation for {id}")]
    UnknownTicket { id: String, ticket: u64 },
}

/// Optimistic state for one kind of interaction.
pub trait Optimistic: Clone + Default {
    type Truth;

    /// Applies the toggle locally and names the remote call to make.
    fn flip(&mut self) -> MutationKind;
    fn confirm(&mut self, truth: Self::Truth);
    fn roll_back(&mut self, previous: &Self);
}

impl Optimistic for LikeState {
    type Truth = LikeTruth;

    fn flip(&mut self) -> MutationKind {
        self.liked = !self.liked;
        self.delta += if self.liked { 1 } else { -1 };
        self.phase = Phase::PendingLocal;
        if self.liked {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        }
    }

    fn confirm(&mut self, truth: LikeTruth) {
        self.server_count = truth.count;
        self.liked = truth.liked;
        self.delta = 0;
        self.phase = Phase::Confirmed;
    }

    fn roll_back(&mut self, previous: &Self) {
        self.liked = previous.liked;
        self.delta = previous.delta;
        self.phase = Phase::RolledBack;
    }
}

impl Optimistic for BookmarkState {
    type Truth = bool;

    fn flip(&mut self) -> MutationKind {
        self.bookmarked = !self.bookmarked;
        self.phase = Phase::PendingLocal;
        if self.bookmarked {
            MutationKind::Bookmark
        } else {
            MutationKind::Unbookmark
        }
    }

    fn confirm(&mut self, truth: bool) {
        self.bookmarked = truth;
        self.phase = Phase::Confirmed;
    }

    fn roll_back(&mut self, previous: &Self) {
        self.bookmarked = previous.bookmarked;
        self.phase = Phase::RolledBack;
    }
}

#[derive(Debug, Clone)]
struct InFlight<S> {
    ticket: u64,
    previous: S,
}

#[derive(Debug, Clone, Default)]
struct Entry<S> {
    state: S,
    in_flight: Option<InFlight<S>>,
    queued: usize,
    /// Set once the viewer toggled this id; server seeds no longer apply.
    touched: bool,
}

/// Per-id optimistic entries, at most one mutation in flight per id.
#[derive(Debug, Clone)]
pub struct Ledger<S> {
    entries: HashMap<String, Entry<S>>,
    next_ticket: u64,
}

impl<S: Optimistic> Default for Ledger<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 1,
        }
    }
}

impl<S: Optimistic> Ledger<S> {
    pub fn get(&self, id: &str) -> Option<&S> {
        self.entries.get(id).map(|entry| &entry.state)
    }

    pub fn in_flight(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    pub fn queued(&self, id: &str) -> usize {
        self.entries.get(id).map_or(0, |entry| entry.queued)
    }

    /// Creates the entry on first sight; existing entries are left alone.
    pub fn observe(&mut self, id: &str, initial: S) {
        self.entries.entry(id.to_string()).or_insert_with(|| Entry {
            state: initial,
            in_flight: None,
            queued: 0,
            touched: false,
        });
    }

    /// Applies `f` to an existing entry the viewer has not toggled yet.
    pub fn amend_untouched(&mut self, id: &str, f: impl FnOnce(&mut S)) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if !entry.touched => {
                f(&mut entry.state);
                true
            }
            _ => false,
        }
    }

    pub fn toggle(&mut self, id: &str) -> Toggle {
        let entry = self.entries.entry(id.to_string()).or_default();
        if entry.in_flight.is_some() {
            entry.queued += 1;
            return Toggle::Queued {
                id: id.to_string(),
                queued: entry.queued,
            };
        }
        Toggle::Started(self.start(id))
    }

    fn start(&mut self, id: &str) -> Mutation {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let entry = self.entries.entry(id.to_string()).or_default();
        let previous = entry.state.clone();
        let kind = entry.state.flip();
        entry.touched = true;
        entry.in_flight = Some(InFlight { ticket, previous });
        Mutation {
            ticket,
            id: id.to_string(),
            kind,
        }
    }

    /// Folds the remote outcome in. Success adopts server truth; failure
    /// restores the pre-toggle state and drops toggles queued behind it.
    pub fn settle(
        &mut self,
        id: &str,
        ticket: u64,
        outcome: Result<S::Truth, String>,
    ) -> Result<Settled, OverlayError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| OverlayError::NothingInFlight(id.to_string()))?;
        let in_flight = match entry.in_flight.take() {
            Some(in_flight) if in_flight.ticket == ticket => in_flight,
            Some(other) => {
                entry.in_flight = Some(other);
                return Err(OverlayError::UnknownTicket {
                    id: id.to_string(),
                    ticket,
                });
            }
            None => return Err(OverlayError::NothingInFlight(id.to_string())),
        };

        let (phase, error) = match outcome {
            Ok(truth) => {
                entry.state.confirm(truth);
                (Phase::Confirmed, None)
            }
            Err(error) => {
                entry.state.roll_back(&in_flight.previous);
                if entry.queued > 0 {
                    warn!(id, dropped = entry.queued, "queued toggles dropped after failure");
                    entry.queued = 0;
                }
                (Phase::RolledBack, Some(error))
            }
        };

        let next = if entry.queued > 0 {
            entry.queued -= 1;
            Some(self.start(id))
        } else {
            None
        };
        debug!(id, ticket, ?phase, chained = next.is_some(), "mutation settled");
        Ok(Settled {
            id: id.to_string(),
            phase,
            error,
            next,
        })
    }
}

/// Likes and bookmarks layered over server truth.
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    likes: Ledger<LikeState>,
    bookmarks: Ledger<BookmarkState>,
    /// Ids the server says the viewer liked.
    liked_seed: HashSet<String>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current like state; unseen items read as `{0, false, 0}`.
    pub fn like(&self, id: &str) -> LikeState {
        self.likes.get(id).copied().unwrap_or_default()
    }

    pub fn bookmark(&self, id: &str) -> BookmarkState {
        self.bookmarks.get(id).copied().unwrap_or_default()
    }

    pub fn likes(&self) -> &Ledger<LikeState> {
        &self.likes
    }

    pub fn bookmarks(&self) -> &Ledger<BookmarkState> {
        &self.bookmarks
    }

    /// Seeds the like entry from the aggregate count a fetched row carried.
    pub fn observe_like_count(&mut self, id: &str, server_count: Option<i64>) {
        self.likes.observe(
            id,
            LikeState {
                liked: self.liked_seed.contains(id),
                ..LikeState::with_count(server_count.unwrap_or(0))
            },
        );
    }

    /// Records the viewer's server-side likes. Entries already shown flip to
    /// liked unless the viewer toggled them first; later ones start liked.
    pub fn seed_likes<I, T>(&mut self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for id in ids {
            let id = id.as_ref();
            self.likes.amend_untouched(id, |state| state.liked = true);
            self.liked_seed.insert(id.to_string());
        }
    }

    pub fn seed_bookmarks<I, T>(&mut self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for id in ids {
            self.bookmarks.observe(
                id.as_ref(),
                BookmarkState {
                    bookmarked: true,
                    phase: Phase::Confirmed,
                },
            );
        }
    }

    pub fn toggle_like(&mut self, id: &str) -> Toggle {
        self.likes.toggle(id)
    }

    pub fn toggle_bookmark(&mut self, id: &str) -> Toggle {
        self.bookmarks.toggle(id)
    }

    pub fn settle_like(
        &mut self,
        id: &str,
        ticket: u64,
        outcome: Result<LikeTruth, String>,
    ) -> Result<Settled, OverlayError> {
        self.likes.settle(id, ticket, outcome)
    }

    pub fn settle_bookmark(
        &mut self,
        id: &str,
        ticket: u64,
        outcome: Result<bool, String>,
    ) -> Result<Settled, OverlayError> {
        self.bookmarks.settle(id, ticket, outcome)
    }
}

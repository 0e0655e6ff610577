use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Position of an item in the collection: creation time, ties broken by id.
///
/// Within one timestamp the smaller id is the newer key, so a newest-first
/// list shows tied items in ascending id order and a cursor on `"a"` still
/// reaches `"a2"` when paging older.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub timestamp: DateTime<Utc>,
    pub id: String,
}

impl OrderKey {
    pub fn new(timestamp: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }

    /// Convenience for tests and seed data: a key at `millis` since the epoch.
    pub fn at_millis(millis: i64, id: impl Into<String>) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default();
        Self::new(timestamp, id)
    }

    pub fn is_newer_than(&self, other: &OrderKey) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    pub fn is_older_than(&self, other: &OrderKey) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.timestamp.to_rfc3339(), self.id)
    }
}

/// Public profile of an item's owner, joined in at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A normalized feed entry. Never edited in place once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub order_key: OrderKey,
    pub media_ref: String,
    pub poster_ref: String,
    pub title: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub owner_ref: Option<String>,
    #[serde(default)]
    pub owner: Option<OwnerProfile>,
    /// Aggregate like count as reported by the store at fetch time.
    #[serde(default)]
    pub like_count: Option<i64>,
}

impl FeedItem {
    pub fn id(&self) -> &str {
        &self.order_key.id
    }

    pub fn order_key(&self) -> &OrderKey {
        &self.order_key
    }

    /// Title for display: the explicit title, else the caption, else a fixed label.
    pub fn display_title(&self) -> &str {
        if !self.title.trim().is_empty() {
            return &self.title;
        }
        match self.caption.as_deref() {
            Some(caption) if !caption.trim().is_empty() => caption,
            _ => "Video",
        }
    }

    /// `@username`, else the display name, else a short id handle, else `@user`.
    pub fn owner_label(&self) -> String {
        let profile = self.owner.as_ref();
        if let Some(username) = profile.and_then(|p| normalize_optional_text(p.username.as_deref())) {
            return format!("@{username}");
        }
        if let Some(name) = profile.and_then(|p| normalize_optional_text(p.display_name.as_deref())) {
            return name;
        }
        match self.owner_ref.as_deref() {
            Some(owner) if !owner.is_empty() => format!("@{}", owner.chars().take(8).collect::<String>()),
            _ => "@user".to_string(),
        }
    }

    pub fn owner_avatar(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .and_then(|p| p.avatar_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Trims optional text and collapses blank values to `None`.
pub fn normalize_optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::debug;

use crate::data::{InteractionService, LikeTruth};
use crate::media::PosterConvention;
use crate::model::{normalize_optional_text, FeedItem, OrderKey, OwnerProfile};
use crate::source::{ContentQuery, Direction, ListQuery};

/// SQLite-backed content collection plus the viewer's likes and bookmarks.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    viewer_id: String,
    posters: PosterConvention,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub media_ref: String,
    pub storage_path: Option<String>,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub owner_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
    pub viewer_id: String,
    pub posters: PosterConvention,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: None,
            viewer_id: "local".into(),
            posters: PosterConvention::default(),
        }
    }
}

const ITEM_COLUMNS: &str = r#"
SELECT i.id, i.created_at, i.media_ref, i.storage_path, i.title, i.caption, i.owner_ref,
  (SELECT COUNT(*) FROM likes l WHERE l.item_id = i.id) AS like_count,
  p.id, p.username, p.display_name, p.avatar_url
FROM items i
LEFT JOIN profiles p ON p.id = i.owner_ref
"#;

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            viewer_id: opts.viewer_id,
            posters: opts.posters,
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// Publishes or updates an item. The creation time of an existing item is kept.
    pub fn insert_item(&self, item: NewItem) -> Result<()> {
        if item.id.trim().is_empty() {
            bail!("storage: item id required");
        }
        if item.media_ref.trim().is_empty() {
            bail!("storage: media reference required for {}", item.id);
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO items (id, created_at, media_ref, storage_path, title, caption, owner_ref)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(id) DO UPDATE SET
  media_ref = excluded.media_ref,
  storage_path = excluded.storage_path,
  title = excluded.title,
  caption = excluded.caption,
  owner_ref = excluded.owner_ref
"#,
            params![
                item.id,
                item.created_at.timestamp_millis(),
                item.media_ref,
                item.storage_path,
                item.title,
                item.caption,
                item.owner_ref,
            ],
        )
        .with_context(|| format!("storage: insert item {}", item.id))?;
        Ok(())
    }

    pub fn upsert_profile(&self, owner_ref: &str, profile: &OwnerProfile) -> Result<()> {
        if owner_ref.trim().is_empty() {
            bail!("storage: profile id required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO profiles (id, username, display_name, avatar_url)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
  username = excluded.username,
  display_name = excluded.display_name,
  avatar_url = excluded.avatar_url
"#,
            params![
                owner_ref,
                profile.username,
                profile.display_name,
                profile.avatar_url,
            ],
        )
        .with_context(|| format!("storage: upsert profile {owner_ref}"))?;
        Ok(())
    }

    pub fn count_items(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .context("storage: count items")?;
        Ok(count.max(0) as usize)
    }

    /// Inserts `count` demo clips one minute apart, the newest a minute before `now`.
    pub fn seed_demo(&self, count: usize, now: DateTime<Utc>) -> Result<usize> {
        self.upsert_profile(
            "demo",
            &OwnerProfile {
                username: Some("demo".into()),
                display_name: Some("Demo Channel".into()),
                avatar_url: None,
            },
        )?;
        let mut inserted = 0;
        for n in 0..count {
            let id = format!("demo-{:04}", n + 1);
            let created_at = now - chrono::Duration::minutes((count - n) as i64);
            self.insert_item(NewItem {
                media_ref: format!("https://cdn.example.com/demo/{id}.mp4"),
                storage_path: Some(format!("demo/{id}.mp4")),
                title: Some(format!("Demo clip {}", n + 1)),
                caption: None,
                owner_ref: Some("demo".into()),
                created_at,
                id,
            })?;
            inserted += 1;
        }
        debug!(inserted, "demo items seeded");
        Ok(inserted)
    }

    fn like_truth(conn: &Connection, item_id: &str, viewer_id: &str) -> Result<LikeTruth> {
        let (count, liked): (i64, bool) = conn
            .query_row(
                r#"
SELECT COUNT(*), COALESCE(SUM(viewer_id = ?2), 0) > 0
FROM likes
WHERE item_id = ?1
"#,
                params![item_id, viewer_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("storage: read like state for {item_id}"))?;
        Ok(LikeTruth { count, liked })
    }

    fn item_from_row(&self, row: &Row<'_>) -> rusqlite::Result<FeedItem> {
        let id: String = row.get(0)?;
        let created: i64 = row.get(1)?;
        let media_ref: String = row.get(2)?;
        let storage_path: Option<String> = row.get(3)?;
        let title: Option<String> = row.get(4)?;
        let caption: Option<String> = row.get(5)?;
        let owner_ref: Option<String> = row.get(6)?;
        let like_count: i64 = row.get(7)?;
        let profile_id: Option<String> = row.get(8)?;
        let owner = match profile_id {
            Some(_) => Some(OwnerProfile {
                username: normalize_optional_text(row.get::<_, Option<String>>(9)?.as_deref()),
                display_name: normalize_optional_text(row.get::<_, Option<String>>(10)?.as_deref()),
                avatar_url: normalize_optional_text(row.get::<_, Option<String>>(11)?.as_deref()),
            }),
            None => None,
        };
        Ok(FeedItem {
            poster_ref: self.posters.resolve(&media_ref, storage_path.as_deref()),
            order_key: OrderKey::new(
                Utc.timestamp_millis_opt(created)
                    .single()
                    .unwrap_or_default(),
                id,
            ),
            media_ref,
            title: normalize_optional_text(title.as_deref()).unwrap_or_default(),
            caption: normalize_optional_text(caption.as_deref()),
            owner_ref: normalize_optional_text(owner_ref.as_deref()),
            owner,
            like_count: Some(like_count),
        })
    }
}

impl ContentQuery for Store {
    fn list(&self, query: &ListQuery) -> Result<Vec<FeedItem>> {
        let mut sql = String::from(ITEM_COLUMNS);
        let mut values: Vec<Value> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        // Tied timestamps list in ascending id order, so "older" means a
        // larger id within the cursor's timestamp.
        if let Some(cursor) = &query.cursor {
            let millis = cursor.timestamp.timestamp_millis();
            values.push(Value::Integer(millis));
            values.push(Value::Text(cursor.id.clone()));
            let (ts, id) = (values.len() - 1, values.len());
            clauses.push(match query.direction {
                Direction::Older => format!(
                    "(i.created_at < ?{ts} OR (i.created_at = ?{ts} AND i.id > ?{id}))"
                ),
                Direction::Newer => format!(
                    "(i.created_at > ?{ts} OR (i.created_at = ?{ts} AND i.id < ?{id}))"
                ),
            });
        }
        if let Some(ids) = &query.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let start = values.len();
            let placeholders = (0..ids.len())
                .map(|i| format!("?{}", start + i + 1))
                .collect::<Vec<_>>()
                .join(",");
            values.extend(ids.iter().cloned().map(Value::Text));
            clauses.push(format!("i.id IN ({placeholders})"));
        }
        if !clauses.is_empty() {
            sql.push_str("WHERE ");
            sql.push_str(&clauses.join(" AND "));
            sql.push('\n');
        }
        let ascending = query.direction == Direction::Newer;
        sql.push_str(if ascending {
            "ORDER BY i.created_at ASC, i.id DESC\n"
        } else {
            "ORDER BY i.created_at DESC, i.id ASC\n"
        });
        if let Some(limit) = query.limit {
            values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
            sql.push_str(&format!("LIMIT ?{}\n", values.len()));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("storage: prepare list query")?;
        let mut items = stmt
            .query_map(params_from_iter(values), |row| self.item_from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("storage: list items")?;
        if ascending {
            items.reverse();
        }
        Ok(items)
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM items ORDER BY created_at DESC, id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("storage: list item ids")?;
        Ok(ids)
    }
}

impl InteractionService for Store {
    fn like(&self, id: &str) -> Result<LikeTruth> {
        let conn = self.conn.lock();
        // Liking twice is a no-op, not a unique violation.
        conn.execute(
            "INSERT INTO likes (item_id, viewer_id, created_at) VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING",
            params![id, self.viewer_id, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("storage: like {id}"))?;
        Self::like_truth(&conn, id, &self.viewer_id)
    }

    fn unlike(&self, id: &str) -> Result<LikeTruth> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM likes WHERE item_id = ?1 AND viewer_id = ?2",
            params![id, self.viewer_id],
        )
        .with_context(|| format!("storage: unlike {id}"))?;
        Self::like_truth(&conn, id, &self.viewer_id)
    }

    fn bookmark(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bookmarks (item_id, viewer_id, created_at) VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING",
            params![id, self.viewer_id, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("storage: bookmark {id}"))?;
        Ok(true)
    }

    fn unbookmark(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM bookmarks WHERE item_id = ?1 AND viewer_id = ?2",
            params![id, self.viewer_id],
        )
        .with_context(|| format!("storage: unbookmark {id}"))?;
        Ok(false)
    }

    fn bookmarked_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT item_id FROM bookmarks WHERE viewer_id = ?1 ORDER BY created_at DESC",
        )?;
        let ids = stmt
            .query_map(params![self.viewer_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("storage: list bookmarks")?;
        Ok(ids)
    }

    fn liked_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT item_id FROM likes WHERE viewer_id = ?1 ORDER BY created_at DESC")?;
        let ids = stmt
            .query_map(params![self.viewer_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("storage: list likes")?;
        Ok(ids)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS items (
  id TEXT PRIMARY KEY,
  created_at INTEGER NOT NULL,
  media_ref TEXT NOT NULL,
  storage_path TEXT,
  title TEXT,
  caption TEXT,
  owner_ref TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_order ON items(created_at DESC, id ASC);
"#,
        r#"
CREATE TABLE IF NOT EXISTS likes (
  item_id TEXT NOT NULL,
  viewer_id TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  PRIMARY KEY (item_id, viewer_id),
  FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS bookmarks (
  item_id TEXT NOT NULL,
  viewer_id TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  PRIMARY KEY (item_id, viewer_id),
  FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS profiles (
  id TEXT PRIMARY KEY,
  username TEXT,
  display_name TEXT,
  avatar_url TEXT
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("reel-feed").join("feed.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn store() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("feed.db")),
            viewer_id: "viewer-1".into(),
            ..Options::default()
        })
        .unwrap();
        (dir, store)
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    fn new_item(id: &str, millis: i64) -> NewItem {
        NewItem {
            id: id.into(),
            created_at: at(millis),
            media_ref: format!("https://cdn.example.com/{id}.mp4?sig=1"),
            storage_path: None,
            title: Some(format!(" {id} ")),
            caption: Some("  ".into()),
            owner_ref: None,
        }
    }

    fn ids(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(FeedItem::id).collect()
    }

    #[test]
    fn open_and_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("feed.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
            ..Options::default()
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn rows_are_normalized() {
        let (_dir, store) = store();
        store.insert_item(new_item("c", 3_000)).unwrap();
        let items = store.list(&ListQuery::first(10)).unwrap();
        let item = &items[0];
        assert_eq!(item.title, "c");
        assert_eq!(item.caption, None);
        assert_eq!(item.poster_ref, "https://cdn.example.com/c.webp");
        assert_eq!(item.like_count, Some(0));
        assert_eq!(item.order_key, OrderKey::at_millis(3_000, "c"));
    }

    #[test]
    fn tuple_cursor_reaches_same_timestamp_sibling() {
        let (_dir, store) = store();
        for (id, millis) in [("c", 3_000), ("b", 2_000), ("a", 1_000), ("a2", 1_000), ("z", 500)] {
            store.insert_item(new_item(id, millis)).unwrap();
        }
        let older = store
            .list(&ListQuery::older_than(&OrderKey::at_millis(1_000, "a"), 2))
            .unwrap();
        assert_eq!(ids(&older), ["a2", "z"]);

        let newer = store
            .list(&ListQuery::newer_than(&OrderKey::at_millis(1_000, "a2")))
            .unwrap();
        assert_eq!(ids(&newer), ["c", "b", "a"]);

        let members = store
            .list(&ListQuery::members(vec!["z".into(), "c".into(), "ghost".into()]))
            .unwrap();
        assert_eq!(ids(&members), ["c", "z"]);
        assert_eq!(store.list_ids().unwrap(), ["c", "b", "a", "a2", "z"]);
    }

    #[test]
    fn likes_are_idempotent_and_counted() {
        let (_dir, store) = store();
        store.insert_item(new_item("v1", 1_000)).unwrap();
        assert_eq!(store.like("v1").unwrap(), LikeTruth { count: 1, liked: true });
        assert_eq!(store.like("v1").unwrap(), LikeTruth { count: 1, liked: true });
        let items = store.list(&ListQuery::first(1)).unwrap();
        assert_eq!(items[0].like_count, Some(1));
        assert_eq!(store.unlike("v1").unwrap(), LikeTruth { count: 0, liked: false });
        assert!(store.like("missing").is_err());
    }

    #[test]
    fn bookmarks_round_trip_per_viewer() {
        let (_dir, store) = store();
        store.insert_item(new_item("v1", 1_000)).unwrap();
        store.insert_item(new_item("v2", 2_000)).unwrap();
        assert!(store.bookmark("v2").unwrap());
        assert!(store.bookmark("v2").unwrap());
        assert_eq!(store.bookmarked_ids().unwrap(), ["v2"]);
        assert!(!store.unbookmark("v2").unwrap());
        assert!(store.bookmarked_ids().unwrap().is_empty());
    }

    #[test]
    fn liked_ids_belong_to_the_viewer() {
        let (dir, store) = store();
        store.insert_item(new_item("v1", 1_000)).unwrap();
        store.insert_item(new_item("v2", 2_000)).unwrap();
        store.like("v1").unwrap();
        let other = Store::open(Options {
            path: Some(dir.path().join("feed.db")),
            viewer_id: "viewer-2".into(),
            ..Options::default()
        })
        .unwrap();
        other.like("v2").unwrap();

        assert_eq!(store.liked_ids().unwrap(), ["v1"]);
        assert_eq!(other.liked_ids().unwrap(), ["v2"]);
    }

    #[test]
    fn owner_profile_is_joined_in() {
        let (_dir, store) = store();
        let mut owned = new_item("v1", 1_000);
        owned.owner_ref = Some("u-42".into());
        store.insert_item(owned).unwrap();
        let mut stranger = new_item("v2", 2_000);
        stranger.owner_ref = Some("u-unknown".into());
        store.insert_item(stranger).unwrap();
        store
            .upsert_profile(
                "u-42",
                &OwnerProfile {
                    username: Some("mina".into()),
                    display_name: Some("Mina K".into()),
                    avatar_url: Some(" ".into()),
                },
            )
            .unwrap();

        let items = store.list(&ListQuery::first(10)).unwrap();
        assert_eq!(ids(&items), ["v2", "v1"]);
        assert_eq!(items[0].owner, None);
        assert_eq!(items[0].owner_label(), "@u-unknow");
        let owner = items[1].owner.as_ref().unwrap();
        assert_eq!(owner.username.as_deref(), Some("mina"));
        assert_eq!(owner.avatar_url, None);
        assert_eq!(items[1].owner_label(), "@mina");
    }

    #[test]
    fn seed_demo_fills_newest_last() {
        let (_dir, store) = store();
        let now = at(10_000_000);
        assert_eq!(store.seed_demo(3, now).unwrap(), 3);
        assert_eq!(store.count_items().unwrap(), 3);
        assert_eq!(store.list_ids().unwrap(), ["demo-0003", "demo-0002", "demo-0001"]);
        let items = store.list(&ListQuery::first(1)).unwrap();
        assert_eq!(items[0].owner_label(), "@demo");
    }

    #[test]
    fn reopening_keeps_schema_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feed.db");
        let opts = Options {
            path: Some(path),
            ..Options::default()
        };
        let store = Store::open(opts.clone()).unwrap();
        store.insert_item(new_item("v1", 1)).unwrap();
        store.close().unwrap();
        let store = Store::open(opts).unwrap();
        assert_eq!(store.count_items().unwrap(), 1);
    }
}

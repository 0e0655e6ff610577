use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::data::{InteractionService, LikeTruth};
use crate::media::PosterConvention;
use crate::model::{normalize_optional_text, FeedItem, OrderKey, OwnerProfile};
use crate::source::{ContentQuery, Direction, ListQuery};

const SELECT_COLUMNS: &str =
    "id,playback_url,storage_path,title,caption,owner_id,created_at,video_likes(count)";
const LIKES_TABLE: &str = "video_likes";
const BOOKMARKS_TABLE: &str = "video_bookmarks";
const PROFILES_TABLE: &str = "user_profiles";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// Viewer session token; the api key is sent instead when absent.
    pub access_token: Option<String>,
    pub table: String,
    pub viewer_id: Option<String>,
    pub timeout: Duration,
    pub posters: PosterConvention,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            table: "videos".into(),
            viewer_id: None,
            timeout: Duration::from_secs(10),
            posters: PosterConvention::default(),
            http_client: None,
        }
    }
}

/// Client for a PostgREST-style content store.
pub struct Client {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
    table: String,
    viewer_id: Option<String>,
    posters: PosterConvention,
}

/// Raw row as the store returns it. Every field is optional until normalized.
#[derive(Debug, Default, Deserialize)]
struct VideoRow {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    playback_url: Option<String>,
    #[serde(default)]
    storage_path: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    video_likes: Value,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct ViewerRow {
    video_id: Value,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: Value,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("rest: base url required");
        }
        if config.api_key.trim().is_empty() {
            bail!("rest: api key required");
        }
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("rest: parse base url")?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout)
                .build()
                .context("rest: build http client")?,
        };
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
            access_token: config.access_token,
            table: config.table,
            viewer_id: config.viewer_id,
            posters: config.posters,
        })
    }

    fn viewer(&self) -> Result<&str> {
        self.viewer_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("rest: a signed-in viewer is required for interactions"))
    }

    fn request(
        &self,
        method: Method,
        table: &str,
        params: &[(String, String)],
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(&format!("rest/v1/{table}"))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        let mut req = self
            .http
            .request(method, url)
            .header("apikey", self.api_key.clone())
            .header(AUTHORIZATION, format!("Bearer {bearer}"));
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().context("rest: send request")?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(anyhow!("rest: unauthorized")),
            StatusCode::FORBIDDEN => Err(anyhow!("rest: forbidden: {body}")),
            _ => Err(anyhow!("rest: api error {status}: {body}")),
        }
    }

    /// Inserts a viewer row; a duplicate means the state already holds.
    fn insert_viewer_row(&self, table: &str, item_id: &str) -> Result<()> {
        let viewer = self.viewer()?;
        let body = json!({ "video_id": item_id, "user_id": viewer });
        match self.request(
            Method::POST,
            table,
            &[],
            Some(body),
            Some("return=minimal,resolution=ignore-duplicates"),
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("409") => {
                debug!(table, item_id, "duplicate insert treated as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn delete_viewer_row(&self, table: &str, item_id: &str) -> Result<()> {
        let viewer = self.viewer()?;
        let params = vec![
            ("video_id".to_string(), format!("eq.{item_id}")),
            ("user_id".to_string(), format!("eq.{viewer}")),
        ];
        self.request(Method::DELETE, table, &params, None, Some("return=minimal"))?;
        Ok(())
    }

    /// Ids in the viewer's rows of `table`; nothing without a viewer.
    fn viewer_item_ids(&self, table: &str) -> Result<Vec<String>> {
        let Ok(viewer) = self.viewer() else {
            return Ok(Vec::new());
        };
        let params = vec![
            ("select".to_string(), "video_id".to_string()),
            ("user_id".to_string(), format!("eq.{viewer}")),
        ];
        let resp = self.request(Method::GET, table, &params, None, None)?;
        let rows: Vec<ViewerRow> = resp
            .json()
            .with_context(|| format!("rest: decode {table}"))?;
        Ok(rows.iter().filter_map(|row| value_to_id(&row.video_id)).collect())
    }

    fn profiles(&self, owners: &[String]) -> Result<HashMap<String, OwnerProfile>> {
        let members = owners.iter().map(|id| quoted(id)).collect::<Vec<_>>().join(",");
        let params = vec![
            ("select".to_string(), "id,username,display_name,avatar_url".to_string()),
            ("id".to_string(), format!("in.({members})")),
        ];
        let resp = self.request(Method::GET, PROFILES_TABLE, &params, None, None)?;
        let rows: Vec<ProfileRow> = resp.json().context("rest: decode profiles")?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = value_to_id(&row.id)?;
                let profile = OwnerProfile {
                    username: normalize_optional_text(row.username.as_deref()),
                    display_name: normalize_optional_text(row.display_name.as_deref()),
                    avatar_url: normalize_optional_text(row.avatar_url.as_deref()),
                };
                Some((id, profile))
            })
            .collect())
    }

    /// Joins owner profiles in. A failed lookup leaves items unlabeled.
    fn attach_owners(&self, items: &mut [FeedItem]) {
        let mut owners: Vec<String> = items
            .iter()
            .filter_map(|item| item.owner_ref.clone())
            .collect();
        owners.sort();
        owners.dedup();
        if owners.is_empty() {
            return;
        }
        match self.profiles(&owners) {
            Ok(profiles) => {
                for item in items.iter_mut() {
                    item.owner = item
                        .owner_ref
                        .as_ref()
                        .and_then(|owner| profiles.get(owner).cloned());
                }
            }
            Err(err) => warn!(error = %format!("{err:#}"), owners = owners.len(), "profile lookup failed"),
        }
    }

    fn like_count(&self, item_id: &str) -> Result<i64> {
        let params = vec![
            ("select".to_string(), "video_id".to_string()),
            ("video_id".to_string(), format!("eq.{item_id}")),
            ("limit".to_string(), "1".to_string()),
        ];
        let resp = self.request(Method::GET, LIKES_TABLE, &params, None, Some("count=exact"))?;
        content_range_total(resp.headers())
            .ok_or_else(|| anyhow!("rest: like count missing from response for {item_id}"))
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Query parameters for one list request.
fn list_params(query: &ListQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), SELECT_COLUMNS.to_string())];
    let ascending = query.direction == Direction::Newer;
    params.push((
        "order".into(),
        if ascending {
            "created_at.asc,id.desc".into()
        } else {
            "created_at.desc,id.asc".into()
        },
    ));
    if let Some(cursor) = &query.cursor {
        let ts = quoted(&format_timestamp(&cursor.timestamp));
        let id = quoted(&cursor.id);
        let filter = match query.direction {
            Direction::Older => format!("(created_at.lt.{ts},and(created_at.eq.{ts},id.gt.{id}))"),
            Direction::Newer => format!("(created_at.gt.{ts},and(created_at.eq.{ts},id.lt.{id}))"),
        };
        params.push(("or".into(), filter));
    }
    // Rows missing either column would be dropped after the fact.
    params.push(("playback_url".into(), "not.is.null".into()));
    params.push(("created_at".into(), "not.is.null".into()));
    if let Some(ids) = &query.ids {
        let members = ids.iter().map(|id| quoted(id)).collect::<Vec<_>>().join(",");
        params.push(("id".into(), format!("in.({members})")));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_optional_text(Some(s.as_str())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Columns without a zone come back bare; they are stored as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Embedded aggregate: `[{"count": n}]` or `{"count": n}`.
fn embedded_count(value: &Value) -> Option<i64> {
    match value {
        Value::Array(rows) => rows.first().and_then(embedded_count),
        Value::Object(map) => map.get("count").and_then(Value::as_i64),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn normalize_row(row: VideoRow, posters: &PosterConvention) -> Option<FeedItem> {
    let Some(id) = value_to_id(&row.id) else {
        warn!("row without id dropped");
        return None;
    };
    let Some(timestamp) = row.created_at.as_deref().and_then(parse_timestamp) else {
        warn!(id = %id, "row without a readable created_at dropped");
        return None;
    };
    let Some(media_ref) = normalize_optional_text(row.playback_url.as_deref()) else {
        warn!(id = %id, "row without playback url dropped");
        return None;
    };
    let storage_path = normalize_optional_text(row.storage_path.as_deref());
    Some(FeedItem {
        poster_ref: posters.resolve(&media_ref, storage_path.as_deref()),
        order_key: OrderKey::new(timestamp, id),
        media_ref,
        title: normalize_optional_text(row.title.as_deref()).unwrap_or_default(),
        caption: normalize_optional_text(row.caption.as_deref()),
        owner_ref: normalize_optional_text(row.owner_id.as_deref()),
        owner: None,
        like_count: embedded_count(&row.video_likes),
    })
}

/// Total from `Content-Range: 0-0/42` or `*/0`.
fn content_range_total(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("content-range")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit('/').next())
        .and_then(|total| total.trim().parse().ok())
}

impl ContentQuery for Client {
    fn list(&self, query: &ListQuery) -> Result<Vec<FeedItem>> {
        self.list_counted(query).map(|(items, _)| items)
    }

    fn list_counted(&self, query: &ListQuery) -> Result<(Vec<FeedItem>, usize)> {
        if query.ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok((Vec::new(), 0));
        }
        let params = list_params(query);
        let resp = self.request(Method::GET, &self.table, &params, None, None)?;
        let rows: Vec<VideoRow> = resp.json().context("rest: decode rows")?;
        let matched = rows.len();
        let mut items: Vec<FeedItem> = rows
            .into_iter()
            .filter_map(|row| normalize_row(row, &self.posters))
            .collect();
        if query.direction == Direction::Newer {
            items.reverse();
        }
        self.attach_owners(&mut items);
        Ok((items, matched))
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let params = vec![
            ("select".to_string(), "id".to_string()),
            ("order".to_string(), "created_at.desc,id.asc".to_string()),
        ];
        let resp = self.request(Method::GET, &self.table, &params, None, None)?;
        let rows: Vec<IdRow> = resp.json().context("rest: decode ids")?;
        Ok(rows.iter().filter_map(|row| value_to_id(&row.id)).collect())
    }
}

impl InteractionService for Client {
    fn like(&self, id: &str) -> Result<LikeTruth> {
        self.insert_viewer_row(LIKES_TABLE, id)?;
        Ok(LikeTruth {
            count: self.like_count(id)?,
            liked: true,
        })
    }

    fn unlike(&self, id: &str) -> Result<LikeTruth> {
        self.delete_viewer_row(LIKES_TABLE, id)?;
        Ok(LikeTruth {
            count: self.like_count(id)?,
            liked: false,
        })
    }

    fn bookmark(&self, id: &str) -> Result<bool> {
        self.insert_viewer_row(BOOKMARKS_TABLE, id)?;
        Ok(true)
    }

    fn unbookmark(&self, id: &str) -> Result<bool> {
        self.delete_viewer_row(BOOKMARKS_TABLE, id)?;
        Ok(false)
    }

    fn bookmarked_ids(&self) -> Result<Vec<String>> {
        self.viewer_item_ids(BOOKMARKS_TABLE)
    }

    fn liked_ids(&self) -> Result<Vec<String>> {
        self.viewer_item_ids(LIKES_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CursorSource, LatestSource};
    use parking_lot::Mutex;
    use std::io::Read;
    use std::sync::Arc;
    use std::thread;

    struct Reply {
        status: u16,
        body: &'static str,
        content_range: Option<&'static str>,
    }

    fn reply(status: u16, body: &'static str) -> Reply {
        Reply {
            status,
            body,
            content_range: None,
        }
    }

    /// Serves the replies in order and records `"METHOD path?decoded-query"`
    /// plus any request body.
    fn serve(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<String>>>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let handle = thread::spawn(move || {
            for reply in replies {
                let mut request = server.recv().unwrap();
                let url = Url::parse(&format!("http://localhost{}", request.url())).unwrap();
                let query = url
                    .query_pairs()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                let mut body = String::new();
                request.as_reader().read_to_string(&mut body).unwrap();
                log.lock()
                    .push(format!("{} {}?{} {}", request.method(), url.path(), query, body).trim_end().to_string());
                let mut response = tiny_http::Response::from_string(reply.body)
                    .with_status_code(reply.status)
                    .with_header("Content-Type: application/json".parse::<tiny_http::Header>().unwrap());
                if let Some(range) = reply.content_range {
                    response = response.with_header(
                        format!("Content-Range: {range}").parse::<tiny_http::Header>().unwrap(),
                    );
                }
                request.respond(response).unwrap();
            }
        });
        (format!("http://127.0.0.1:{port}"), seen, handle)
    }

    fn client(base_url: String, viewer: Option<&str>) -> Client {
        Client::new(ClientConfig {
            base_url,
            api_key: "anon-key".into(),
            viewer_id: viewer.map(str::to_string),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn older_page_uses_tuple_filter_and_normalizes_rows() {
        let rows = r#"[
            {"id": "a2", "playback_url": "https://cdn.example.com/a2.mp4?t=1", "storage_path": null,
             "title": "  ", "caption": "late night", "owner_id": "u1",
             "created_at": "2024-05-01T10:00:00+00:00", "video_likes": [{"count": 4}]},
            {"id": "broken", "playback_url": null, "created_at": "2024-05-01T09:00:00+00:00"},
            {"id": 77, "playback_url": "clips/77.mov", "created_at": "2024-05-01T08:00:00.5"}
        ]"#;
        let profiles = r#"[{"id": "u1", "username": "mina", "display_name": null,
                            "avatar_url": "https://cdn.example.com/avatars/u1.png"}]"#;
        let (base, seen, handle) = serve(vec![reply(200, rows), reply(200, profiles)]);
        let client = client(base, None);
        let cursor = OrderKey::new(parse_timestamp("2024-05-01T10:00:00Z").unwrap(), "a");
        let items = client.list(&ListQuery::older_than(&cursor, 2)).unwrap();
        handle.join().unwrap();

        let ids: Vec<&str> = items.iter().map(FeedItem::id).collect();
        assert_eq!(ids, ["a2", "77"]);
        assert_eq!(items[0].title, "");
        assert_eq!(items[0].display_title(), "late night");
        assert_eq!(items[0].like_count, Some(4));
        assert_eq!(items[0].poster_ref, "https://cdn.example.com/a2.webp");
        assert_eq!(items[1].poster_ref, "clips/77.webp");
        assert_eq!(items[1].like_count, None);
        assert_eq!(items[0].owner_label(), "@mina");
        assert_eq!(items[0].owner_avatar(), Some("https://cdn.example.com/avatars/u1.png"));
        assert_eq!(items[1].owner, None);
        assert_eq!(items[1].owner_label(), "@user");

        let lookup = seen.lock()[1].clone();
        assert_eq!(
            lookup,
            r#"GET /rest/v1/user_profiles?select=id,username,display_name,avatar_url&id=in.("u1")"#
        );
        let request = seen.lock()[0].clone();
        assert!(request.starts_with("GET /rest/v1/videos?"), "{request}");
        assert!(request.contains("order=created_at.desc,id.asc"), "{request}");
        assert!(
            request.contains(
                r#"or=(created_at.lt."2024-05-01T10:00:00Z",and(created_at.eq."2024-05-01T10:00:00Z",id.gt."a"))"#
            ),
            "{request}"
        );
        assert!(request.contains("limit=2"), "{request}");
        assert!(request.contains("playback_url=not.is.null"), "{request}");
        assert!(request.contains("created_at=not.is.null"), "{request}");
    }

    #[test]
    fn malformed_row_in_a_full_page_keeps_paging() {
        let rows = r#"[
            {"id": "c", "playback_url": "https://cdn.example.com/c.mp4", "created_at": "2024-05-01T12:00:00Z"},
            {"id": "b", "playback_url": "https://cdn.example.com/b.mp4", "created_at": null},
            {"id": "a", "playback_url": "https://cdn.example.com/a.mp4", "created_at": "2024-05-01T10:00:00Z"}
        ]"#;
        let (base, seen, handle) = serve(vec![reply(200, rows)]);
        let source = LatestSource::new(Arc::new(client(base, None)));
        let page = source.fetch_initial(2).unwrap();
        handle.join().unwrap();

        let ids: Vec<&str> = page.items.iter().map(FeedItem::id).collect();
        assert_eq!(ids, ["c", "a"]);
        assert!(page.has_more);
        assert!(seen.lock()[0].contains("limit=3"));
    }

    #[test]
    fn liked_ids_are_read_for_the_viewer() {
        let (base, seen, handle) = serve(vec![reply(200, r#"[{"video_id": "v2"}, {"video_id": 9}]"#)]);
        let client = client(base, Some("viewer-1"));
        assert_eq!(client.liked_ids().unwrap(), ["v2", "9"]);
        handle.join().unwrap();
        assert_eq!(
            seen.lock()[0],
            "GET /rest/v1/video_likes?select=video_id&user_id=eq.viewer-1"
        );
    }

    #[test]
    fn failed_profile_lookup_keeps_items() {
        let rows = r#"[{"id": "a", "playback_url": "https://cdn.example.com/a.mp4",
                        "owner_id": "8c1f2d3e-aaaa", "created_at": "2024-05-01T10:00:00Z"}]"#;
        let (base, _seen, handle) = serve(vec![reply(200, rows), reply(500, "down")]);
        let client = client(base, None);
        let items = client.list(&ListQuery::first(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].owner, None);
        assert_eq!(items[0].owner_label(), "@8c1f2d3e");
    }

    #[test]
    fn newer_query_is_reversed_to_newest_first() {
        let rows = r#"[
            {"id": "b", "playback_url": "https://cdn.example.com/b.mp4", "created_at": "2024-05-01T11:00:00Z"},
            {"id": "c", "playback_url": "https://cdn.example.com/c.mp4", "created_at": "2024-05-01T12:00:00Z"}
        ]"#;
        let (base, seen, handle) = serve(vec![reply(200, rows)]);
        let client = client(base, None);
        let since = OrderKey::new(parse_timestamp("2024-05-01T10:00:00Z").unwrap(), "a");
        let items = client.list(&ListQuery::newer_than(&since)).unwrap();
        handle.join().unwrap();
        let ids: Vec<&str> = items.iter().map(FeedItem::id).collect();
        assert_eq!(ids, ["c", "b"]);
        assert!(seen.lock()[0].contains("order=created_at.asc,id.desc"));
    }

    #[test]
    fn membership_filter_quotes_ids() {
        let (base, seen, handle) = serve(vec![reply(200, "[]")]);
        let client = client(base, None);
        client
            .list(&ListQuery::members(vec!["x".into(), "y,z".into()]))
            .unwrap();
        handle.join().unwrap();
        assert!(seen.lock()[0].contains(r#"id=in.("x","y,z")"#));
    }

    #[test]
    fn duplicate_like_counts_as_success() {
        let (base, seen, handle) = serve(vec![
            reply(409, r#"{"code":"23505"}"#),
            Reply {
                status: 200,
                body: "[]",
                content_range: Some("0-0/12"),
            },
        ]);
        let client = client(base, Some("viewer-1"));
        let truth = client.like("v1").unwrap();
        handle.join().unwrap();
        assert_eq!(truth, LikeTruth { count: 12, liked: true });
        let seen = seen.lock();
        assert!(seen[0].starts_with("POST /rest/v1/video_likes?"));
        assert!(seen[0].contains(r#""user_id":"viewer-1""#));
        assert!(seen[1].contains("video_id=eq.v1"));
    }

    #[test]
    fn interactions_need_a_viewer() {
        let client = client("http://127.0.0.1:9".into(), None);
        let err = client.bookmark("v1").unwrap_err();
        assert!(err.to_string().contains("viewer"));
        assert!(client.bookmarked_ids().unwrap().is_empty());
        assert!(client.liked_ids().unwrap().is_empty());
    }

    #[test]
    fn server_errors_surface() {
        let (base, _seen, handle) = serve(vec![reply(500, "boom")]);
        let client = client(base, Some("viewer-1"));
        let err = client.unbookmark("v1").unwrap_err();
        handle.join().unwrap();
        assert!(err.to_string().contains("500"), "{err}");
    }

    #[test]
    fn content_range_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", "*/0".parse().unwrap());
        assert_eq!(content_range_total(&headers), Some(0));
        headers.insert("content-range", "0-24/3573".parse().unwrap());
        assert_eq!(content_range_total(&headers), Some(3573));
    }
}

//! Common test utilities for E2E tests
//!
//! `TestServer` runs a small in-process imitation of the Pixora backend
//! that counts requests and can be told to fail or stall specific routes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use pixora::{Pixora, config};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_PASSWORD: &str = "correct-horse";

/// Fake backend state
#[derive(Default)]
pub struct Backend {
    hits: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashSet<String>>,
    allowances: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    following: Mutex<Vec<String>>,
    liked: Mutex<HashMap<String, u64>>,
    favorited: Mutex<HashSet<String>>,
    reel_flags: Mutex<HashSet<String>>,
    sequence: AtomicUsize,
}

impl Backend {
    fn next_id(&self) -> usize {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub backend: Arc<Backend>,
}

impl TestServer {
    /// Start a fake backend on a random port
    pub async fn new() -> Self {
        let backend = Arc::new(Backend::default());

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = axum::Router::new()
            .fallback(handle)
            .with_state(backend.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            backend,
        }
    }

    /// Client configuration pointing at this server
    pub fn config(&self) -> config::ClientConfig {
        let mut config = config::ClientConfig::for_base_url(self.addr.clone());
        config.api.timeout_seconds = 5;
        config.polling.push_enabled = false;
        config
    }

    /// Signed-out client
    pub fn client(&self) -> Pixora {
        Pixora::new(self.config()).unwrap()
    }

    /// Client holding a valid token and a verified identity
    pub async fn signed_in(&self) -> Pixora {
        let client = self.client();
        client.api.set_token(Some(TEST_TOKEN.to_string()));
        client.session.verify_user(true).await.unwrap();
        client
    }

    /// How many times `METHOD path` was requested
    pub fn hits(&self, method: &str, path: &str) -> usize {
        let key = format!("{} {}", method, path);
        self.backend
            .hits
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    /// Make `METHOD path` answer 500 until `recover` is called
    pub fn fail(&self, method: &str, path: &str) {
        self.backend
            .failures
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path));
    }

    /// Let `METHOD path` succeed `successes` more times, then answer 500
    pub fn fail_after(&self, method: &str, path: &str, successes: usize) {
        self.backend
            .allowances
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), successes);
    }

    pub fn recover(&self, method: &str, path: &str) {
        let key = format!("{} {}", method, path);
        self.backend.failures.lock().unwrap().remove(&key);
        self.backend.allowances.lock().unwrap().remove(&key);
    }

    /// Client with a valid token built from a custom configuration
    pub async fn signed_in_with(&self, config: config::ClientConfig) -> Pixora {
        let client = Pixora::new(config).unwrap();
        client.api.set_token(Some(TEST_TOKEN.to_string()));
        client.session.verify_user(true).await.unwrap();
        client
    }

    /// Hold `METHOD path` responses for `millis`
    pub fn delay(&self, method: &str, path: &str, millis: u64) {
        self.backend
            .delays
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), Duration::from_millis(millis));
    }

    /// Ids the fake backend considers followed
    pub fn followed(&self) -> Vec<String> {
        self.backend.following.lock().unwrap().clone()
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn me() -> Value {
    json!({
        "_id": "u1",
        "name": "Test User",
        "username": "tester",
        "email": "tester@example.com",
        "followersCount": 1,
    })
}

pub fn users() -> Vec<Value> {
    vec![
        me(),
        json!({ "_id": "u2", "name": "Alice Smith", "username": "alice", "followersCount": 50 }),
        json!({ "_id": "u3", "name": "Bob Jones", "username": "bob", "followersCount": 5 }),
        json!({ "_id": "u4", "name": "Carol White", "username": "carol", "followersCount": 20 }),
    ]
}

pub fn image(id: &str, title: &str) -> Value {
    json!({
        "_id": id,
        "url": format!("https://cdn.example/{id}.png"),
        "title": title,
        "user": "u2",
    })
}

pub fn reels() -> Vec<Value> {
    ["r1", "r2", "r3"]
        .iter()
        .map(|id| {
            json!({
                "_id": id,
                "videoUrl": format!("https://cdn.example/{id}.mp4"),
                "caption": format!("Reel {id}"),
                "likesCount": 3,
                "savesCount": 1,
            })
        })
        .collect()
}

pub fn collection() -> Value {
    json!({
        "_id": "col1",
        "name": "Trips",
        "images": ["img-a"],
        "imageCount": 1,
    })
}

fn summary(user_id: &str) -> Value {
    users()
        .into_iter()
        .find(|u| u["_id"] == user_id)
        .unwrap_or_else(|| json!({ "_id": user_id, "username": user_id }))
}

// =============================================================================
// Handler
// =============================================================================

fn ok(data: Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn ok_page(data: Vec<Value>, total: usize) -> Response {
    let pages = if total == 0 { 0 } else { 1 };
    Json(json!({
        "success": true,
        "data": data,
        "metadata": { "total": total, "page": 1, "pages": pages, "limit": 20 },
    }))
    .into_response()
}

/// Slice `all` by the `page` and `limit` query parameters
fn paged(all: Vec<Value>, uri: &Uri) -> Response {
    let mut page = 1usize;
    let mut limit = 20usize;
    for pair in uri.query().unwrap_or_default().split('&') {
        match pair.split_once('=') {
            Some(("page", v)) => page = v.parse().unwrap_or(1).max(1),
            Some(("limit", v)) => limit = v.parse().unwrap_or(20).max(1),
            _ => {}
        }
    }
    let total = all.len();
    let pages = total.div_ceil(limit);
    let data: Vec<Value> = all.into_iter().skip((page - 1) * limit).take(limit).collect();
    Json(json!({
        "success": true,
        "data": data,
        "metadata": { "total": total, "page": page, "pages": pages, "limit": limit },
    }))
    .into_response()
}

/// Flip `key` in `set`; returns whether it is now set
fn flip(set: &Mutex<HashSet<String>>, key: String) -> bool {
    let mut set = set.lock().unwrap();
    if set.remove(&key) {
        false
    } else {
        set.insert(key);
        true
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

async fn handle(
    State(backend): State<Arc<Backend>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let key = format!("{} {}", method.as_str(), path);
    *backend.hits.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

    let delay = backend.delays.lock().unwrap().get(&key).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if backend.failures.lock().unwrap().contains(&key) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Simulated failure");
    }
    if let Some(left) = backend.allowances.lock().unwrap().get_mut(&key) {
        if *left == 0 {
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Simulated failure");
        }
        *left -= 1;
    }

    let authed = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TEST_TOKEN));
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let segments: Vec<&str> = path
        .trim_start_matches("/api/")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (method.as_str(), segments.as_slice()) {
        ("POST", ["auth", "login"]) => {
            if body["password"] == TEST_PASSWORD {
                ok(json!({ "token": TEST_TOKEN, "user": me() }))
            } else {
                error(StatusCode::UNAUTHORIZED, "Invalid credentials")
            }
        }
        ("POST", ["auth", "logout"]) => ok(Value::Null),

        ("GET", ["users", "me"]) => {
            if authed {
                ok(me())
            } else {
                error(StatusCode::UNAUTHORIZED, "Not authenticated")
            }
        }
        ("GET", ["users"]) => ok(Value::Array(users())),
        ("PUT", ["users", "profile"]) => {
            let mut user = me();
            if let (Some(target), Some(patch)) = (user.as_object_mut(), body.as_object()) {
                for (k, v) in patch {
                    target.insert(k.clone(), v.clone());
                }
            }
            ok(user)
        }
        ("GET", ["users", username]) => match users().into_iter().find(|u| u["username"] == *username) {
            Some(user) => ok(user),
            None => error(StatusCode::NOT_FOUND, "User not found"),
        },

        ("GET", ["follow", _, "following"]) => {
            let following = backend.following.lock().unwrap().clone();
            ok(Value::Array(following.iter().map(|id| summary(id)).collect()))
        }
        ("GET", ["follow", _, "followers"]) => ok(json!([])),
        ("GET", ["follow", target, "status"]) => {
            let following = backend.following.lock().unwrap().iter().any(|id| id == target);
            ok(json!({ "isFollowing": following }))
        }
        ("POST", ["follow", target]) => {
            let mut following = backend.following.lock().unwrap();
            if !following.iter().any(|id| id == target) {
                following.push(target.to_string());
            }
            ok(json!({ "isFollowing": true }))
        }
        ("DELETE", ["follow", target]) => {
            backend.following.lock().unwrap().retain(|id| id != target);
            ok(json!({ "isFollowing": false }))
        }

        ("POST", ["likes", image, "toggle"]) => {
            let mut liked = backend.liked.lock().unwrap();
            let now_liked = if liked.remove(*image).is_some() {
                false
            } else {
                liked.insert(image.to_string(), 1);
                true
            };
            let count = u64::from(now_liked);
            ok(json!({ "liked": now_liked, "likesCount": count }))
        }
        ("GET", ["likes", image, "status"]) => {
            let liked = backend.liked.lock().unwrap().contains_key(*image);
            ok(json!({ "liked": liked }))
        }

        ("POST", ["favorites", image, "toggle"]) => {
            let now = flip(&backend.favorited, image.to_string());
            ok(json!({ "favorited": now, "favoritesCount": u64::from(now) }))
        }
        ("GET", ["favorites", image, "status"]) => {
            let favorited = backend.favorited.lock().unwrap().contains(*image);
            ok(json!({ "favorited": favorited }))
        }

        ("POST", ["images", "temp"]) => {
            let n = backend.next_id();
            ok(json!({
                "publicId": format!("pixora/tmp{n}"),
                "url": format!("https://cdn.example/tmp{n}.png"),
                "width": 800,
                "height": 600,
            }))
        }
        ("DELETE", ["images", "temp", _]) => ok(Value::Null),
        ("GET", ["images"]) => ok_page(vec![image("img-a", "Harbor"), image("img-b", "Dunes")], 2),
        ("PUT", ["images", id]) => {
            let mut updated = image(id, "");
            if let (Some(target), Some(patch)) = (updated.as_object_mut(), body.as_object()) {
                for (k, v) in patch {
                    target.insert(k.clone(), v.clone());
                }
            }
            ok(updated)
        }
        ("GET", ["images", id]) => ok(image(id, "Sunset")),
        ("DELETE", ["images", _]) => ok(Value::Null),
        ("POST", ["images"]) => {
            let n = backend.next_id();
            ok(json!({
                "_id": format!("img-{n}"),
                "url": format!("https://cdn.example/img-{n}.png"),
                "publicId": body["publicId"],
                "title": body["title"],
                "description": body["description"],
            }))
        }

        ("GET", ["comments", image]) => ok_page(
            vec![json!({
                "_id": "c-existing",
                "text": "First!",
                "image": image,
                "user": summary("u2"),
            })],
            1,
        ),
        ("POST", ["comments", image]) => {
            let n = backend.next_id();
            ok(json!({
                "_id": format!("c-{n}"),
                "text": body["text"],
                "image": image,
                "parentId": body["parentId"],
            }))
        }

        ("GET", ["messages", "conversations"]) => ok(json!([{
            "_id": "conv1",
            "participants": [me(), summary("u2")],
            "lastMessage": { "content": "Hi", "sender": "u2" },
            "unreadCount": 2,
        }])),
        ("GET", ["messages", "conversations", conversation, "messages"]) => ok_page(
            vec![json!({
                "_id": "m-existing",
                "conversation": conversation,
                "sender": "u2",
                "content": "Hi",
            })],
            1,
        ),
        ("POST", ["messages", "conversations", conversation, "messages"]) => {
            let n = backend.next_id();
            ok(json!({
                "_id": format!("m-{n}"),
                "conversation": conversation,
                "sender": "u1",
                "content": body["content"],
                "isRead": true,
            }))
        }
        ("PUT", ["messages", "conversations", _, "read"]) => ok(Value::Null),

        ("GET", ["reels"]) => paged(reels(), &uri),
        ("POST", ["reels"]) => {
            let n = backend.next_id();
            ok(json!({
                "_id": format!("reel-{n}"),
                "videoUrl": format!("https://cdn.example/reel-{n}.mp4"),
            }))
        }
        ("POST", ["reels", id, "like"]) => {
            let now = flip(&backend.reel_flags, format!("like:{id}"));
            ok(json!({ "liked": now, "likesCount": 3 + u64::from(now) }))
        }
        ("POST", ["reels", id, "save"]) => {
            let now = flip(&backend.reel_flags, format!("save:{id}"));
            ok(json!({ "saved": now, "savesCount": 1 + u64::from(now) }))
        }
        ("POST", ["reels", _, "view"]) => ok(Value::Null),

        ("GET", ["collections", "user", _]) => ok(json!([collection()])),
        ("DELETE", ["collections", _]) => ok(Value::Null),
        ("POST", ["collections", _, "images"]) => ok(Value::Null),
        ("DELETE", ["collections", _, "images", _]) => ok(Value::Null),

        _ => error(StatusCode::NOT_FOUND, "Route not found"),
    }
}

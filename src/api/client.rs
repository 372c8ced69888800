//! REST client
//!
//! One `ApiClient` is shared by every store. It owns the bearer token,
//! decodes the response envelope and records request metrics.

use std::sync::RwLock;
use std::time::Instant;

use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use url::Url;

use super::envelope::{Envelope, Page, PageRequest};
use crate::config::ApiConfig;
use crate::error::{ClientError, Result};
use crate::metrics::{ERRORS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Authenticated HTTP client for the Pixora backend
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<String>>,
    auth_failures: broadcast::Sender<u16>,
}

impl ApiClient {
    /// Create new API client
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client
    /// cannot be built
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;

        Self::with_http_client(http, &config.base_url)
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_http_client(http: reqwest::Client, base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("Invalid API base URL: {}", e)))?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let (auth_failures, _) = broadcast::channel(16);

        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
            auth_failures,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // =========================================================================
    // Token
    // =========================================================================

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// Receive the status code of every 401/403 response
    pub fn subscribe_auth_failures(&self) -> broadcast::Receiver<u16> {
        self.auth_failures.subscribe()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Resolve an API path (e.g. `/api/users/me`) against the base URL
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Validation(format!("Invalid request path {}: {}", path, e)))
    }

    /// Request builder with the bearer token attached
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.url(path)?;
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[]).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let builder = self.request(Method::GET, path)?.query(query);
        let envelope = self.execute(Method::GET, path, builder).await?;
        decode(envelope.data)
    }

    /// GET a paginated listing
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        request: PageRequest,
        extra_query: &[(&str, String)],
    ) -> Result<Page<T>> {
        let mut query = request.query();
        query.extend(extra_query.iter().cloned());

        let builder = self.request(Method::GET, path)?.query(&query);
        let envelope = self.execute(Method::GET, path, builder).await?;
        let items: Vec<T> = if envelope.data.is_null() {
            Vec::new()
        } else {
            decode(envelope.data)?
        };
        Ok(Page::from_parts(items, envelope.metadata, request))
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    /// POST without a body
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<(), T>(Method::POST, path, None).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    /// PUT without a body
    pub async fn put_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<(), T>(Method::PUT, path, None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json::<(), T>(Method::DELETE, path, None).await
    }

    /// POST a multipart form (file uploads)
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let builder = self.request(Method::POST, path)?.multipart(form);
        let envelope = self.execute(Method::POST, path, builder).await?;
        decode(envelope.data)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let mut builder = self.request(method.clone(), path)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let envelope = self.execute(method, path, builder).await?;
        decode(envelope.data)
    }

    /// Send a request and unwrap the envelope
    ///
    /// Non-2xx statuses and `success: false` bodies both become errors
    /// carrying the server's message when one was given.
    async fn execute(&self, method: Method, path: &str, builder: RequestBuilder) -> Result<Envelope> {
        let endpoint = endpoint_label(path);
        let started = Instant::now();

        tracing::debug!(method = %method, path = %path, "Sending request");

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(method = %method, path = %path, error = %e, "Request failed");
            HTTP_REQUESTS_TOTAL
                .with_label_values(&[method.as_str(), endpoint.as_str(), "error"])
                .inc();
            ERRORS_TOTAL
                .with_label_values(&["http_client", endpoint.as_str()])
                .inc();
            ClientError::HttpClient(e)
        })?;

        let status = response.status();
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method.as_str(), endpoint.as_str(), status.as_str()])
            .inc();
        HTTP_REQUEST_DURATION_SECONDS
            .with_label_values(&[method.as_str(), endpoint.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let bytes = response.bytes().await?;
        let envelope: Option<Envelope> = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        if !status.is_success() {
            let message = envelope.as_ref().and_then(Envelope::explanation);
            let error = ClientError::from_status(status.as_u16(), message);
            if error.is_auth() {
                let _ = self.auth_failures.send(status.as_u16());
            }
            ERRORS_TOTAL
                .with_label_values(&[error.kind(), endpoint.as_str()])
                .inc();
            tracing::warn!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                error = %error,
                "Backend returned error status"
            );
            return Err(error);
        }

        let envelope = match envelope {
            Some(envelope) => envelope,
            None if bytes.is_empty() => Envelope {
                success: Some(true),
                data: serde_json::Value::Null,
                message: None,
                error: None,
                metadata: None,
            },
            None => {
                // Surface the actual parse error
                let err = serde_json::from_slice::<Envelope>(&bytes)
                    .err()
                    .map(ClientError::Decode)
                    .unwrap_or_else(|| ClientError::Validation("Malformed response".into()));
                return Err(err);
            }
        };

        if envelope.success == Some(false) {
            let error = ClientError::from_status(status.as_u16(), envelope.explanation());
            ERRORS_TOTAL
                .with_label_values(&["api", endpoint.as_str()])
                .inc();
            tracing::warn!(method = %method, path = %path, error = %error, "Backend reported failure");
            return Err(error);
        }

        Ok(envelope)
    }
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data).map_err(ClientError::Decode)
}

/// Path words of the backend's routes; every other segment is a value
const ROUTE_WORDS: &[&str] = &[
    "api", "auth", "login", "logout", "register", "users", "me", "profile", "password",
    "follow", "followers", "following", "counts", "status", "likes", "favorites", "toggle",
    "images", "temp", "user", "related", "comments", "like", "replies", "collections",
    "messages", "conversations", "read", "mute", "unread", "reels", "save", "view", "search",
    "trending", "events",
];

/// Collapse value segments so metric labels stay bounded
///
/// Labels follow the route shape: `/api/users/ada` and
/// `/api/users/64f1a2b3c4d5e6f708192a3b` both become `/api/users/:id`.
pub fn endpoint_label(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    path.split('/')
        .map(|segment| {
            if segment.is_empty() || ROUTE_WORDS.contains(&segment) {
                segment
            } else {
                ":id"
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode a single path segment
pub fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

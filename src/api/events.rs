//! Server-sent event subscription
//!
//! Push channel used in place of fixed-interval polling when the
//! backend offers it.

use futures::{Stream, StreamExt};
use reqwest::Method;

use super::ApiClient;
use crate::error::{ClientError, Result};

/// One decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// `event:` field, "message" when absent
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental parser for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<ServerEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<ServerEvent> {
    let mut event = None;
    let mut id = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data.is_empty() && event.is_none() {
        return None;
    }

    Some(ServerEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
        id,
    })
}

/// Open an event stream at `path`
///
/// # Errors
/// Returns error if the connection fails or the backend does not answer
/// with a success status
pub async fn subscribe(
    api: &ApiClient,
    path: &str,
) -> Result<impl Stream<Item = Result<ServerEvent>> + Send + use<>> {
    let response = api
        .request(Method::GET, path)?
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::from_status(status.as_u16(), None));
    }

    tracing::info!(path = %path, "Event stream connected");

    let mut parser = SseParser::new();
    let stream = response
        .bytes_stream()
        .map(move |chunk| -> Result<Vec<ServerEvent>> {
            let chunk = chunk?;
            Ok(parser.push(&String::from_utf8_lossy(&chunk)))
        })
        .flat_map(|batch| {
            let items: Vec<Result<ServerEvent>> = match batch {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(error) => vec![Err(error)],
            };
            futures::stream::iter(items)
        });

    Ok(stream)
}

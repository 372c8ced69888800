//! Background refresh
//!
//! `Poller` runs a refresh on a fixed interval. `Watcher` prefers the
//! backend's event stream and drops back to polling while the stream is
//! unavailable. Both stop when their handle is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::api::{self, ApiClient, ServerEvent};
use crate::error::Result;
use crate::metrics::REFRESH_TICKS_TOTAL;

/// Owns a background refresh task; aborts it on drop
#[derive(Debug)]
pub struct RefreshHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub(crate) fn from_task(name: &'static str, task: JoinHandle<()>) -> Self {
        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task now
    pub fn stop(self) {}
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(feed = self.name, "Refresh task stopped");
    }
}

async fn run_tick<F, Fut>(name: &'static str, source: &'static str, refresh: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match refresh().await {
        Ok(()) => {
            REFRESH_TICKS_TOTAL
                .with_label_values(&[name, source, "ok"])
                .inc();
        }
        Err(error) => {
            REFRESH_TICKS_TOTAL
                .with_label_values(&[name, source, "error"])
                .inc();
            tracing::warn!(feed = name, source, %error, "Refresh failed");
        }
    }
}

/// Fixed-interval refresh
pub struct Poller;

impl Poller {
    /// Spawn `refresh` every `interval`, first run after one interval
    ///
    /// Failures are logged and the loop continues.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, refresh: F) -> RefreshHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                run_tick(name, "poll", &refresh).await;
            }
        });

        tracing::debug!(feed = name, interval_secs = interval.as_secs(), "Poller spawned");
        RefreshHandle { name, task }
    }
}

/// Push-first refresh with polling fallback
pub struct Watcher {
    pub name: &'static str,
    /// Event stream path, e.g. `/api/events?topic=messages`
    pub events_path: String,
    /// Only events whose `event` field passes this filter trigger a refresh
    pub topics: Vec<&'static str>,
    pub interval: Duration,
    pub push_enabled: bool,
}

impl Watcher {
    fn accepts(&self, event: &ServerEvent) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| *t == event.event)
    }

    pub fn spawn<F, Fut>(self, api: Arc<ApiClient>, refresh: F) -> RefreshHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = self.name;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                if self.push_enabled {
                    match api::subscribe(&api, &self.events_path).await {
                        Ok(stream) => {
                            let mut stream = Box::pin(stream);
                            while let Some(item) = stream.next().await {
                                match item {
                                    Ok(event) if self.accepts(&event) => {
                                        run_tick(self.name, "push", &refresh).await;
                                    }
                                    Ok(_) => {}
                                    Err(error) => {
                                        tracing::warn!(feed = self.name, %error, "Event stream error");
                                        break;
                                    }
                                }
                            }
                            tracing::info!(feed = self.name, "Event stream ended; polling until reconnect");
                        }
                        Err(error) => {
                            tracing::debug!(feed = self.name, %error, "Event stream unavailable; polling");
                        }
                    }
                }

                ticker.tick().await;
                run_tick(self.name, "poll", &refresh).await;
            }
        });

        RefreshHandle { name, task }
    }
}

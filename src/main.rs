//! pixora-sync binary entry point
//!
//! Keeps a signed-in client current from the command line: verifies the
//! session, then runs the background refreshes and logs what changes.

use pixora::state::StoreEvent;
use pixora::{Pixora, config};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize client state and apply `PIXORA_TOKEN`
/// 5. Verify the session
/// 6. Start background refresh until Ctrl-C
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("PIXORA__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pixora=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pixora=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting pixora-sync...");

    // 2. Initialize metrics
    pixora::metrics::init_metrics();

    // 3. Load configuration
    let config = config::ClientConfig::load()?;
    tracing::info!(
        base_url = %config.api.base_url,
        push = config.polling.push_enabled,
        "Configuration loaded"
    );

    // 4. Initialize client state
    let client = Pixora::new(config)?;
    if let Ok(token) = std::env::var("PIXORA_TOKEN") {
        if !token.trim().is_empty() {
            client.api.set_token(Some(token.trim().to_string()));
        }
    }

    // 5. Verify the session
    match client.session.verify_user(true).await {
        Ok(Some(user)) => {
            tracing::info!(user_id = %user.id, username = %user.username, "Session verified");
        }
        Ok(None) => {
            tracing::warn!("No session token; set PIXORA_TOKEN to sync a signed-in user");
        }
        Err(error) => {
            tracing::error!(%error, "Session verification failed");
            return Err(error.into());
        }
    }

    if let Err(error) = client.directory.get_all_users(false).await {
        tracing::warn!(%error, "Initial directory load failed");
    }
    if let Err(error) = client.messages.fetch_conversations().await {
        tracing::warn!(%error, "Initial conversation load failed");
    }

    // 6. Start background refresh
    let handles = client.spawn_background();
    tracing::info!(tasks = handles.len(), "Background refresh started");

    let mut events = client.events.stream();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            event = events.next() => match event {
                Some(Ok(StoreEvent::ConversationsUpdated { unread })) => {
                    tracing::info!(unread, "Conversations updated");
                }
                Some(Ok(StoreEvent::MessageAdded { conversation_id })) => {
                    tracing::info!(%conversation_id, "New message");
                }
                Some(Ok(StoreEvent::ReelsUpdated { items })) => {
                    tracing::info!(items, "Reel feed updated");
                }
                Some(Ok(StoreEvent::DirectoryRefreshed { users })) => {
                    tracing::info!(users, "Directory refreshed");
                }
                Some(Ok(StoreEvent::SessionChanged { user_id: None })) => {
                    tracing::warn!("Session ended");
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::debug!(%error, "Event stream lagged");
                }
                None => break,
            }
        }
    }

    drop(handles);
    tracing::debug!(metrics = %pixora::metrics::gather_metrics(), "Final metrics");
    Ok(())
}

//! Direct messages
//!
//! Conversation list, the open conversation's messages (paged, oldest
//! first), optimistic send and an unread counter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, PageRequest, segment};
use crate::data::{
    Conversation, FlagStatus, Message, MessagePreview, UserRef, is_temp_id, new_temp_id,
};
use crate::error::{ClientError, Result};
use crate::service::SessionStore;
use crate::state::{EventBus, OptimisticMutation, RefreshHandle, StoreEvent, Watcher};

const MAX_MESSAGE_LENGTH: usize = 5000;

#[derive(Serialize)]
struct NewMessage<'a> {
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewConversation<'a> {
    participant_id: &'a str,
}

#[derive(Deserialize)]
struct UnreadCount {
    #[serde(alias = "unreadCount", alias = "unread", alias = "total")]
    count: u64,
}

#[derive(Default)]
struct MessageState {
    conversations: Vec<Conversation>,
    active: Option<String>,
    messages: Vec<Message>,
    page: Option<PageRequest>,
    has_more: bool,
    unread: u64,
}

impl MessageState {
    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Swap a temporary message for the one the server stored
    fn confirm(&mut self, temp_id: &str, sent: &Message) {
        if !self.messages.iter().any(|m| m.id == temp_id) {
            return;
        }
        // A poll that landed meanwhile may already have it
        self.messages.retain(|m| m.id != sent.id || m.id == temp_id);
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == temp_id) {
            *slot = sent.clone();
        }
    }

    fn recount_unread(&mut self) {
        self.unread = self.conversations.iter().map(|c| c.unread_count).sum();
    }
}

/// Snapshot of the open conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Messaging store
pub struct MessageStore {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    events: EventBus,
    state: Arc<RwLock<MessageState>>,
    page_size: u32,
}

impl MessageStore {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        events: EventBus,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            session,
            events,
            state: Arc::new(RwLock::new(MessageState::default())),
            page_size: page_size.max(1),
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn active(&self) -> Option<ActiveConversation> {
        let state = self.state.read().await;
        state.active.as_ref().map(|id| ActiveConversation {
            id: id.clone(),
            messages: state.messages.clone(),
            has_more: state.has_more,
        })
    }

    /// Total unread messages across conversations
    pub async fn unread_count(&self) -> u64 {
        self.state.read().await.unread
    }

    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        let conversations: Vec<Conversation> =
            self.api.get("/api/messages/conversations").await?;

        let unread = {
            let mut state = self.state.write().await;
            state.conversations = conversations.clone();
            state.recount_unread();
            state.unread
        };
        self.events
            .publish(StoreEvent::ConversationsUpdated { unread });
        Ok(conversations)
    }

    /// Make `conversation_id` the open conversation and load its newest page
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        if conversation_id.trim().is_empty() {
            return Err(ClientError::Validation("Invalid conversation".to_string()));
        }

        {
            let mut state = self.state.write().await;
            if state.active.as_deref() != Some(conversation_id) {
                state.active = Some(conversation_id.to_string());
                state.messages.clear();
                state.page = None;
                state.has_more = false;
            }
        }

        let request = PageRequest::first(self.page_size);
        let page = self
            .api
            .get_page::<Message>(&messages_path(conversation_id), request, &[])
            .await?;

        let mut state = self.state.write().await;
        // Another conversation was opened while this one loaded
        if state.active.as_deref() != Some(conversation_id) {
            return Ok(page.items);
        }
        let pending: Vec<Message> = state
            .messages
            .drain(..)
            .filter(|m| is_temp_id(&m.id))
            .collect();
        state.messages = page.items.clone();
        state.messages.extend(pending);
        state.page = Some(page.request());
        state.has_more = page.has_more();
        Ok(page.items)
    }

    /// Load the next (older) page of the open conversation
    ///
    /// Returns how many messages were added; zero when nothing is open or
    /// everything is loaded.
    pub async fn load_more(&self) -> Result<usize> {
        let (conversation_id, request) = {
            let state = self.state.read().await;
            match (&state.active, state.page) {
                (Some(id), Some(page)) if state.has_more => (id.clone(), page.next()),
                _ => return Ok(0),
            }
        };

        let page = self
            .api
            .get_page::<Message>(&messages_path(&conversation_id), request, &[])
            .await?;

        let mut state = self.state.write().await;
        if state.active.as_deref() != Some(conversation_id.as_str()) {
            return Ok(0);
        }
        let known: HashSet<String> = state.messages.iter().map(|m| m.id.clone()).collect();
        let older: Vec<Message> = page
            .items
            .iter()
            .filter(|m| !known.contains(&m.id))
            .cloned()
            .collect();
        let added = older.len();
        state.messages.splice(0..0, older);
        state.page = Some(page.request());
        state.has_more = page.has_more();
        Ok(added)
    }

    /// Send `content` to the open conversation
    ///
    /// The message shows immediately under a `temp-` id which is replaced
    /// by the server's message, or removed if sending fails.
    pub async fn send_message(&self, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("Message cannot be empty".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ClientError::Validation(format!(
                "Message cannot exceed {MAX_MESSAGE_LENGTH} characters"
            )));
        }

        let sender = match self.session.current_user().await {
            Some(user) => UserRef::Profile(user.summary()),
            None => return Err(ClientError::Unauthorized),
        };
        let conversation_id = self
            .state
            .read()
            .await
            .active
            .clone()
            .ok_or_else(|| ClientError::Validation("No conversation selected".to_string()))?;

        let temp = Message {
            id: new_temp_id(),
            conversation_id: conversation_id.clone(),
            sender,
            content: content.to_string(),
            is_read: true,
            created_at: Some(Utc::now()),
        };
        let temp_id = temp.id.clone();
        let path = messages_path(&conversation_id);
        let body = NewMessage { content };

        let message = OptimisticMutation::new(&*self.state, "send_message")
            .run(
                |s| {
                    s.messages.push(temp.clone());
                    let previous = s
                        .conversation_mut(&conversation_id)
                        .map(|c| c.last_message.replace(preview_of(&temp)));
                    previous.flatten()
                },
                self.api.post::<_, Message>(&path, &body),
                |s, sent| {
                    s.confirm(&temp_id, sent);
                    if let Some(conversation) = s.conversation_mut(&conversation_id) {
                        conversation.last_message = Some(preview_of(sent));
                        conversation.updated_at = sent.created_at;
                    }
                },
                |s, previous| {
                    s.messages.retain(|m| m.id != temp_id);
                    if let Some(conversation) = s.conversation_mut(&conversation_id) {
                        conversation.last_message = previous;
                    }
                },
            )
            .await?;

        self.state
            .write()
            .await
            .conversations
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.events.publish(StoreEvent::MessageAdded { conversation_id });
        Ok(message)
    }

    /// Start (or resume) a conversation with `user_id`
    pub async fn start_conversation(&self, user_id: &str) -> Result<Conversation> {
        let me = self.session.require_user_id().await?;
        if user_id.trim().is_empty() || user_id == me {
            return Err(ClientError::Validation("Invalid recipient".to_string()));
        }

        let conversation: Conversation = self
            .api
            .post(
                "/api/messages/conversations",
                &NewConversation {
                    participant_id: user_id,
                },
            )
            .await?;

        let mut state = self.state.write().await;
        if state.conversation_mut(&conversation.id).is_none() {
            state.conversations.insert(0, conversation.clone());
        }
        tracing::info!(conversation_id = %conversation.id, "Conversation started");
        Ok(conversation)
    }

    /// Mark a conversation read; the local counter drops immediately
    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let path = format!("/api/messages/conversations/{}/read", segment(conversation_id));
        OptimisticMutation::new(&*self.state, "mark_read")
            .run(
                |s| {
                    let previous = s
                        .conversation_mut(conversation_id)
                        .map(|c| std::mem::take(&mut c.unread_count));
                    if s.active.as_deref() == Some(conversation_id) {
                        for message in s.messages.iter_mut() {
                            message.is_read = true;
                        }
                    }
                    s.recount_unread();
                    previous
                },
                self.api.put_empty::<IgnoredAny>(&path),
                |_, _| {},
                |s, previous| {
                    if let (Some(count), Some(c)) = (previous, s.conversation_mut(conversation_id)) {
                        c.unread_count = count;
                    }
                    s.recount_unread();
                },
            )
            .await?;

        let unread = self.unread_count().await;
        self.events
            .publish(StoreEvent::ConversationsUpdated { unread });
        Ok(())
    }

    /// Flip the mute flag of a conversation
    pub async fn toggle_mute(&self, conversation_id: &str) -> Result<bool> {
        let path = format!("/api/messages/conversations/{}/mute", segment(conversation_id));
        let status = OptimisticMutation::new(&*self.state, "toggle_mute")
            .run(
                |s| {
                    s.conversation_mut(conversation_id).map(|c| {
                        c.is_muted = !c.is_muted;
                        !c.is_muted
                    })
                },
                self.api.put_empty::<FlagStatus>(&path),
                |s, status| {
                    if let Some(c) = s.conversation_mut(conversation_id) {
                        c.is_muted = status.active;
                    }
                },
                |s, previous| {
                    if let (Some(muted), Some(c)) = (previous, s.conversation_mut(conversation_id)) {
                        c.is_muted = muted;
                    }
                },
            )
            .await?;
        Ok(status.active)
    }

    /// Ask the backend for the unread total
    pub async fn refresh_unread(&self) -> Result<u64> {
        let unread: UnreadCount = self.api.get("/api/messages/unread").await?;
        let changed = {
            let mut state = self.state.write().await;
            let changed = state.unread != unread.count;
            state.unread = unread.count;
            changed
        };
        if changed {
            self.events.publish(StoreEvent::ConversationsUpdated {
                unread: unread.count,
            });
        }
        Ok(unread.count)
    }

    /// Refresh the conversation list and pick up new messages in the open
    /// conversation
    pub async fn refresh(&self) -> Result<()> {
        if !self.session.is_authenticated().await {
            return Ok(());
        }
        self.fetch_conversations().await?;

        let active = self.state.read().await.active.clone();
        if let Some(conversation_id) = active {
            let page = self
                .api
                .get_page::<Message>(
                    &messages_path(&conversation_id),
                    PageRequest::first(self.page_size),
                    &[],
                )
                .await?;

            let added = {
                let mut state = self.state.write().await;
                if state.active.as_deref() != Some(conversation_id.as_str()) {
                    0
                } else {
                    let known: HashSet<String> =
                        state.messages.iter().map(|m| m.id.clone()).collect();
                    let fresh: Vec<Message> = page
                        .items
                        .into_iter()
                        .filter(|m| !known.contains(&m.id))
                        .collect();
                    let added = fresh.len();
                    // Keep unsent messages last
                    let at = state
                        .messages
                        .iter()
                        .position(|m| is_temp_id(&m.id))
                        .unwrap_or(state.messages.len());
                    state.messages.splice(at..at, fresh);
                    added
                }
            };
            if added > 0 {
                tracing::debug!(conversation_id = %conversation_id, added, "New messages");
                self.events
                    .publish(StoreEvent::MessageAdded { conversation_id });
            }
        }
        Ok(())
    }

    /// Keep the store current: server events when available, otherwise
    /// every `interval`
    pub fn watch(self: &Arc<Self>, interval: Duration, push_enabled: bool) -> RefreshHandle {
        let store = Arc::clone(self);
        Watcher {
            name: "messages",
            events_path: "/api/events?topic=messages".to_string(),
            topics: vec!["message", "conversation"],
            interval,
            push_enabled,
        }
        .spawn(self.api.clone(), move || {
            let store = store.clone();
            async move { store.refresh().await }
        })
    }

    /// Close the open conversation
    pub async fn close_conversation(&self) {
        let mut state = self.state.write().await;
        state.active = None;
        state.messages.clear();
        state.page = None;
        state.has_more = false;
    }

    /// Forget everything (logout)
    pub async fn reset(&self) {
        *self.state.write().await = MessageState::default();
    }
}

fn messages_path(conversation_id: &str) -> String {
    format!("/api/messages/conversations/{}/messages", segment(conversation_id))
}

fn preview_of(message: &Message) -> MessagePreview {
    MessagePreview {
        content: message.content.clone(),
        sender: Some(message.sender.clone()),
        created_at: message.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str, unread: u64) -> Conversation {
        serde_json::from_value(serde_json::json!({ "_id": id, "unreadCount": unread })).unwrap()
    }

    #[test]
    fn unread_is_summed_over_conversations() {
        let mut state = MessageState {
            conversations: vec![conversation("a", 2), conversation("b", 3)],
            ..Default::default()
        };
        state.recount_unread();
        assert_eq!(state.unread, 5);

        state.conversation_mut("a").unwrap().unread_count = 0;
        state.recount_unread();
        assert_eq!(state.unread, 3);
    }

    fn message(id: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "conversation": "conv1",
            "sender": "u1",
            "content": id,
        }))
        .unwrap()
    }

    #[test]
    fn confirm_drops_copy_from_poll() {
        let mut state = MessageState {
            messages: vec![message("m1"), message("m2"), message("temp-1")],
            ..Default::default()
        };

        state.confirm("temp-1", &message("m2"));

        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn confirm_ignores_closed_conversation() {
        let mut state = MessageState {
            messages: vec![message("m9")],
            ..Default::default()
        };
        state.confirm("temp-1", &message("m9"));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn unread_count_accepts_aliases() {
        let parsed: UnreadCount = serde_json::from_str(r#"{"unreadCount":4}"#).unwrap();
        assert_eq!(parsed.count, 4);
    }
}

//! Comment thread of one image
//!
//! Top-level comments are paged; replies hang off their parent's
//! `replies`. New comments and replies appear under a `temp-` id which
//! is replaced by the server's id, or removed if the request fails.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, PageRequest, segment};
use crate::data::{Comment, FlagStatus, UserRef, is_temp_id, new_temp_id};
use crate::error::{ClientError, Result};
use crate::service::SessionStore;
use crate::state::OptimisticMutation;

const MAX_COMMENT_LENGTH: usize = 1000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewComment<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
}

#[derive(Serialize)]
struct CommentEdit<'a> {
    text: &'a str,
}

/// Where a comment sat before it was removed
struct Removed {
    parent_id: Option<String>,
    index: usize,
    comment: Comment,
}

#[derive(Default)]
struct ThreadState {
    comments: Vec<Comment>,
    page: Option<PageRequest>,
    has_more: bool,
    total: u64,
}

impl ThreadState {
    fn find_mut(&mut self, id: &str) -> Option<&mut Comment> {
        find_mut(&mut self.comments, id)
    }

    fn siblings_mut(&mut self, parent_id: Option<&str>) -> Option<&mut Vec<Comment>> {
        match parent_id {
            None => Some(&mut self.comments),
            Some(parent) => self.find_mut(parent).map(|p| &mut p.replies),
        }
    }

    fn remove(&mut self, id: &str) -> Option<Removed> {
        let removed = remove_from(&mut self.comments, id, None)?;
        match &removed.parent_id {
            Some(parent) => {
                if let Some(parent) = self.find_mut(parent) {
                    parent.replies_count = parent.replies_count.saturating_sub(1);
                }
            }
            None => self.total = self.total.saturating_sub(1),
        }
        Some(removed)
    }

    /// Swap a temporary comment for the server's copy
    fn confirm(&mut self, temp_id: &str, mut created: Comment) {
        if self.find_mut(temp_id).is_none() {
            return;
        }
        // A reload that landed meanwhile may already list it
        if created.id != temp_id {
            remove_from(&mut self.comments, &created.id, None);
        }
        if let Some(slot) = self.find_mut(temp_id) {
            if created.user.is_none() {
                created.user = slot.user.take();
            }
            if created.parent_id.is_none() {
                created.parent_id = slot.parent_id.take();
            }
            *slot = created;
        }
    }

    fn restore(&mut self, removed: Removed) {
        let parent_id = removed.parent_id.clone();
        if let Some(siblings) = self.siblings_mut(parent_id.as_deref()) {
            let at = removed.index.min(siblings.len());
            siblings.insert(at, removed.comment);
        }
        match parent_id {
            Some(parent) => {
                if let Some(parent) = self.find_mut(&parent) {
                    parent.replies_count += 1;
                }
            }
            None => self.total += 1,
        }
    }
}

fn find_mut<'a>(comments: &'a mut [Comment], id: &str) -> Option<&'a mut Comment> {
    for comment in comments.iter_mut() {
        if comment.id == id {
            return Some(comment);
        }
        if let Some(found) = find_mut(&mut comment.replies, id) {
            return Some(found);
        }
    }
    None
}

fn remove_from(comments: &mut Vec<Comment>, id: &str, parent_id: Option<&str>) -> Option<Removed> {
    if let Some(index) = comments.iter().position(|c| c.id == id) {
        return Some(Removed {
            parent_id: parent_id.map(str::to_string),
            index,
            comment: comments.remove(index),
        });
    }
    for comment in comments.iter_mut() {
        let parent = comment.id.clone();
        if let Some(removed) = remove_from(&mut comment.replies, id, Some(&parent)) {
            return Some(removed);
        }
    }
    None
}

/// Comments of one image
pub struct CommentThread {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    image_id: String,
    state: RwLock<ThreadState>,
    page_size: u32,
}

impl CommentThread {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        image_id: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            session,
            image_id: image_id.into(),
            state: RwLock::new(ThreadState::default()),
            page_size: page_size.max(1),
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub async fn comments(&self) -> Vec<Comment> {
        self.state.read().await.comments.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.state.read().await.has_more
    }

    /// Total top-level comments as reported by the backend
    pub async fn total(&self) -> u64 {
        self.state.read().await.total
    }

    /// Load a page of top-level comments; page 1 replaces the thread
    pub async fn load(&self, request: PageRequest) -> Result<Vec<Comment>> {
        let page = self
            .api
            .get_page::<Comment>(
                &format!("/api/comments/{}", segment(&self.image_id)),
                request,
                &[],
            )
            .await?;

        let mut state = self.state.write().await;
        if request.page <= 1 {
            // Unconfirmed comments survive a reload
            let pending: Vec<Comment> = state
                .comments
                .drain(..)
                .filter(|c| is_temp_id(&c.id))
                .collect();
            state.comments = pending;
            state.comments.extend(page.items.iter().cloned());
        } else {
            for comment in &page.items {
                if !state.comments.iter().any(|c| c.id == comment.id) {
                    state.comments.push(comment.clone());
                }
            }
        }
        state.page = Some(page.request());
        state.has_more = page.has_more();
        state.total = page.total;
        Ok(page.items)
    }

    /// Load the page after the last one loaded
    pub async fn load_more(&self) -> Result<Vec<Comment>> {
        let request = {
            let state = self.state.read().await;
            match state.page {
                Some(page) if state.has_more => page.next(),
                Some(_) => return Ok(Vec::new()),
                None => PageRequest::first(self.page_size),
            }
        };
        self.load(request).await
    }

    /// Fetch the replies of `comment_id` and attach them
    pub async fn load_replies(&self, comment_id: &str) -> Result<Vec<Comment>> {
        if is_temp_id(comment_id) {
            return Ok(Vec::new());
        }
        let replies: Vec<Comment> = self
            .api
            .get(&format!("/api/comments/{}/replies", segment(comment_id)))
            .await?;

        if let Some(parent) = self.state.write().await.find_mut(comment_id) {
            let pending: Vec<Comment> = parent
                .replies
                .drain(..)
                .filter(|c| is_temp_id(&c.id))
                .collect();
            parent.replies = replies.clone();
            parent.replies.extend(pending);
            parent.replies_count = parent.replies_count.max(parent.replies.len() as u64);
        }
        Ok(replies)
    }

    /// Post a top-level comment
    pub async fn add_comment(&self, text: &str) -> Result<Comment> {
        self.post(None, text).await
    }

    /// Reply to `parent_id`
    pub async fn reply(&self, parent_id: &str, text: &str) -> Result<Comment> {
        if is_temp_id(parent_id) {
            return Err(ClientError::Validation(
                "Wait for the comment to be posted before replying".to_string(),
            ));
        }
        if self.state.write().await.find_mut(parent_id).is_none() {
            return Err(ClientError::NotFound);
        }
        self.post(Some(parent_id), text).await
    }

    /// Delete a comment or reply; it disappears immediately
    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        if is_temp_id(comment_id) {
            return Err(ClientError::Validation("Comment is not posted yet".to_string()));
        }
        let path = format!("/api/comments/{}", segment(comment_id));
        OptimisticMutation::new(&self.state, "delete_comment")
            .run(
                |s| s.remove(comment_id),
                self.api.delete::<IgnoredAny>(&path),
                |_, _| {},
                |s, removed| {
                    if let Some(removed) = removed {
                        s.restore(removed);
                    }
                },
            )
            .await?;
        Ok(())
    }

    /// Like or unlike a comment; the counter moves immediately
    pub async fn toggle_comment_like(&self, comment_id: &str) -> Result<bool> {
        if is_temp_id(comment_id) {
            return Err(ClientError::Validation("Comment is not posted yet".to_string()));
        }
        self.session.require_user_id().await?;

        let path = format!("/api/comments/{}/like", segment(comment_id));
        let status = OptimisticMutation::new(&self.state, "toggle_comment_like")
            .run(
                |s| {
                    s.find_mut(comment_id).map(|c| {
                        let previous = (c.is_liked, c.likes_count);
                        c.likes_count = if c.is_liked {
                            c.likes_count.saturating_sub(1)
                        } else {
                            c.likes_count + 1
                        };
                        c.is_liked = !c.is_liked;
                        previous
                    })
                },
                self.api.post_empty::<FlagStatus>(&path),
                |s, status| {
                    if let Some(c) = s.find_mut(comment_id) {
                        c.is_liked = status.active;
                        if let Some(count) = status.count {
                            c.likes_count = count;
                        }
                    }
                },
                |s, previous| {
                    if let (Some((liked, count)), Some(c)) = (previous, s.find_mut(comment_id)) {
                        c.is_liked = liked;
                        c.likes_count = count;
                    }
                },
            )
            .await?;
        Ok(status.active)
    }

    /// Change a comment's text
    pub async fn edit_comment(&self, comment_id: &str, text: &str) -> Result<Comment> {
        let text = validate_text(text)?;
        if is_temp_id(comment_id) {
            return Err(ClientError::Validation("Comment is not posted yet".to_string()));
        }

        let path = format!("/api/comments/{}", segment(comment_id));
        let body = CommentEdit { text };
        OptimisticMutation::new(&self.state, "edit_comment")
            .run(
                |s| {
                    s.find_mut(comment_id).map(|c| {
                        let previous = (std::mem::replace(&mut c.text, text.to_string()), c.is_edited);
                        c.is_edited = true;
                        previous
                    })
                },
                self.api.put::<_, Comment>(&path, &body),
                |s, updated| {
                    if let Some(c) = s.find_mut(comment_id) {
                        c.text = updated.text.clone();
                        c.is_edited = true;
                    }
                },
                |s, previous| {
                    if let (Some((old, edited)), Some(c)) = (previous, s.find_mut(comment_id)) {
                        c.text = old;
                        c.is_edited = edited;
                    }
                },
            )
            .await
    }

    async fn post(&self, parent_id: Option<&str>, text: &str) -> Result<Comment> {
        let text = validate_text(text)?;
        let user = self
            .session
            .current_user()
            .await
            .ok_or(ClientError::Unauthorized)?;

        let temp = Comment {
            id: new_temp_id(),
            text: text.to_string(),
            user: Some(UserRef::Profile(user.summary())),
            image_id: Some(self.image_id.clone()),
            parent_id: parent_id.map(str::to_string),
            likes_count: 0,
            replies_count: 0,
            is_liked: false,
            is_edited: false,
            replies: Vec::new(),
            created_at: Some(Utc::now()),
        };
        let temp_id = temp.id.clone();
        let path = format!("/api/comments/{}", segment(&self.image_id));
        let body = NewComment { text, parent_id };

        let comment = OptimisticMutation::new(&self.state, "post_comment")
            .run(
                |s| {
                    match parent_id {
                        Some(parent) => {
                            if let Some(p) = s.find_mut(parent) {
                                p.replies.push(temp.clone());
                                p.replies_count += 1;
                            }
                        }
                        None => {
                            s.comments.insert(0, temp.clone());
                            s.total += 1;
                        }
                    }
                },
                self.api.post::<_, Comment>(&path, &body),
                |s, created| s.confirm(&temp_id, created.clone()),
                |s, ()| {
                    s.remove(&temp_id);
                },
            )
            .await?;

        tracing::debug!(comment_id = %comment.id, image_id = %self.image_id, "Comment posted");
        Ok(comment)
    }
}

fn validate_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ClientError::Validation("Comment cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ClientError::Validation(format!(
            "Comment cannot exceed {MAX_COMMENT_LENGTH} characters"
        )));
    }
    Ok(text)
}

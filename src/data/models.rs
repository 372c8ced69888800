//! Data models
//!
//! Client-side mirrors of backend records. Field names follow the
//! backend's camelCase JSON; ids arrive as `_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Temporary IDs
// =============================================================================

/// Prefix marking ids minted locally for optimistic entities
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Generate a temporary id (`temp-<ULID>`)
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, ulid::Ulid::new())
}

/// True for ids that were never assigned by the server
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

// =============================================================================
// Users
// =============================================================================

/// Account visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Unlisted,
}

/// A platform user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub posts_count: u64,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub account_status: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            is_verified: self.is_verified,
        }
    }

    /// Apply a profile patch in place, returning the previous values
    pub fn apply_patch(&mut self, patch: &ProfilePatch) -> ProfilePatch {
        let previous = ProfilePatch {
            name: patch.name.as_ref().map(|_| self.name.clone()),
            bio: patch.bio.as_ref().map(|_| self.bio.clone().unwrap_or_default()),
            avatar: patch
                .avatar
                .as_ref()
                .map(|_| self.avatar.clone().unwrap_or_default()),
            cover_image: patch
                .cover_image
                .as_ref()
                .map(|_| self.cover_image.clone().unwrap_or_default()),
            website: patch
                .website
                .as_ref()
                .map(|_| self.website.clone().unwrap_or_default()),
            location: patch
                .location
                .as_ref()
                .map(|_| self.location.clone().unwrap_or_default()),
            visibility: patch.visibility.map(|_| self.visibility),
        };

        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(bio) = &patch.bio {
            self.bio = non_empty(bio);
        }
        if let Some(avatar) = &patch.avatar {
            self.avatar = non_empty(avatar);
        }
        if let Some(cover) = &patch.cover_image {
            self.cover_image = non_empty(cover);
        }
        if let Some(website) = &patch.website {
            self.website = non_empty(website);
        }
        if let Some(location) = &patch.location {
            self.location = non_empty(location);
        }
        if let Some(visibility) = patch.visibility {
            self.visibility = visibility;
        }

        previous
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Condensed user shown next to content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

/// Owner reference: either a bare id or a populated summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    Profile(UserSummary),
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Profile(summary) => &summary.id,
        }
    }
}

/// Fields accepted by the profile update endpoint; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.bio.is_none()
            && self.avatar.is_none()
            && self.cover_image.is_none()
            && self.website.is_none()
            && self.location.is_none()
            && self.visibility.is_none()
    }
}

/// Token and user returned by login/register
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: User,
}

// =============================================================================
// Follow graph
// =============================================================================

/// A (follower, following) pair held in the follow lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEdge {
    /// Synthetic edges carry a `temp-` id until the list is refetched
    pub id: String,
    pub follower_id: String,
    pub following_id: String,
    /// Profile of the other side of the edge, when known
    pub user: Option<UserSummary>,
}

impl FollowEdge {
    /// Edge built from a server listing
    pub fn confirmed(follower_id: &str, following_id: &str, user: Option<UserSummary>) -> Self {
        Self {
            id: format!("{}:{}", follower_id, following_id),
            follower_id: follower_id.to_string(),
            following_id: following_id.to_string(),
            user,
        }
    }

    /// Edge created ahead of the server's confirmation
    pub fn synthetic(follower_id: &str, following_id: &str) -> Self {
        Self {
            id: new_temp_id(),
            follower_id: follower_id.to_string(),
            following_id: following_id.to_string(),
            user: None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        is_temp_id(&self.id)
    }
}

/// Follower/following totals for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowCounts {
    #[serde(alias = "followersCount")]
    pub followers: u64,
    #[serde(alias = "followingCount")]
    pub following: u64,
}

// =============================================================================
// Interaction status
// =============================================================================

/// Boolean status returned by check/toggle endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FlagStatus {
    #[serde(
        alias = "liked",
        alias = "favorited",
        alias = "isLiked",
        alias = "isFavorited",
        alias = "isFollowing",
        alias = "following",
        alias = "saved",
        alias = "muted",
        alias = "status"
    )]
    pub active: bool,
    #[serde(default, alias = "likesCount", alias = "favoritesCount", alias = "savesCount")]
    pub count: Option<u64>,
}

// =============================================================================
// Images & collections
// =============================================================================

/// A published image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub public_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub comments_count: u64,
    #[serde(default)]
    pub views_count: u64,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Editable image fields
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

/// Image reference inside a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Id(String),
    Image(Box<Image>),
}

impl ImageRef {
    pub fn id(&self) -> &str {
        match self {
            ImageRef::Id(id) => id,
            ImageRef::Image(image) => &image.id,
        }
    }
}

/// A named group of images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub image_count: u64,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Collection {
    pub fn contains(&self, image_id: &str) -> bool {
        self.images.iter().any(|image| image.id() == image_id)
    }
}

/// Fields for creating or editing a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub visibility: Visibility,
}

// =============================================================================
// Comments
// =============================================================================

/// A comment or reply on an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default, alias = "image")]
    pub image_id: Option<String>,
    #[serde(default, alias = "parent")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub replies_count: u64,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub replies: Vec<Comment>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Messages
// =============================================================================

/// A direct message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, alias = "conversation")]
    pub conversation_id: String,
    pub sender: UserRef,
    #[serde(alias = "body")]
    pub content: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Last-message summary shown in the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    #[serde(alias = "body")]
    pub content: String,
    #[serde(default)]
    pub sender: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A two-or-more party conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<UserSummary>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Reels
// =============================================================================

/// A short video in the reel feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reel {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub saves_count: u64,
    #[serde(default)]
    pub comments_count: u64,
    #[serde(default)]
    pub views_count: u64,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_saved: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Uploads
// =============================================================================

/// Response of the temporary upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempUpload {
    pub public_id: String,
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

// =============================================================================
// Preferences
// =============================================================================

/// Light/dark preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_are_prefixed() {
        let id = new_temp_id();
        assert!(is_temp_id(&id));
        assert!(!is_temp_id("64f1a2b3c4d5e6f708192a3b"));
    }

    #[test]
    fn user_deserializes_backend_shape() {
        let json = serde_json::json!({
            "_id": "u1",
            "name": "Ada",
            "username": "ada",
            "followersCount": 12,
            "isVerified": true,
            "visibility": "private"
        });
        let user: User = serde_json::from_value(json).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.followers_count, 12);
        assert!(user.is_verified);
        assert_eq!(user.visibility, Visibility::Private);
        assert_eq!(user.bio, None);
    }

    #[test]
    fn user_ref_accepts_id_or_profile() {
        let bare: UserRef = serde_json::from_value(serde_json::json!("u1")).unwrap();
        assert_eq!(bare.id(), "u1");

        let populated: UserRef =
            serde_json::from_value(serde_json::json!({"_id": "u2", "username": "bo"})).unwrap();
        assert_eq!(populated.id(), "u2");
    }

    #[test]
    fn profile_patch_returns_previous_values() {
        let mut user: User = serde_json::from_value(serde_json::json!({
            "_id": "u1", "name": "Ada", "username": "ada", "bio": "old"
        }))
        .unwrap();

        let patch = ProfilePatch {
            name: Some("Ada L.".into()),
            bio: Some("".into()),
            ..Default::default()
        };
        let previous = user.apply_patch(&patch);

        assert_eq!(user.name, "Ada L.");
        assert_eq!(user.bio, None);
        assert_eq!(previous.name.as_deref(), Some("Ada"));
        assert_eq!(previous.bio.as_deref(), Some("old"));
        assert!(previous.avatar.is_none());

        user.apply_patch(&previous);
        assert_eq!(user.name, "Ada");
        assert_eq!(user.bio.as_deref(), Some("old"));
    }

    #[test]
    fn flag_status_accepts_endpoint_specific_keys() {
        let liked: FlagStatus =
            serde_json::from_value(serde_json::json!({"liked": true, "likesCount": 4})).unwrap();
        assert!(liked.active);
        assert_eq!(liked.count, Some(4));

        let following: FlagStatus =
            serde_json::from_value(serde_json::json!({"isFollowing": false})).unwrap();
        assert!(!following.active);
    }

    #[test]
    fn synthetic_edges_use_temp_ids() {
        let edge = FollowEdge::synthetic("me", "them");
        assert!(edge.is_synthetic());
        assert!(!FollowEdge::confirmed("me", "them", None).is_synthetic());
    }

    #[test]
    fn theme_mode_parses_and_toggles() {
        assert_eq!(ThemeMode::parse("dark"), Some(ThemeMode::Dark));
        assert_eq!(ThemeMode::parse("sepia"), None);
        assert_eq!(ThemeMode::Light.toggled(), ThemeMode::Dark);
    }
}

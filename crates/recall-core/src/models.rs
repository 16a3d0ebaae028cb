//! Core data models shared by every execution context.
//!
//! Everything here is plain serde data: it is what the session store holds
//! and what crosses the message bus.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discoverable content unit the rotation engine can present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub domain: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
}

/// The current page of candidate items plus its page cursor.
///
/// Replaced wholesale on every successful page fetch; never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPool {
    pub items: Vec<Item>,
    pub page: u32,
}

impl LinkPool {
    pub fn new(items: Vec<Item>, page: u32) -> Self {
        Self { items, page }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose identity is not in `visited`, first occurrence only.
    pub fn unvisited<'a>(&'a self, visited: &VisitedSet) -> Vec<&'a Item> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|item| !visited.contains(&item.id))
            .filter(|item| seen.insert(item.id.as_str()))
            .collect()
    }
}

impl Default for LinkPool {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
        }
    }
}

/// Identities of items the user has already been shown.
///
/// Append-only; serialized as a JSON array in insertion order so the
/// persisted form is stable across writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct VisitedSet {
    order: Vec<String>,
    index: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Returns `true` if the identity was not already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.index.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for VisitedSet {
    fn from(ids: Vec<String>) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }
}

impl From<VisitedSet> for Vec<String> {
    fn from(set: VisitedSet) -> Self {
        set.order
    }
}

/// Resource kinds the optimistic command engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Like,
    Bookmark,
    CommentLike,
    Comment,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Bookmark => "bookmark",
            Self::CommentLike => "comment_like",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The boolean-toggle subset of [`ResourceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    Like,
    Bookmark,
    CommentLike,
}

impl ToggleKind {
    pub fn resource(&self) -> ResourceKind {
        match self {
            Self::Like => ResourceKind::Like,
            Self::Bookmark => ResourceKind::Bookmark,
            Self::CommentLike => ResourceKind::CommentLike,
        }
    }
}

impl fmt::Display for ToggleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.resource().fmt(f)
    }
}

/// Per-target engagement state for a toggle resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionStatus {
    pub engaged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl InteractionStatus {
    pub fn new(engaged: bool, count: Option<i64>) -> Self {
        Self { engaged, count }
    }
}

/// Media attached to a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub url: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// A comment on an item, with at most one level of replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<Media>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_status: Option<InteractionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<Comment>>,
}

/// A binary file attached to a new comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Media kind inferred from the MIME type (`image`, `video`, `file`).
    pub fn media_kind(&self) -> &'static str {
        if self.mime_type.starts_with("image/") {
            "image"
        } else if self.mime_type.starts_with("video/") {
            "video"
        } else {
            "file"
        }
    }
}

/// Bytes travel through JSON (bus, store) as standard base64.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::media::MediaKind;

/// A saved watchlist entry as persisted in client-local storage.
///
/// Field names are part of the stored format and must not change,
/// otherwise existing watchlists stop decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    pub added_at: DateTime<Utc>, // Set once at insertion
}

impl WatchlistItem {
    /// True when this entry refers to the given `(id, kind)` pair
    pub fn matches(&self, id: &str, kind: MediaKind) -> bool {
        self.id == id && self.kind == kind
    }

    pub fn detail_route(&self) -> String {
        self.kind.detail_route(&self.id)
    }
}

/// Input to `add`: everything except the insertion timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewWatchlistItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
}

impl NewWatchlistItem {
    pub fn new(id: impl Into<String>, kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            poster_path: None,
        }
    }

    pub fn with_poster(mut self, poster_path: impl Into<String>) -> Self {
        self.poster_path = Some(poster_path.into());
        self
    }

    pub fn stamp(self, added_at: DateTime<Utc>) -> WatchlistItem {
        WatchlistItem {
            id: self.id,
            kind: self.kind,
            title: self.title,
            poster_path: self.poster_path,
            added_at,
        }
    }
}

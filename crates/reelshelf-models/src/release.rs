use serde::{Deserialize, Deserializer, Serialize};

/// Body returned by the auto-release endpoint.
///
/// `released` is only optional on the wire so failure bodies decode; a
/// successful report must carry it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReleaseReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<ReleasedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleasedContent {
    #[serde(default)]
    pub movies: Vec<ReleasedItem>,
    #[serde(default)]
    pub tv_shows: Vec<ReleasedItem>,
}

/// Summary of one item that moved from pending to available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleasedItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ReleasedContent {
    pub fn total(&self) -> usize {
        self.movies.len() + self.tv_shows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// Backend rows may carry numeric ids
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

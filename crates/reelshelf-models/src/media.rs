use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog partition an item belongs to. Ids are only unique within a kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }

    /// Detail page route for an item of this kind, e.g. `/movie/42`.
    pub fn detail_route(&self, id: &str) -> String {
        format!("/{}/{}", self.as_str(), id)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" | "movies" => Ok(MediaKind::Movie),
            "tv" | "show" | "shows" | "tvshow" => Ok(MediaKind::Tv),
            _ => Err(format!("Invalid media type: {}. Use 'movie' or 'tv'", s)),
        }
    }
}

pub mod media;
pub mod release;
pub mod watchlist;

pub use media::MediaKind;
pub use release::{ReleaseReport, ReleasedContent, ReleasedItem};
pub use watchlist::{NewWatchlistItem, WatchlistItem};

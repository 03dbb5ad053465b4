pub mod error;
pub mod file_store;
pub mod poller;
pub mod store;
pub mod visit;
pub mod watchlist;

pub use error::{PollError, StoreError};
pub use file_store::FileStore;
pub use poller::{HttpReleaseEndpoint, PageKind, PollOutcome, PollerHandle, RefreshPoller, RefreshSink, ReleaseEndpoint};
pub use store::{LocalStore, MemoryStore, StorageChange, StorageEvent};
pub use visit::{FirstVisitTracker, GateView, Navigator, OnboardingGate, VisitState};
pub use watchlist::WatchlistManager;

use crate::store::LocalStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const VISITED_VALUE: &str = "true";

/// Whether this client has been through onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Storage not consulted yet. Also the state while no client runtime is
    /// available (server-side rendering), since local storage does not exist there.
    Unknown,
    FirstVisit,
    Returning,
}

/// Tri-state visited flag backed by a [`LocalStore`] key.
pub struct FirstVisitTracker {
    store: Arc<dyn LocalStore>,
    key: String,
    state: VisitState,
}

impl FirstVisitTracker {
    pub fn new(store: Arc<dyn LocalStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            state: VisitState::Unknown,
        }
    }

    pub fn state(&self) -> VisitState {
        self.state
    }

    /// Consult storage once. Later calls return the settled state without
    /// reading again; the decision holds for the rest of the page load.
    pub fn resolve(&mut self) -> VisitState {
        if self.state == VisitState::Unknown {
            self.state = if self.flag_set() {
                VisitState::Returning
            } else {
                VisitState::FirstVisit
            };
            debug!(key = %self.key, state = ?self.state, "Resolved visit state");
        }
        self.state
    }

    /// Persist the visited flag and move to `Returning`.
    ///
    /// Called by the onboarding destination once it has actually been shown.
    /// A failed write is logged and the current page load still counts as
    /// returning; the next load will see the flag missing and onboard again.
    pub fn mark_as_visited(&mut self) -> VisitState {
        if !self.flag_set() {
            match self.store.write(&self.key, VISITED_VALUE) {
                Ok(()) => info!(operation = "visit_marked", key = %self.key, "Marked client as visited"),
                Err(e) => warn!(
                    operation = "visit_mark_failed",
                    key = %self.key,
                    error = %e,
                    "Could not persist visited flag"
                ),
            }
        }
        self.state = VisitState::Returning;
        self.state
    }

    fn flag_set(&self) -> bool {
        match self.store.read(&self.key) {
            Some(value) if value.trim() == VISITED_VALUE => true,
            Some(value) => {
                warn!("Unrecognised visited flag value {:?} for key {}, treating as absent", value, self.key);
                false
            }
            None => false,
        }
    }
}

/// Performs client-side navigation for the gate.
pub trait Navigator {
    fn navigate(&self, route: &str);
}

/// What a gated view should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
    /// Neutral placeholder until the visit state is known
    Loading,
    /// First visit: the user is being sent to onboarding
    Redirecting(String),
    /// Returning client: render normal content
    Proceed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Mounted,
    Unmounted,
}

/// One-time onboarding redirect in front of normal content.
///
/// The gate only detects a first visit and redirects; it never sets the
/// visited flag. That is left to the onboarding destination so a client is
/// not marked visited before onboarding was actually shown.
pub struct OnboardingGate {
    tracker: FirstVisitTracker,
    welcome_route: String,
    lifecycle: Lifecycle,
    redirected: bool,
}

impl OnboardingGate {
    pub fn new(tracker: FirstVisitTracker, welcome_route: impl Into<String>) -> Self {
        Self {
            tracker,
            welcome_route: welcome_route.into(),
            lifecycle: Lifecycle::Created,
            redirected: false,
        }
    }

    pub fn state(&self) -> VisitState {
        self.tracker.state()
    }

    pub fn has_redirected(&self) -> bool {
        self.redirected
    }

    pub fn render(&self) -> GateView {
        match self.tracker.state() {
            VisitState::Unknown => GateView::Loading,
            VisitState::FirstVisit => GateView::Redirecting(self.welcome_route.clone()),
            VisitState::Returning => GateView::Proceed,
        }
    }

    /// Attach the gate. May happen before the client runtime exists, so the
    /// visit state is left `Unknown` here.
    pub fn mount(&mut self) -> GateView {
        if self.lifecycle == Lifecycle::Created {
            self.lifecycle = Lifecycle::Mounted;
        }
        self.render()
    }

    /// The client runtime is available: resolve the visit state and, on a
    /// first visit, navigate to onboarding. Navigation happens at most once
    /// and never after [`OnboardingGate::unmount`].
    pub fn on_client_ready(&mut self, navigator: &dyn Navigator) -> GateView {
        if self.lifecycle != Lifecycle::Mounted {
            debug!(lifecycle = ?self.lifecycle, "Gate not mounted, skipping visit check");
            return self.render();
        }

        if self.tracker.resolve() == VisitState::FirstVisit && !self.redirected {
            self.redirected = true;
            info!(operation = "onboarding_redirect", route = %self.welcome_route, "First visit, redirecting to onboarding");
            navigator.navigate(&self.welcome_route);
        }
        self.render()
    }

    pub fn unmount(&mut self) {
        self.lifecycle = Lifecycle::Unmounted;
    }
}

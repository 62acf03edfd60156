//! Route guard: gates protected screens on the session state.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::auth::{AuthState, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum GuardDecision {
    /// Render the protected content.
    Allow,
    /// Session not settled yet; render nothing and do not navigate.
    Wait,
    /// Reset navigation to the login entry point.
    RedirectToLogin,
}

/// Navigation hooks the guard drives.
pub trait Navigator {
    fn reset_to_login(&mut self);
    fn show_protected(&mut self);
}

pub struct RouteGuard;

impl RouteGuard {
    /// Decide what the guarded route shows for `session`.
    ///
    /// Never redirects while the session is being checked or an operation is
    /// loading, so a cold start does not flash the login screen.
    pub fn decide(session: &SessionSnapshot) -> GuardDecision {
        match session.state {
            AuthState::Authenticated => GuardDecision::Allow,
            AuthState::Uninitialized | AuthState::Checking => GuardDecision::Wait,
            AuthState::Unauthenticated if session.is_loading => GuardDecision::Wait,
            AuthState::Unauthenticated => GuardDecision::RedirectToLogin,
        }
    }

    /// Follow the session until its manager is dropped, navigating once per
    /// change of decision. Returns the navigator when the channel closes.
    pub async fn run<N: Navigator>(mut session: watch::Receiver<SessionSnapshot>, mut navigator: N) -> N {
        let mut last = None;
        loop {
            let decision = Self::decide(&session.borrow_and_update());
            if decision != GuardDecision::Wait && last != Some(decision) {
                debug!(?decision, "Route guard navigating");
                match decision {
                    GuardDecision::Allow => navigator.show_protected(),
                    GuardDecision::RedirectToLogin => navigator.reset_to_login(),
                    GuardDecision::Wait => {}
                }
                last = Some(decision);
            }

            if session.changed().await.is_err() {
                break;
            }
        }
        navigator
    }
}

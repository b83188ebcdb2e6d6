//! Two-stage access gate in front of the media endpoint.
//!
//! A session must first pick up a challenge-clearance cookie (set once an
//! anti-bot check has been passed) and then see the consent interstitial
//! accepted, which shows up as a playable media element on a known-good
//! seed page. The controller only observes; it never solves either stage.
//! Clearance comes from the operator, either through the cookie file the
//! session re-imports or through the endpoint itself setting cookies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Navigation, Session};

/// Gate progress of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GateState {
    /// Nothing observed yet.
    Unauthenticated,
    /// Waiting for a challenge-clearance cookie.
    NetworkChallengePending,
    /// Clearance cookie observed.
    NetworkChallengeCleared,
    /// Waiting for the consent marker on the seed page.
    ConsentPending,
    /// Both stages cleared; probing may start.
    FullyAuthenticated,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NetworkChallengePending => "network-challenge-pending",
            Self::NetworkChallengeCleared => "network-challenge-cleared",
            Self::ConsentPending => "consent-pending",
            Self::FullyAuthenticated => "fully-authenticated",
        };
        f.write_str(name)
    }
}

/// A gate wait that ended without clearance.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// The cancellation token fired.
    #[error("gate wait cancelled while {state}")]
    Cancelled {
        /// State reached before cancellation.
        state: GateState,
    },

    /// The configured timeout elapsed.
    #[error("gate not cleared after {}s (stuck while {state})", .waited.as_secs())]
    TimedOut {
        /// State reached before the timeout.
        state: GateState,
        /// How long the controller waited.
        waited: Duration,
    },
}

/// Environment-specific evidence that each stage has been cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSignals {
    /// Substrings of cookie names that indicate challenge clearance.
    /// Empty skips the challenge stage.
    pub challenge_cookie_markers: Vec<String>,
    /// Page text that only renders after consent. Empty skips the stage.
    pub consent_marker: String,
}

impl GateSignals {
    /// Returns true if any cookie name contains a challenge marker.
    #[must_use]
    pub fn challenge_cleared(&self, cookie_names: &[String]) -> bool {
        if self.challenge_cookie_markers.is_empty() {
            return true;
        }
        cookie_names.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            self.challenge_cookie_markers
                .iter()
                .any(|marker| name.contains(&marker.to_ascii_lowercase()))
        })
    }

    /// Returns true if a seed navigation shows consent was given.
    ///
    /// A forced transfer counts too: the seed is then retrievable as is.
    #[must_use]
    pub fn consent_given(&self, navigation: &Navigation) -> bool {
        self.consent_marker.is_empty()
            || navigation.transfer.is_some()
            || navigation.has_marker(&self.consent_marker)
    }
}

/// Where and how long to wait for clearance.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// Known-good resource used to observe both stages.
    pub seed_url: String,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits until cancelled.
    pub timeout: Option<Duration>,
    /// Navigation timeout for seed requests.
    pub seed_timeout: Duration,
}

/// A session together with its gate progress and owning worker.
pub struct SessionHandle {
    session: Arc<dyn Session>,
    state: GateState,
    owner: usize,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session.label())
            .field("state", &self.state)
            .field("owner", &self.owner)
            .finish()
    }
}

impl SessionHandle {
    /// Wraps a fresh session owned by worker `owner`.
    #[must_use]
    pub fn new(session: Arc<dyn Session>, owner: usize) -> Self {
        Self {
            session,
            state: GateState::Unauthenticated,
            owner,
        }
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Returns the current gate state.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Returns the owning worker id.
    #[must_use]
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Returns true once both stages are cleared.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == GateState::FullyAuthenticated
    }

    fn advance(&mut self, next: GateState) {
        debug!(session = %self.session.label(), from = %self.state, to = %next, "gate transition");
        self.state = next;
    }
}

/// Drives sessions through the gate.
#[derive(Debug, Clone)]
pub struct GateController {
    signals: GateSignals,
    policy: GatePolicy,
}

impl GateController {
    /// Creates a controller.
    #[must_use]
    pub fn new(signals: GateSignals, policy: GatePolicy) -> Self {
        Self { signals, policy }
    }

    /// Returns the polling policy.
    #[must_use]
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Waits until `handle` is fully authenticated.
    ///
    /// Each poll navigates the seed, re-imports external credentials and
    /// checks the stage the session is in. Gate clearance is monotonic, so
    /// an authenticated handle returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] when `cancel` fires and
    /// [`GateError::TimedOut`] when the policy timeout elapses.
    pub async fn clear(
        &self,
        handle: &mut SessionHandle,
        cancel: &CancellationToken,
    ) -> Result<(), GateError> {
        if handle.is_authenticated() {
            return Ok(());
        }
        let started = Instant::now();
        let session = Arc::clone(&handle.session);
        let seed = self.policy.seed_url.as_str();
        if handle.state == GateState::Unauthenticated {
            handle.advance(GateState::NetworkChallengePending);
        }
        info!(session = %session.label(), seed = %seed, "waiting for gate clearance");

        let mut announced = false;
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled {
                    state: handle.state,
                });
            }

            if handle.state == GateState::NetworkChallengePending {
                let _ = session.navigate(seed, self.policy.seed_timeout).await;
                if let Err(error) = session.refresh_credentials().await {
                    debug!(session = %session.label(), error = %error, "credential refresh failed");
                }
                if self.signals.challenge_cleared(&session.cookie_names(seed)) {
                    handle.advance(GateState::NetworkChallengeCleared);
                    info!(session = %session.label(), "network challenge cleared");
                    handle.advance(GateState::ConsentPending);
                }
            }

            if handle.state == GateState::ConsentPending {
                let navigation = session.navigate(seed, self.policy.seed_timeout).await;
                if self.signals.consent_given(&navigation) {
                    handle.advance(GateState::FullyAuthenticated);
                    info!(
                        session = %session.label(),
                        waited_ms = started.elapsed().as_millis(),
                        "gate cleared"
                    );
                    return Ok(());
                }
                if let Err(error) = session.refresh_credentials().await {
                    debug!(session = %session.label(), error = %error, "credential refresh failed");
                }
            }

            if !announced {
                warn!(
                    session = %session.label(),
                    state = %handle.state,
                    "gate not cleared yet; complete the challenge/consent step for this session"
                );
                announced = true;
            }

            let mut pause = self.policy.poll_interval;
            if let Some(limit) = self.policy.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(GateError::TimedOut {
                        state: handle.state,
                        waited,
                    });
                }
                pause = pause.min(limit - waited);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(GateError::Cancelled { state: handle.state });
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ByteStream, Document, SessionError, TransferEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Seed page that gains a clearance cookie after `cookie_after` navigations
    /// and renders the consent marker after `consent_after` navigations.
    struct ScriptedSession {
        navigations: AtomicUsize,
        cookie_after: usize,
        consent_after: usize,
        transfer_seed: bool,
    }

    impl ScriptedSession {
        fn new(cookie_after: usize, consent_after: usize) -> Self {
            Self {
                navigations: AtomicUsize::new(0),
                cookie_after,
                consent_after,
                transfer_seed: false,
            }
        }
    }

    #[async_trait]
    impl Session for ScriptedSession {
        fn label(&self) -> &str {
            "scripted"
        }

        async fn navigate(&self, url: &str, _timeout: Duration) -> Navigation {
            let count = self.navigations.fetch_add(1, Ordering::SeqCst) + 1;
            if self.transfer_seed {
                return Navigation::transfer(TransferEvent {
                    url: url.to_string(),
                    content_type: Some("video/mp4".to_string()),
                    suggested_filename: None,
                });
            }
            let body = if count >= self.consent_after {
                "<video controls>"
            } else {
                "Are you 18?"
            };
            Navigation::document(Document {
                url: url.to_string(),
                status: 200,
                body: body.to_string(),
            })
        }

        fn cookie_names(&self, _url: &str) -> Vec<String> {
            if self.navigations.load(Ordering::SeqCst) >= self.cookie_after {
                vec!["session".to_string(), "__cf_bm".to_string()]
            } else {
                vec!["session".to_string()]
            }
        }

        async fn refresh_credentials(&self) -> Result<usize, SessionError> {
            Ok(0)
        }

        async fn open_stream(&self, url: &str) -> Result<ByteStream, SessionError> {
            Err(SessionError::invalid_url(url))
        }
    }

    fn signals() -> GateSignals {
        GateSignals {
            challenge_cookie_markers: vec!["cf".to_string(), "bm".to_string()],
            consent_marker: "<video".to_string(),
        }
    }

    fn policy(timeout: Option<Duration>) -> GatePolicy {
        GatePolicy {
            seed_url: "https://h/seed.mp4".to_string(),
            poll_interval: Duration::from_millis(100),
            timeout,
            seed_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_challenge_cleared_matches_marker_substrings() {
        let signals = signals();
        assert!(signals.challenge_cleared(&["__cf_bm".to_string()]));
        assert!(signals.challenge_cleared(&["CF_clearance".to_string()]));
        assert!(!signals.challenge_cleared(&["sessionid".to_string()]));
        assert!(!signals.challenge_cleared(&[]));
    }

    #[test]
    fn test_empty_markers_skip_stages() {
        let signals = GateSignals {
            challenge_cookie_markers: Vec::new(),
            consent_marker: String::new(),
        };
        assert!(signals.challenge_cleared(&[]));
        assert!(signals.consent_given(&Navigation::failed(SessionError::timeout("u"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_walks_both_stages() {
        let controller = GateController::new(signals(), policy(None));
        let mut handle = SessionHandle::new(Arc::new(ScriptedSession::new(3, 6)), 1);
        let cancel = CancellationToken::new();

        controller.clear(&mut handle, &cancel).await.unwrap();
        assert_eq!(handle.state(), GateState::FullyAuthenticated);
        assert!(handle.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_returns_immediately_when_authenticated() {
        let controller = GateController::new(signals(), policy(None));
        let session = Arc::new(ScriptedSession::new(0, 0));
        let mut handle = SessionHandle::new(session.clone(), 1);
        let cancel = CancellationToken::new();
        controller.clear(&mut handle, &cancel).await.unwrap();
        let navigations = session.navigations.load(Ordering::SeqCst);

        controller.clear(&mut handle, &cancel).await.unwrap();
        assert_eq!(session.navigations.load(Ordering::SeqCst), navigations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_on_seed_counts_as_consent() {
        let mut session = ScriptedSession::new(0, usize::MAX);
        session.transfer_seed = true;
        let controller = GateController::new(signals(), policy(None));
        let mut handle = SessionHandle::new(Arc::new(session), 2);
        controller
            .clear(&mut handle, &CancellationToken::new())
            .await
            .unwrap();
        assert!(handle.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_times_out_in_pending_state() {
        let controller =
            GateController::new(signals(), policy(Some(Duration::from_millis(450))));
        let mut handle = SessionHandle::new(Arc::new(ScriptedSession::new(usize::MAX, 0)), 1);

        let err = controller
            .clear(&mut handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::TimedOut {
                state: GateState::NetworkChallengePending,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_cancellable() {
        let controller = GateController::new(signals(), policy(None));
        let mut handle = SessionHandle::new(Arc::new(ScriptedSession::new(0, usize::MAX)), 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = controller.clear(&mut handle, &cancel).await.unwrap_err();
        assert_eq!(
            err,
            GateError::Cancelled {
                state: GateState::ConsentPending
            }
        );
    }
}

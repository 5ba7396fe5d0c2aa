//! Session Renewal Scheduler
//!
//! Keeps an authenticated session alive by refreshing it shortly before it
//! expires. At most one renewal is pending at a time; a successful renewal
//! installs the new session and schedules the next one from its expiry.
//!
//! A failed renewal is reported to the error sink and is *not* retried; the
//! caller decides whether to log in again or trigger [`RenewalScheduler::renew_now`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::SessionProvider;
use crate::domain::session::{Session, SessionError};
use crate::infrastructure::delivery::{ErrorSink, StreamError};

/// Default lead time before expiry at which renewal fires.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Default bound on a single refresh call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Session Store
// =============================================================================

/// Holder of the current session.
///
/// Readers get an `Arc` snapshot; renewal swaps the whole value so readers
/// never observe a half-updated token pair.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    /// Install `session`, replacing any previous one.
    pub fn replace(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        *self.current.write() = Some(Arc::clone(&session));
        session
    }

}

// =============================================================================
// Configuration
// =============================================================================

/// Renewal timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalConfig {
    /// Renew this long before the session expires.
    pub safety_margin: Duration,
    /// Abandon a refresh call after this long.
    pub request_timeout: Duration,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug)]
struct PendingRenewal {
    cancel: CancellationToken,
    fires_at: DateTime<Utc>,
}

/// Schedules session refreshes ahead of expiry.
pub struct RenewalScheduler {
    provider: Arc<dyn SessionProvider>,
    store: Arc<SessionStore>,
    errors: ErrorSink,
    config: RenewalConfig,
    shutdown: CancellationToken,
    in_flight: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingRenewal>>,
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("config", &self.config)
            .field("next_renewal_at", &self.next_renewal_at())
            .finish_non_exhaustive()
    }
}

impl RenewalScheduler {
    /// Create a scheduler. Pending timers stop when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        store: Arc<SessionStore>,
        errors: ErrorSink,
        config: RenewalConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            store,
            errors,
            config,
            shutdown,
            in_flight: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
        })
    }

    /// The store this scheduler keeps current.
    #[must_use]
    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// Install an initial session and schedule its renewal.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TooShort` if the session expires too soon.
    pub fn start(self: &Arc<Self>, session: Session) -> Result<(), SessionError> {
        session.ensure_usable(Utc::now())?;
        self.store.replace(session);
        self.schedule();
        Ok(())
    }

    /// Cancel any pending renewal and renew immediately.
    ///
    /// On success the next renewal is scheduled from the new expiry. On
    /// failure the error is reported to the error sink as well as returned,
    /// and nothing is rescheduled.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure.
    pub async fn renew_now(self: &Arc<Self>) -> Result<(), SessionError> {
        self.cancel();
        self.renew(None).await
    }

    /// Cancel the pending renewal, if any.
    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.cancel.cancel();
        }
    }

    /// When the pending renewal will fire.
    #[must_use]
    pub fn next_renewal_at(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().as_ref().map(|p| p.fires_at)
    }

    /// Whether a renewal is pending.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn schedule(self: &Arc<Self>) {
        let Some(session) = self.store.current() else {
            return;
        };

        let fires_at = chrono::Duration::from_std(self.config.safety_margin)
            .ok()
            .and_then(|margin| session.expires_at().checked_sub_signed(margin))
            .unwrap_or_else(|| {
                warn!(
                    margin_secs = self.config.safety_margin.as_secs(),
                    default_secs = DEFAULT_SAFETY_MARGIN.as_secs(),
                    "Renewal margin out of range, using default"
                );
                session.expires_at() - chrono::Duration::seconds(60)
            });
        let delay = (fires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let timer = self.shutdown.child_token();
        if let Some(previous) = self.pending.lock().replace(PendingRenewal {
            cancel: timer.clone(),
            fires_at,
        }) {
            previous.cancel.cancel();
        }

        debug!(
            did = %session.did(),
            fires_at = %fires_at,
            delay_secs = delay.as_secs(),
            "Scheduled session renewal"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {
                    debug!("Pending session renewal cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    // Failures are reported inside renew().
                    let _ = this.renew(Some(&timer)).await;
                }
            }
        });
    }

    async fn renew(self: &Arc<Self>, timer: Option<&CancellationToken>) -> Result<(), SessionError> {
        let _in_flight = self.in_flight.lock().await;

        // A manual renewal may have superseded this timer while it waited.
        if timer.is_some_and(CancellationToken::is_cancelled) {
            return Ok(());
        }

        match self.refresh_once().await {
            Ok(session) => {
                info!(
                    did = %session.did(),
                    expires_at = %session.expires_at(),
                    "Session renewed"
                );
                self.store.replace(session);
                self.schedule();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Session renewal failed");
                self.pending.lock().take();
                self.errors.report(StreamError::Renewal(e.clone()));
                Err(e)
            }
        }
    }

    async fn refresh_once(&self) -> Result<Session, SessionError> {
        let current = self.store.current().ok_or(SessionError::NoSession)?;
        let timeout = self.config.request_timeout;

        let renewed = tokio::time::timeout(timeout, self.provider.refresh(&current))
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;

        renewed.ensure_usable(Utc::now())?;
        Ok(renewed)
    }
}

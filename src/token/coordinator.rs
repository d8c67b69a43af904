use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::Error;
use crate::telemetry::refresh::{RefreshOutcome, RefreshTelemetry};

use super::{AccessToken, RefreshState};

/// Invoked once per failed refresh, independently of the rejected callers.
pub type AuthFailureCallback = Arc<dyn Fn() + Send + Sync>;

type WaiterResult = Result<String, String>;

const LOCKED_OUT: &str = "token refresh previously failed; sign in again";

struct Shared {
    token: Option<AccessToken>,
    state: RefreshState,
    waiters: Vec<oneshot::Sender<WaiterResult>>,
    on_persistent_failure: Option<AuthFailureCallback>,
}

enum Admission {
    /// The token rotated after the request was sent; replay without refreshing.
    Replay(String),
    Lead(oneshot::Receiver<WaiterResult>),
    Wait(oneshot::Receiver<WaiterResult>, usize),
    LockedOut,
}

/// Owns the current access token and makes sure concurrent 401s share a single
/// refresh call.
///
/// The first caller to report a 401 while `Idle` becomes the leader and spawns
/// the refresh on its own task; every caller, the leader included, then parks on
/// a oneshot channel and is settled together when that task finishes. Dropping
/// a caller only stops its wait, the refresh call keeps running. The mutex is
/// never held across an await point.
pub struct RefreshCoordinator {
    shared: Mutex<Shared>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                token: None,
                state: RefreshState::Idle,
                waiters: Vec::new(),
                on_persistent_failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> Option<String> {
        self.lock().token.as_ref().map(|t| t.value().to_string())
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.lock().token.clone()
    }

    pub fn set_token(&self, value: impl Into<String>) {
        self.lock().token = Some(AccessToken::new(value));
    }

    pub fn clear_token(&self) {
        self.lock().token = None;
    }

    pub fn state(&self) -> RefreshState {
        self.lock().state
    }

    /// Re-arms refresh after a failure. An in-flight refresh is left alone.
    pub fn reset(&self) {
        let mut shared = self.lock();
        if shared.state == RefreshState::Failed {
            shared.state = RefreshState::Idle;
        }
    }

    pub fn mark_failed(&self) {
        self.lock().state = RefreshState::Failed;
    }

    pub fn set_on_persistent_failure(&self, callback: Option<AuthFailureCallback>) {
        self.lock().on_persistent_failure = callback;
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    fn admit(&self, sent_with: Option<&str>) -> Admission {
        let mut shared = self.lock();
        match shared.state {
            RefreshState::Failed => Admission::LockedOut,
            RefreshState::Refreshing => {
                let (tx, rx) = oneshot::channel();
                shared.waiters.push(tx);
                let position = shared.waiters.len();
                Admission::Wait(rx, position)
            }
            RefreshState::Idle => {
                if let Some(current) = shared.token.as_ref()
                    && Some(current.value()) != sent_with
                {
                    return Admission::Replay(current.value().to_string());
                }
                let (tx, rx) = oneshot::channel();
                shared.waiters.push(tx);
                shared.state = RefreshState::Refreshing;
                Admission::Lead(rx)
            }
        }
    }

    /// Obtains a token to replay a request that was rejected with 401.
    ///
    /// `sent_with` is the token the rejected request carried. `refresh_cb` builds
    /// the refresh call and is only invoked by the leader of a refresh episode.
    /// The call runs on a spawned task, so it completes even if every caller gives up.
    pub async fn recover<F, Fut>(
        self: &Arc<Self>,
        sent_with: Option<&str>,
        refresh_cb: F,
        telemetry: &RefreshTelemetry,
    ) -> Result<String, Error>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<String, Error>> + Send + 'static,
    {
        let mut refresh_cb = refresh_cb;
        loop {
            let rx = match self.admit(sent_with) {
                Admission::LockedOut => {
                    debug!(context = %telemetry.context(), "refresh locked out; rejecting 401");
                    return Err(Error::AuthExpired(LOCKED_OUT.into()));
                }
                Admission::Replay(token) => {
                    telemetry.emit_success(RefreshOutcome::Replayed);
                    return Ok(token);
                }
                Admission::Wait(rx, position) => {
                    telemetry.emit_queued(position);
                    rx
                }
                Admission::Lead(rx) => {
                    telemetry.emit_start();
                    self.spawn_refresh(refresh_cb(), telemetry.clone());
                    rx
                }
            };
            match rx.await {
                Ok(Ok(token)) => return Ok(token),
                Ok(Err(message)) => return Err(Error::AuthExpired(message)),
                // Refresh task died without settling; compete for admission again.
                Err(_) => continue,
            }
        }
    }

    fn spawn_refresh<Fut>(self: &Arc<Self>, refresh: Fut, telemetry: RefreshTelemetry)
    where
        Fut: Future<Output = Result<String, Error>> + Send + 'static,
    {
        let mut guard = RefreshGuard {
            coordinator: Arc::clone(self),
            settled: false,
        };
        tokio::spawn(async move {
            let outcome = refresh.await;
            guard.settled = true;
            match outcome {
                Ok(token) => {
                    let served = guard.coordinator.settle_success(&token);
                    debug!(waiters = served, "refresh settled");
                    telemetry.emit_success(RefreshOutcome::Refreshed);
                }
                Err(err) => {
                    telemetry.emit_failure(&err);
                    guard.coordinator.settle_failure(&err.to_string());
                }
            }
        });
    }

    fn settle_success(&self, token: &str) -> usize {
        let waiters = {
            let mut shared = self.lock();
            shared.token = Some(AccessToken::new(token));
            shared.state = RefreshState::Idle;
            std::mem::take(&mut shared.waiters)
        };
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Ok(token.to_string()));
        }
        count
    }

    fn settle_failure(&self, message: &str) {
        let (waiters, callback) = {
            let mut shared = self.lock();
            shared.token = None;
            shared.state = RefreshState::Failed;
            (
                std::mem::take(&mut shared.waiters),
                shared.on_persistent_failure.clone(),
            )
        };
        // Runs before callers are released so they observe its effects.
        if let Some(callback) = callback {
            callback();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(message.to_string()));
        }
    }

    fn abandon(&self) {
        let waiters = {
            let mut shared = self.lock();
            if shared.state == RefreshState::Refreshing {
                shared.state = RefreshState::Idle;
            }
            std::mem::take(&mut shared.waiters)
        };
        if !waiters.is_empty() {
            warn!(
                waiters = waiters.len(),
                "refresh task ended before settling; releasing waiters"
            );
        }
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the coordinator to `Idle` if the refresh task panics or is torn down.
struct RefreshGuard {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.abandon();
        }
    }
}

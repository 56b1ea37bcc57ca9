use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{RequestError, Response, Result};

/// Lifecycle of a cancelable request.
///
/// `InFlight` is the only state `cancel()` acts on; every other state
/// after `Created` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestState {
    Created,
    InFlight,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::InFlight)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<RequestState>,
    token: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RequestState::Created),
            token: CancellationToken::new(),
        })
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> RequestState {
        *self.lock()
    }

    pub(crate) fn start(&self) {
        let mut state = self.lock();
        if *state == RequestState::Created {
            *state = RequestState::InFlight;
        }
    }

    fn cancel(&self) -> bool {
        let mut state = self.lock();
        if *state != RequestState::InFlight {
            return false;
        }
        *state = RequestState::Canceled;
        self.token.cancel();
        true
    }

    /// Records the outcome. Returns `false` when the request was already
    /// canceled, in which case the outcome must be discarded.
    pub(crate) fn finish(&self, result: &Result<Response>) -> bool {
        let mut state = self.lock();
        if *state != RequestState::InFlight {
            return false;
        }
        *state = match result {
            Ok(_) => RequestState::Succeeded,
            Err(RequestError::Timeout { .. }) => RequestState::TimedOut,
            Err(RequestError::Canceled) => RequestState::Canceled,
            Err(_) => RequestState::Failed,
        };
        true
    }
}

/// Eventual result of [`RequestExecutor::execute_cancelable`](crate::RequestExecutor::execute_cancelable).
///
/// Await it directly: `pending.await`.
#[derive(Debug)]
pub struct PendingRequest {
    lifecycle: Arc<Lifecycle>,
    result: oneshot::Receiver<Result<Response>>,
}

impl PendingRequest {
    pub(crate) fn new(
        lifecycle: Arc<Lifecycle>,
        result: oneshot::Receiver<Result<Response>>,
    ) -> Self {
        Self { lifecycle, result }
    }

    pub fn state(&self) -> RequestState {
        self.lifecycle.state()
    }
}

impl IntoFuture for PendingRequest {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'static, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        let Self { lifecycle, result } = self;
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = lifecycle.token().cancelled() => Err(RequestError::Canceled),
                received = result => {
                    // The sender only disappears if the request task was torn down.
                    received.unwrap_or(Err(RequestError::Canceled))
                }
            }
        })
    }
}

/// Cancels the request it was issued with. Cloneable; repeated calls are no-ops.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    lifecycle: Arc<Lifecycle>,
}

impl CancelHandle {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Returns `true` when this call moved the request from `InFlight` to `Canceled`.
    pub fn cancel(&self) -> bool {
        let canceled = self.lifecycle.cancel();

        #[cfg(feature = "tracing")]
        {
            if canceled {
                tracing::debug!("request canceled by caller");
            }
        }

        canceled
    }

    pub fn state(&self) -> RequestState {
        self.lifecycle.state()
    }
}

//! Cooperative cancellation shared by the controller and every worker.
//!
//! Workers read the token at the top of each iteration and sleep on it
//! between iterations, so a stop request is observed after at most one
//! in-flight store operation. Nothing is ever interrupted mid-operation.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct TokenInner {
    state: Mutex<TokenState>,
    changed: Condvar,
}

/// The run flag. Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct RunToken {
    inner: Arc<TokenInner>,
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

impl RunToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                state: Mutex::new(TokenState::Idle),
                changed: Condvar::new(),
            }),
        }
    }

    /// Marks the run as started. Returns false if a stop was already
    /// requested, in which case the token stays stopped.
    pub fn arm(&self) -> bool {
        let mut state = self.inner.state.lock();
        match *state {
            TokenState::Idle | TokenState::Running => {
                *state = TokenState::Running;
                true
            }
            TokenState::Stopped => false,
        }
    }

    /// Requests every holder to stop. Idempotent.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        *state = TokenState::Stopped;
        self.inner.changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.lock() == TokenState::Running
    }

    /// Sleeps for `duration` or until the token stops, whichever is first.
    /// Returns whether the run is still active afterwards.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.inner.state.lock();
        while *state == TokenState::Running {
            if self
                .inner
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        *state == TokenState::Running
    }
}

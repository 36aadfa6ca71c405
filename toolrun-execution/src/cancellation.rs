//! Cooperative cancellation for runs
//!
//! Each active run owns one [`CancellationToken`], kept in the
//! [`CancellationRegistry`] until the run is terminal. Cancelling moves the
//! token forward through `active -> cancelling -> cancelled`, running its
//! callbacks once, in registration order, while in `cancelling`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use toolrun_core::{RunId, ToolError};
use tracing::{debug, error, warn};

use crate::error::CancellationError;

const ACTIVE: u8 = 0;
const CANCELLING: u8 = 1;
const CANCELLED: u8 = 2;

/// Token state; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationState {
    Active,
    Cancelling,
    Cancelled,
}

impl CancellationState {
    fn from_u8(value: u8) -> Self {
        match value {
            ACTIVE => CancellationState::Active,
            CANCELLING => CancellationState::Cancelling,
            _ => CancellationState::Cancelled,
        }
    }
}

type Callback = Box<dyn FnOnce(&RunId) + Send>;

/// Cancellation token of a single run
pub struct CancellationToken {
    run_id: RunId,
    state: AtomicU8,
    next_callback_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    notify: Notify,
}

impl CancellationToken {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            state: AtomicU8::new(ACTIVE),
            next_callback_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn state(&self) -> CancellationState {
        CancellationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == CancellationState::Active
    }

    /// True once cancellation has begun, whether or not it has finished
    pub fn is_cancellation_requested(&self) -> bool {
        self.state() != CancellationState::Active
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == CancellationState::Cancelled
    }

    /// Request cancellation.
    ///
    /// Returns `false` if cancellation was already requested. Callbacks run
    /// on the calling thread; a panicking callback is logged and the rest
    /// still run.
    pub fn cancel(&self) -> bool {
        if self
            .state
            .compare_exchange(ACTIVE, CANCELLING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        debug!(run_id = %self.run_id, callbacks = callbacks.len(), "Cancelling run");

        for (id, callback) in callbacks {
            let run_id = &self.run_id;
            if catch_unwind(AssertUnwindSafe(|| callback(run_id))).is_err() {
                error!(run_id = %self.run_id, callback_id = id, "Cancellation callback panicked");
            }
        }

        self.state.store(CANCELLED, Ordering::Release);
        self.notify.notify_waiters();
        true
    }

    /// Register `callback` to run when cancellation begins.
    ///
    /// Nothing is stored if cancellation was already requested; the returned
    /// handle then reports `is_registered() == false`.
    pub fn register_callback<F>(self: &Arc<Self>, callback: F) -> CallbackHandle
    where
        F: FnOnce(&RunId) + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock();
        // Checked under the lock: `cancel` moves state before taking the list
        if !self.is_active() {
            debug!(run_id = %self.run_id, "Token no longer active, callback not registered");
            return CallbackHandle::unregistered();
        }

        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        callbacks.push((id, Box::new(callback)));
        CallbackHandle {
            token: Arc::downgrade(self),
            id: Some(id),
        }
    }

    fn unregister(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancellation_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for cancellation, at most `timeout` when given.
    ///
    /// Returns whether cancellation was requested.
    pub async fn wait_for_cancellation(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.cancelled()).await.is_ok(),
            None => {
                self.cancelled().await;
                true
            }
        }
    }

    pub fn error_if_cancelled(&self) -> Result<(), ToolError> {
        if self.is_cancellation_requested() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("run_id", &self.run_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to a registered cancellation callback
#[derive(Debug)]
pub struct CallbackHandle {
    token: Weak<CancellationToken>,
    id: Option<u64>,
}

impl CallbackHandle {
    fn unregistered() -> Self {
        Self {
            token: Weak::new(),
            id: None,
        }
    }

    /// Whether a callback was stored when the handle was created
    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// Remove the callback if it has not run yet
    pub fn unregister(self) -> bool {
        match (self.id, self.token.upgrade()) {
            (Some(id), Some(token)) => token.unregister(id),
            _ => false,
        }
    }
}

/// Active cancellation tokens by run id
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<RunId, Arc<CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the token for `run_id`, or return the existing one
    pub fn create(&self, run_id: &RunId) -> Arc<CancellationToken> {
        let mut tokens = self.tokens.lock();
        if let Some(existing) = tokens.get(run_id) {
            warn!(run_id = %run_id, "Cancellation token already exists, reusing it");
            return existing.clone();
        }
        let token = Arc::new(CancellationToken::new(run_id.clone()));
        tokens.insert(run_id.clone(), token.clone());
        token
    }

    /// Create the token for `run_id`, failing if one exists
    pub fn try_create(&self, run_id: &RunId) -> Result<Arc<CancellationToken>, CancellationError> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(run_id) {
            return Err(CancellationError::AlreadyExists(run_id.clone()));
        }
        let token = Arc::new(CancellationToken::new(run_id.clone()));
        tokens.insert(run_id.clone(), token.clone());
        Ok(token)
    }

    /// Cancel the run's token. `false` if unknown or already cancelling.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let token = self.tokens.lock().get(run_id).cloned();
        match token {
            Some(token) => token.cancel(),
            None => {
                debug!(run_id = %run_id, "No cancellation token for run");
                false
            }
        }
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<CancellationToken>> {
        self.tokens.lock().get(run_id).cloned()
    }

    pub fn remove(&self, run_id: &RunId) -> bool {
        self.tokens.lock().remove(run_id).is_some()
    }

    /// Drop every token that has finished cancelling
    pub fn cleanup(&self) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_cancelled());
        let removed = before - tokens.len();
        if removed > 0 {
            debug!(removed, "Removed cancelled tokens");
        }
        removed
    }

    pub fn register_callback<F>(&self, token: &Arc<CancellationToken>, callback: F) -> CallbackHandle
    where
        F: FnOnce(&RunId) + Send + 'static,
    {
        token.register_callback(callback)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("tokens", &self.len())
            .finish()
    }
}

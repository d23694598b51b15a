//! Client reconnection state machine.
//!
//! ```text
//! Idle ─► Connecting ─► Connected
//!              ▲            │ unexpected close / failed connect
//!              │            ▼
//!              └──── Reconnecting
//!
//! any ─► DisconnectRequested   (explicit disconnect)
//! ```
//!
//! The controller only decides; the client owns the timer task that
//! sleeps for [`interval`](ReconnectController::interval) and calls
//! [`begin_attempt`](ReconnectController::begin_attempt). All transitions
//! happen under one lock, so a disconnect racing a pending reconnect
//! always wins.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Reconnection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    DisconnectRequested,
}

#[derive(Debug)]
struct Inner {
    state: ReconnectState,
    disconnect_requested: bool,
    pending: bool,
}

/// Decides when a client reconnects.
#[derive(Debug)]
pub struct ReconnectController {
    inner: Mutex<Inner>,
    interval: Duration,
}

impl ReconnectController {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ReconnectState::Idle,
                disconnect_requested: false,
                pending: false,
            }),
            interval,
        }
    }

    /// Delay before each attempt.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current state.
    pub fn state(&self) -> ReconnectState {
        self.lock().state
    }

    /// Whether a reconnect is scheduled and not yet started.
    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// Whether an explicit disconnect is in effect.
    pub fn is_disconnect_requested(&self) -> bool {
        self.lock().disconnect_requested
    }

    /// An explicit connect: lifts a previous disconnect and cancels a
    /// scheduled reconnect.
    pub fn request_connect(&self) {
        let mut inner = self.lock();
        inner.disconnect_requested = false;
        inner.pending = false;
        inner.state = ReconnectState::Connecting;
    }

    /// A connection was established.
    ///
    /// Returns `false` when a disconnect was requested while connecting;
    /// the caller must close the new connection.
    pub fn on_connected(&self) -> bool {
        let mut inner = self.lock();
        if inner.disconnect_requested {
            return false;
        }
        inner.pending = false;
        inner.state = ReconnectState::Connected;
        true
    }

    /// A connection closed or a connect attempt failed.
    ///
    /// Returns the delay of the newly scheduled reconnect, or `None` when
    /// nothing was scheduled: a disconnect was requested, or a reconnect
    /// is already pending.
    pub fn on_closed(&self) -> Option<Duration> {
        let mut inner = self.lock();
        if inner.disconnect_requested || inner.pending {
            return None;
        }
        inner.pending = true;
        inner.state = ReconnectState::Reconnecting;
        tracing::trace!("Reconnect scheduled in {:?}", self.interval);
        Some(self.interval)
    }

    /// The reconnect timer fired.
    ///
    /// Clears the pending mark and returns whether to connect now: only
    /// when a reconnect is still scheduled, i.e. neither a disconnect nor
    /// an explicit connect happened in the meantime.
    pub fn begin_attempt(&self) -> bool {
        let mut inner = self.lock();
        let scheduled = std::mem::take(&mut inner.pending);
        if !scheduled || inner.disconnect_requested || inner.state != ReconnectState::Reconnecting {
            return false;
        }
        inner.state = ReconnectState::Connecting;
        true
    }

    /// An explicit disconnect. Must be called before the connection is
    /// closed so the close does not schedule a reconnect.
    pub fn request_disconnect(&self) {
        let mut inner = self.lock();
        inner.disconnect_requested = true;
        inner.state = ReconnectState::DisconnectRequested;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

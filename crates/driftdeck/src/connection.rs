//! Session lifecycle state machine and reconnect policy
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected{handshake} ─┐
//!      ▲              ▲                                │ lost
//!      │              └──── Reconnecting{attempt} ◄────┤
//!      │ shutdown                                      │ attempts exhausted
//!      └────────────────────── Failed ◄────────────────┘
//! ```
//!
//! This module only tracks state. The engine actor owns the session and
//! the timers and asks [`Connection`] what to do next.

use std::fmt;
use std::time::Duration;

use driftconf::SessionConfig;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        /// `setupComplete` has been received.
        handshake: bool,
    },
    Reconnecting {
        attempt: u32,
    },
    Failed,
}

impl ConnectionState {
    /// A session object exists.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected { handshake: true } => f.write_str("connected"),
            ConnectionState::Connected { handshake: false } => f.write_str("connected (handshaking)"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Failed => f.write_str("failed"),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(1000),
            max: Duration::from_millis(8000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// `min(base * 2^attempt, max)` for a 1-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// What to do after a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Nobody wants the session; stay down.
    Idle,
    /// Try again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted.
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct Connection {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Connection {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// A session open is starting. Returns false if one is already open or
    /// in progress.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected { .. } => false,
            _ => {
                self.transition(ConnectionState::Connecting);
                true
            }
        }
    }

    /// The session object exists; waiting for `setupComplete`.
    pub fn opened(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.transition(ConnectionState::Connected { handshake: false });
        true
    }

    /// `setupComplete` received; the attempt counter starts over.
    pub fn handshake_complete(&mut self) -> bool {
        if !self.state.is_open() {
            return false;
        }
        self.attempts = 0;
        self.transition(ConnectionState::Connected { handshake: true });
        true
    }

    /// The session closed, errored, or failed to open.
    pub fn lost(&mut self, wants_connected: bool) -> Disconnect {
        if !wants_connected {
            self.transition(ConnectionState::Disconnected);
            return Disconnect::Idle;
        }
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            let attempt = self.attempts;
            self.transition(ConnectionState::Reconnecting { attempt });
            Disconnect::Retry {
                attempt,
                delay: self.policy.delay_for_attempt(attempt),
            }
        } else {
            self.transition(ConnectionState::Failed);
            Disconnect::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// The session was released on purpose. A failed connection keeps
    /// reporting `Failed` until the next connect.
    pub fn shutdown(&mut self) {
        if self.state != ConnectionState::Failed {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "connection state");
            self.state = next;
        }
    }
}

//! Control connection state machine and reconnect backoff.
//!
//! The machine is transport-agnostic: the control-channel client feeds it
//! socket events and asks it whether (and when) to reconnect.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──identified──▶ Ready
//!    ▲                    │                        │
//!    └──────close─────────┴─────────close──────────┘
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Exponential reconnect backoff: `min(max, base × 2^(attempt−1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

/// Upper bound of the uniform jitter, as a fraction of the computed delay.
pub const JITTER_FRACTION: f64 = 0.25;

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    ///
    /// Attempt 0 is treated like attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// `delay(attempt)` plus uniform jitter in `[0, JITTER_FRACTION × delay]`.
    pub fn jittered<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        let jitter = delay.mul_f64(rng.random_range(0.0..=JITTER_FRACTION));
        delay.saturating_add(jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Connection lifecycle plus the reconnect-attempt counter.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of reconnects scheduled since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Request a connection. Returns false (no-op) unless currently Idle.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Idle {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The socket opened. The connection stays Connecting until identified.
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    /// The server answered our identify message.
    ///
    /// Returns true if this transitioned the connection to Ready. A rejection
    /// while Ready demotes the connection back to Connecting, so sends stop
    /// until a later identify succeeds or the socket closes.
    pub fn on_identified(&mut self, rejected: bool) -> bool {
        if rejected {
            if self.state == ConnectionState::Ready {
                self.state = ConnectionState::Connecting;
            }
            return false;
        }
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Ready;
        true
    }

    /// The socket closed or failed to open.
    ///
    /// From any non-Idle state this marks the connection Idle, bumps the
    /// attempt counter and returns the attempt number to schedule. A close
    /// while already Idle schedules nothing.
    pub fn on_close(&mut self) -> Option<u32> {
        if self.state == ConnectionState::Idle {
            return None;
        }
        self.state = ConnectionState::Idle;
        self.attempt = self.attempt.saturating_add(1);
        Some(self.attempt)
    }
}

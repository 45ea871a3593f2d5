//! Bridge metrics for observability
//!
//! Counters for the control channel, request dispatch, and the relay queues.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide bridge metrics
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    // Control channel
    /// Sessions that reached the open state
    pub sessions_opened: AtomicU64,
    /// Reconnects scheduled after a close or failed connect
    pub reconnects_scheduled: AtomicU64,
    /// Inbound frames that failed to parse or had an unknown kind
    pub protocol_errors: AtomicU64,
    /// Outbound messages written to the socket
    pub messages_sent: AtomicU64,
    /// Outbound messages refused because the channel was not ready
    pub messages_dropped: AtomicU64,

    // Dispatch
    /// Requests received over the control channel
    pub requests_received: AtomicU64,
    /// Requests answered with an error payload
    pub request_errors: AtomicU64,

    // Relay queues
    pub teleports_enqueued: AtomicU64,
    pub lookups_started: AtomicU64,
    pub lookup_timeouts: AtomicU64,
    /// Lookups short-circuited because the subject was already in flight
    pub lookups_busy: AtomicU64,
    /// Responses posted for unknown or already-answered request ids
    pub responses_rejected: AtomicU64,

    // Events
    pub presence_events: AtomicU64,
    pub events_ingested: AtomicU64,

    /// Process start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_error(&self) {
        self.request_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn teleport_enqueued(&self) {
        self.teleports_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_started(&self) {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_timed_out(&self) {
        self.lookup_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_busy(&self) {
        self.lookups_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_rejected(&self) {
        self.responses_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presence_event(&self) {
        self.presence_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            control: ControlMetrics {
                sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
                reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            },
            requests: RequestMetrics {
                received: self.requests_received.load(Ordering::Relaxed),
                errors: self.request_errors.load(Ordering::Relaxed),
            },
            queues: QueueMetrics {
                teleports_enqueued: self.teleports_enqueued.load(Ordering::Relaxed),
                lookups_started: self.lookups_started.load(Ordering::Relaxed),
                lookup_timeouts: self.lookup_timeouts.load(Ordering::Relaxed),
                lookups_busy: self.lookups_busy.load(Ordering::Relaxed),
                responses_rejected: self.responses_rejected.load(Ordering::Relaxed),
            },
            events: EventMetrics {
                presence: self.presence_events.load(Ordering::Relaxed),
                ingested: self.events_ingested.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub control: ControlMetrics,
    pub requests: RequestMetrics,
    pub queues: QueueMetrics,
    pub events: EventMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMetrics {
    pub sessions_opened: u64,
    pub reconnects_scheduled: u64,
    pub protocol_errors: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub received: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub teleports_enqueued: u64,
    pub lookups_started: u64,
    pub lookup_timeouts: u64,
    pub lookups_busy: u64,
    pub responses_rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetrics {
    pub presence: u64,
    pub ingested: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub control: String,
    pub known_players: u64,
    pub uptime_secs: u64,
}

//! Session state machine
//!
//! ```text
//!  DISCONNECTED ──► CONNECTING ──► HANDSHAKING ──► CONNECTED ──► SUBSCRIBED
//!        ▲             │  └─────(plain)─────────────►  │              │
//!        └─────────────┴──────────┴────────────────────┴──────────────┘
//!                         any failing state ──► DEGRADED ──► CONNECTING
//! ```
//!
//! Only the supervisor loop moves between states. Everything else reads
//! the state published on the [`crate::Link`].

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Subscribed,
    Degraded,
}

impl SessionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Degraded => "degraded",
        }
    }

    /// Whether application publish/subscribe requests are accepted
    pub const fn accepts_requests(&self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub const fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, Handshaking | Connected | Disconnected | Degraded)
                | (Handshaking, Connected | Disconnected | Degraded)
                | (Connected, Subscribed | Disconnected | Degraded)
                | (Subscribed, Disconnected | Degraded)
                | (Degraded, Connecting)
        )
    }
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed attempts since the last established session
///
/// `attempt_count` counts every failure. Only failures the supervisor
/// escalates count toward `bounded_count`, and only `bounded_count` is
/// compared against `max_attempts`, so a run of network errors does not
/// use up the retries of a later authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryState {
    pub attempt_count: u32,
    pub bounded_count: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            bounded_count: 0,
            max_attempts,
        }
    }

    /// Count a failed attempt; returns the new attempt count.
    pub fn record_failure(&mut self, bounded: bool) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        if bounded {
            self.bounded_count = self.bounded_count.saturating_add(1);
        }
        self.attempt_count
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.bounded_count = 0;
    }

    pub const fn exceeded(&self) -> bool {
        self.bounded_count > self.max_attempts
    }
}

/// One recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// Retry count at the time of the transition
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 6] = [
        SessionState::Disconnected,
        SessionState::Connecting,
        SessionState::Handshaking,
        SessionState::Connected,
        SessionState::Subscribed,
        SessionState::Degraded,
    ];

    #[test]
    fn test_state_as_str() {
        assert_eq!(SessionState::Disconnected.as_str(), "disconnected");
        assert_eq!(SessionState::Handshaking.as_str(), "handshaking");
        assert_eq!(SessionState::Degraded.as_str(), "degraded");
    }

    #[test]
    fn test_only_connected_states_accept_requests() {
        for state in ALL {
            let expected = matches!(state, SessionState::Connected | SessionState::Subscribed);
            assert_eq!(state.accepts_requests(), expected, "{}", state);
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{}", state);
        }
    }

    #[test]
    fn test_degraded_only_restarts() {
        for next in ALL {
            assert_eq!(
                SessionState::Degraded.can_transition_to(next),
                next == SessionState::Connecting
            );
        }
    }

    #[test]
    fn test_disconnected_only_connects() {
        for next in ALL {
            assert_eq!(
                SessionState::Disconnected.can_transition_to(next),
                next == SessionState::Connecting
            );
        }
    }

    #[test]
    fn test_retry_state() {
        let mut retry = RetryState::new(2);
        assert_eq!(retry.record_failure(true), 1);
        assert_eq!(retry.record_failure(true), 2);
        assert!(!retry.exceeded());
        assert_eq!(retry.record_failure(true), 3);
        assert!(retry.exceeded());
        retry.reset();
        assert_eq!(retry.attempt_count, 0);
        assert_eq!(retry.bounded_count, 0);
        assert!(!retry.exceeded());
    }

    #[test]
    fn test_unbounded_failures_keep_retry_budget() {
        let mut retry = RetryState::new(2);
        for _ in 0..5 {
            retry.record_failure(false);
        }
        assert!(!retry.exceeded());
        assert_eq!(retry.record_failure(true), 6);
        assert_eq!(retry.bounded_count, 1);
        assert!(!retry.exceeded());
    }
}

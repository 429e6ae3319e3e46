use thiserror::Error;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const BASE_RECONNECT_DELAY_MS: u64 = 1_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Lifecycle of the live channel. `attempt` counts consecutive failed
/// reconnects and resets on every successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed { code: Option<u16>, reason: String },
    Reconnecting { attempt: u32, delay_ms: u64 },
}

/// Whether a close was requested by this client. Inferred-from-close-code is
/// unreliable across environments, so the caller states it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseIntent {
    Intentional,
    Dropped,
}

/// What the driver should do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No reconnect: either the client closed on purpose or the attempt
    /// ceiling was hit (the latter warrants a user-visible failure).
    Terminal { gave_up: bool },
    RetryIn { attempt: u32, delay_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("live channel is not connected")]
    NotConnected,
    #[error("transport send failed: {0}")]
    SendFailed(String),
}

/// Exponential backoff, capped: 1000, 2000, 4000, ... up to 30000 ms.
pub fn reconnect_delay_ms(attempt: u32) -> u64 {
    BASE_RECONNECT_DELAY_MS
        .saturating_mul(1u64 << attempt.min(10))
        .min(MAX_RECONNECT_DELAY_MS)
}

/// Pure connection state machine. The wasm driver owns the socket and the
/// timers; this tracks state, the reconnect attempt counter and the single
/// pending-action slot.
#[derive(Debug)]
pub struct ConnectionFsm<M> {
    state: ConnectionState,
    attempt: u32,
    pending: Option<M>,
}

impl<M> Default for ConnectionFsm<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ConnectionFsm<M> {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn pending(&self) -> Option<&M> {
        self.pending.as_ref()
    }

    /// Successful open: reset the attempt counter and hand back the pending
    /// action (at most one) for the driver to flush.
    pub fn on_open(&mut self) -> Option<M> {
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.pending.take()
    }

    /// Channel closed. Intentional closes and exhausted attempts are
    /// terminal; otherwise schedule one reconnect with backoff.
    pub fn on_close(&mut self, intent: CloseIntent, code: Option<u16>, reason: &str) -> CloseOutcome {
        if intent == CloseIntent::Intentional {
            self.state = ConnectionState::Closed {
                code,
                reason: reason.to_string(),
            };
            return CloseOutcome::Terminal { gave_up: false };
        }
        if self.attempt >= MAX_RECONNECT_ATTEMPTS {
            self.state = ConnectionState::Closed {
                code,
                reason: reason.to_string(),
            };
            return CloseOutcome::Terminal { gave_up: true };
        }
        let delay_ms = reconnect_delay_ms(self.attempt);
        self.attempt += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempt,
            delay_ms,
        };
        CloseOutcome::RetryIn {
            attempt: self.attempt,
            delay_ms,
        }
    }

    /// Back to `Connecting` when a scheduled reconnect actually starts.
    pub fn on_reconnect_start(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Gate an outgoing message: not-open stores it as the pending action
    /// (overwriting an older unsent one) and signals `NotConnected`; open
    /// returns it for the driver to encode and transmit.
    pub fn prepare_send(&mut self, message: M) -> Result<M, SendError> {
        if self.is_open() {
            Ok(message)
        } else {
            self.pending = Some(message);
            Err(SendError::NotConnected)
        }
    }

    /// Transport failure after `prepare_send`: keep the message for replay.
    pub fn on_send_failure(&mut self, message: M) {
        self.pending = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_then_terminal_failure() {
        let mut fsm: ConnectionFsm<()> = ConnectionFsm::new();
        let mut delays = Vec::new();
        for _ in 0..MAX_RECONNECT_ATTEMPTS {
            match fsm.on_close(CloseIntent::Dropped, Some(1006), "abnormal") {
                CloseOutcome::RetryIn { delay_ms, .. } => delays.push(delay_ms),
                CloseOutcome::Terminal { .. } => panic!("gave up too early"),
            }
            fsm.on_reconnect_start();
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(
            fsm.on_close(CloseIntent::Dropped, Some(1006), "abnormal"),
            CloseOutcome::Terminal { gave_up: true }
        );
        assert!(matches!(fsm.state(), ConnectionState::Closed { .. }));
    }

    #[test]
    fn delay_caps_at_thirty_seconds() {
        assert_eq!(reconnect_delay_ms(5), 30_000);
        assert_eq!(reconnect_delay_ms(40), 30_000);
    }

    #[test]
    fn attempt_counter_resets_on_open() {
        let mut fsm: ConnectionFsm<&str> = ConnectionFsm::new();
        fsm.on_close(CloseIntent::Dropped, None, "dropped");
        fsm.on_close(CloseIntent::Dropped, None, "dropped");
        fsm.on_open();
        match fsm.on_close(CloseIntent::Dropped, None, "dropped") {
            CloseOutcome::RetryIn { attempt, delay_ms } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay_ms, 1000);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn intentional_close_never_retries() {
        let mut fsm: ConnectionFsm<&str> = ConnectionFsm::new();
        assert_eq!(
            fsm.on_close(CloseIntent::Intentional, Some(1000), "client closed"),
            CloseOutcome::Terminal { gave_up: false }
        );
    }

    #[test]
    fn send_while_closed_keeps_only_latest_pending() {
        let mut fsm: ConnectionFsm<&str> = ConnectionFsm::new();
        assert_eq!(fsm.prepare_send("first"), Err(SendError::NotConnected));
        assert_eq!(fsm.prepare_send("second"), Err(SendError::NotConnected));
        assert_eq!(fsm.pending(), Some(&"second"));
        assert_eq!(fsm.on_open(), Some("second"));
        assert_eq!(fsm.pending(), None);
    }

    #[test]
    fn open_send_passes_through_and_failure_requeues() {
        let mut fsm: ConnectionFsm<&str> = ConnectionFsm::new();
        fsm.on_open();
        let msg = fsm.prepare_send("refresh").unwrap();
        fsm.on_send_failure(msg);
        // A failed write parks the message without closing the channel; the
        // caller sees the failure and can fall back while the message waits.
        assert!(fsm.is_open());
        assert_eq!(fsm.pending(), Some(&"refresh"));
        fsm.on_close(CloseIntent::Dropped, None, "dropped");
        assert_eq!(fsm.on_open(), Some("refresh"));
        assert_eq!(fsm.pending(), None);
    }
}

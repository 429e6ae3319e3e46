/// Default trailing-debounce window between a burst of messages and the one
/// render they collapse into.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Core bookkeeping for per-subject update coalescing: a burst of pushes
/// within the debounce window yields one delivery carrying the last message,
/// and a message structurally equal to the last delivered one is suppressed.
///
/// The owner arms a timer on every `push` and calls `fire` with the returned
/// token when it elapses; a newer push invalidates older tokens, which is
/// also how retargeting a subject drops a stale timer.
#[derive(Debug)]
pub struct Coalescer<M: PartialEq> {
    window_ms: u64,
    last_delivered: Option<M>,
    pending: Option<M>,
    generation: u64,
}

impl<M: PartialEq + Clone> Coalescer<M> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_delivered: None,
            pending: None,
            generation: 0,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Replace the pending message and return the token for the timer the
    /// caller should (re)arm. Trailing edge: only the newest token fires.
    pub fn push(&mut self, message: M) -> u64 {
        self.pending = Some(message);
        self.generation += 1;
        self.generation
    }

    /// Timer elapsed. Delivers the pending message unless the token is stale
    /// or the message equals the last delivered one.
    pub fn fire(&mut self, token: u64) -> Option<M> {
        if token != self.generation {
            return None;
        }
        let message = self.pending.take()?;
        if self.last_delivered.as_ref() == Some(&message) {
            return None;
        }
        self.last_delivered = Some(message.clone());
        Some(message)
    }

    /// Drop pending and delivered state; outstanding tokens go stale.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_delivered = None;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_collapses_to_last_message() {
        let mut c: Coalescer<&str> = Coalescer::new(100);
        let t1 = c.push("m1");
        let t2 = c.push("m1"); // m2 structurally equal to m1
        let t3 = c.push("m3");
        assert_eq!(c.fire(t1), None);
        assert_eq!(c.fire(t2), None);
        assert_eq!(c.fire(t3), Some("m3"));
        // Nothing left pending.
        assert_eq!(c.fire(t3), None);
    }

    #[test]
    fn duplicate_of_last_delivered_is_suppressed() {
        let mut c: Coalescer<&str> = Coalescer::new(100);
        let t = c.push("snapshot");
        assert_eq!(c.fire(t), Some("snapshot"));
        let t = c.push("snapshot");
        assert_eq!(c.fire(t), None);
        let t = c.push("changed");
        assert_eq!(c.fire(t), Some("changed"));
    }

    #[test]
    fn reset_invalidates_outstanding_timer() {
        let mut c: Coalescer<&str> = Coalescer::new(100);
        let t = c.push("old subject");
        c.reset();
        assert_eq!(c.fire(t), None);
        let t = c.push("new subject");
        assert_eq!(c.fire(t), Some("new subject"));
    }
}

//! The Steering Queue: a mutex-protected, priority-ordered list of mid-flight
//! control messages a caller can push into a running session between yield
//! points.
//!
//! Grounded on the teacher's mutex-protected-state idiom used throughout
//! `agent::session_router` (a `Mutex<HashMap<...>>` guarding shared session
//! state); generalized here to an ordered list with an abort-first drain.

use std::sync::Mutex;

/// A mid-flight control message pushed into a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteeringMessage {
    /// Terminate the current run with `reason` at the next yield point.
    Abort { reason: String },
    /// Prepend a synthetic user message to the context before the next
    /// engine call.
    Inject { content: String },
    /// Same as `Inject`, tagged `[PRIORITY] ...`.
    Priority { content: String },
    /// Replace the system prompt.
    ContextUpdate { content: String },
}

impl SteeringMessage {
    fn rank(&self) -> u8 {
        match self {
            SteeringMessage::Abort { .. } => 0,
            _ => 1,
        }
    }
}

/// Thread-safe priority queue of [`SteeringMessage`]s.
///
/// `push` is non-blocking; `drain` returns everything pending, abort-first,
/// then FIFO within the remainder. Messages never drained before a session
/// ends are simply dropped.
#[derive(Default)]
pub struct SteeringQueue {
    messages: Mutex<Vec<SteeringMessage>>,
}

impl SteeringQueue {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, message: SteeringMessage) {
        let mut guard = self.messages.lock().expect("steering queue mutex poisoned");
        guard.push(message);
    }

    /// Remove and return all pending messages, abort messages first, FIFO
    /// otherwise.
    pub fn drain(&self) -> Vec<SteeringMessage> {
        let mut guard = self.messages.lock().expect("steering queue mutex poisoned");
        let mut drained: Vec<SteeringMessage> = guard.drain(..).collect();
        drained.sort_by_key(SteeringMessage::rank);
        drained
    }

    /// True if an abort message is pending, without draining anything.
    pub fn has_abort(&self) -> bool {
        let guard = self.messages.lock().expect("steering queue mutex poisoned");
        guard.iter().any(|m| matches!(m, SteeringMessage::Abort { .. }))
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.messages.lock().expect("steering queue mutex poisoned");
        guard.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_abort_first() {
        let q = SteeringQueue::new();
        q.push(SteeringMessage::Inject { content: "a".into() });
        q.push(SteeringMessage::Abort { reason: "stop".into() });
        q.push(SteeringMessage::Priority { content: "b".into() });

        let drained = q.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], SteeringMessage::Abort { .. }));
    }

    #[test]
    fn drain_empties_the_queue() {
        let q = SteeringQueue::new();
        q.push(SteeringMessage::Inject { content: "a".into() });
        assert!(!q.is_empty());
        q.drain();
        assert!(q.is_empty());
        assert!(q.drain().is_empty());
    }

    #[test]
    fn has_abort_does_not_drain() {
        let q = SteeringQueue::new();
        q.push(SteeringMessage::Abort { reason: "x".into() });
        assert!(q.has_abort());
        assert!(!q.is_empty());
    }

    #[test]
    fn non_abort_messages_preserve_fifo_order() {
        let q = SteeringQueue::new();
        q.push(SteeringMessage::Inject { content: "first".into() });
        q.push(SteeringMessage::Priority { content: "second".into() });
        let drained = q.drain();
        match (&drained[0], &drained[1]) {
            (SteeringMessage::Inject { content }, SteeringMessage::Priority { content: c2 }) => {
                assert_eq!(content, "first");
                assert_eq!(c2, "second");
            }
            other => panic!("unexpected order: {other:?}"),
        }
    }
}

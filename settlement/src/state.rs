//! Per-event settlement states
//!
//! ```text
//! RECEIVED ──► APPLIED
//!    │  └───► DUPLICATE
//!    ▼
//! RETRY_PENDING ──► APPLIED
//!    │
//!    ▼
//! DEAD_LETTERED   (also reachable straight from RECEIVED)
//! ```
//!
//! There is no failed terminal state: an event is either applied, recognised
//! as a replay, or handed to an operator through the dead-letter queue.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Settlement state of one delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    /// Delivered, not yet applied
    Received,
    /// Apply failed with a transient error, waiting for backoff
    RetryPending,
    /// Balances updated
    Applied,
    /// Transfer id already applied; nothing changed
    Duplicate,
    /// Given up and routed to the dead-letter queue
    DeadLettered,
}

impl SettlementState {
    /// Terminal states end tracking of an event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementState::Applied | SettlementState::Duplicate | SettlementState::DeadLettered
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: SettlementState) -> bool {
        use SettlementState::*;
        matches!(
            (self, next),
            (Received, Applied)
                | (Received, Duplicate)
                | (Received, RetryPending)
                | (Received, DeadLettered)
                | (RetryPending, RetryPending)
                | (RetryPending, Applied)
                | (RetryPending, Duplicate)
                | (RetryPending, DeadLettered)
        )
    }

    fn index(&self) -> usize {
        match self {
            SettlementState::Received => 0,
            SettlementState::RetryPending => 1,
            SettlementState::Applied => 2,
            SettlementState::Duplicate => 3,
            SettlementState::DeadLettered => 4,
        }
    }

    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Received => "RECEIVED",
            SettlementState::RetryPending => "RETRY_PENDING",
            SettlementState::Applied => "APPLIED",
            SettlementState::Duplicate => "DUPLICATE",
            SettlementState::DeadLettered => "DEAD_LETTERED",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks in-flight events and counts every state entered
#[derive(Debug, Default)]
pub struct StateTracker {
    in_flight: DashMap<Uuid, SettlementState>,
    entered: [AtomicU64; 5],
}

impl StateTracker {
    /// Create tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a delivery; a redelivery restarts at RECEIVED
    pub fn begin(&self, id: Uuid) {
        self.in_flight.insert(id, SettlementState::Received);
        self.bump(SettlementState::Received);
    }

    /// Move `id` to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&self, id: Uuid, next: SettlementState) -> bool {
        let current = match self.in_flight.get(&id) {
            Some(state) => *state,
            None => {
                tracing::warn!(id = %id, next = %next, "Transition for untracked event");
                return false;
            }
        };

        if !current.can_transition_to(next) {
            tracing::warn!(id = %id, from = %current, to = %next, "Illegal settlement transition");
            return false;
        }

        if next.is_terminal() {
            self.in_flight.remove(&id);
        } else {
            self.in_flight.insert(id, next);
        }
        self.bump(next);
        tracing::debug!(id = %id, from = %current, to = %next, "Settlement transition");
        true
    }

    /// Current state of an in-flight event
    pub fn current(&self, id: &Uuid) -> Option<SettlementState> {
        self.in_flight.get(id).map(|state| *state)
    }

    /// Events not yet in a terminal state
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// How many times `state` was entered
    pub fn count(&self, state: SettlementState) -> u64 {
        self.entered[state.index()].load(Ordering::Relaxed)
    }

    fn bump(&self, state: SettlementState) {
        self.entered[state.index()].fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SettlementState::*;

    #[test]
    fn test_transitions() {
        assert!(Received.can_transition_to(Applied));
        assert!(Received.can_transition_to(RetryPending));
        assert!(RetryPending.can_transition_to(Applied));
        assert!(RetryPending.can_transition_to(DeadLettered));
        assert!(!Applied.can_transition_to(RetryPending));
        assert!(!DeadLettered.can_transition_to(Applied));
        assert!(!Duplicate.can_transition_to(Applied));
        assert!(!Received.can_transition_to(Received));
    }

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = StateTracker::new();
        let id = Uuid::new_v4();

        tracker.begin(id);
        assert_eq!(tracker.current(&id), Some(Received));
        assert!(tracker.transition(id, RetryPending));
        assert!(tracker.transition(id, Applied));

        assert_eq!(tracker.current(&id), None);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.count(Applied), 1);
        assert_eq!(tracker.count(RetryPending), 1);

        // terminal events are no longer tracked
        assert!(!tracker.transition(id, DeadLettered));
        assert_eq!(tracker.count(DeadLettered), 0);
    }

    #[test]
    fn test_illegal_transition_ignored() {
        let tracker = StateTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id);

        assert!(!tracker.transition(id, Received));
        assert_eq!(tracker.current(&id), Some(Received));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RetryPending.to_string(), "RETRY_PENDING");
        assert_eq!(
            serde_json::to_string(&DeadLettered).unwrap(),
            "\"DEAD_LETTERED\""
        );
    }
}

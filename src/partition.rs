use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Identifies one partition of a topic: a totally ordered, appendable
/// shard that is the unit of fetch/consume assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    pub broker_id: u32,
    pub partition: u32,
}

impl Partition {
    pub fn new(broker_id: u32, partition: u32) -> Self {
        Self {
            broker_id,
            partition,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.broker_id, self.partition)
    }
}

const DECISION_UNSET: u8 = 0;
const DECISION_ACKED: u8 = 1;
const DECISION_ROLLBACK: u8 = 2;

/// Consumption decision observed after a listener callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    None,
    Ack,
    Rollback,
}

/// Shared per-partition acknowledgment state.
///
/// The consumer callback sets ack or rollback between message
/// deliveries; the fetch worker observes the decision immediately after
/// each callback returns. The decision is read and cleared in a single
/// atomic swap so a signal set concurrently with evaluation is never
/// lost.
#[derive(Debug)]
pub struct PartitionState {
    auto_ack: AtomicBool,
    decision: AtomicU8,
}

impl PartitionState {
    pub fn new(auto_ack: bool) -> Self {
        Self {
            auto_ack: AtomicBool::new(auto_ack),
            decision: AtomicU8::new(DECISION_UNSET),
        }
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack.load(Ordering::Acquire)
    }

    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.auto_ack.store(auto_ack, Ordering::Release);
    }

    /// Mark the open consumption transaction as committed. The last
    /// decision before evaluation wins.
    pub fn ack(&self) {
        self.decision.store(DECISION_ACKED, Ordering::Release);
    }

    /// Mark the open consumption transaction as rolled back.
    pub fn rollback(&self) {
        self.decision.store(DECISION_ROLLBACK, Ordering::Release);
    }

    /// Read and clear the pending decision atomically.
    pub fn take_decision(&self) -> AckDecision {
        match self.decision.swap(DECISION_UNSET, Ordering::AcqRel) {
            DECISION_ACKED => AckDecision::Ack,
            DECISION_ROLLBACK => AckDecision::Rollback,
            _ => AckDecision::None,
        }
    }

    pub fn reset(&self) {
        self.decision.store(DECISION_UNSET, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display() {
        assert_eq!(Partition::new(2, 7).to_string(), "2-7");
    }

    #[test]
    fn test_take_decision_clears() {
        let state = PartitionState::new(false);
        assert_eq!(state.take_decision(), AckDecision::None);

        state.ack();
        assert_eq!(state.take_decision(), AckDecision::Ack);
        assert_eq!(state.take_decision(), AckDecision::None);

        state.rollback();
        assert_eq!(state.take_decision(), AckDecision::Rollback);
        assert_eq!(state.take_decision(), AckDecision::None);
    }

    #[test]
    fn test_last_decision_wins() {
        let state = PartitionState::new(false);
        state.ack();
        state.rollback();
        assert_eq!(state.take_decision(), AckDecision::Rollback);
    }

    #[test]
    fn test_auto_ack_toggle() {
        let state = PartitionState::new(true);
        assert!(state.is_auto_ack());
        state.set_auto_ack(false);
        assert!(!state.is_auto_ack());
    }
}

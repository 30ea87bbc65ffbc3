//! State machine trait for status enums.
//!
//! Gives ledger, payment, and subscription statuses one interface for
//! validating transitions before any conditional write is attempted.

use super::ValidationError;

/// Status enum with a fixed transition table.
///
/// Implementors list their edges once; `transition_to` and `is_terminal`
/// are derived from that table. Storage adapters encode the same edges in
/// their conditional UPDATEs.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    fn can_transition_to(&self, target: &Self) -> bool;

    fn valid_transitions(&self) -> Vec<Self>;

    /// The target state, or `InvalidFormat` naming both ends of the edge.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// No outgoing edges.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

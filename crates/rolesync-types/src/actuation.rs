//! Results reported by the chat-platform actuator.

use serde::{Deserialize, Serialize};

/// Whether the actuator can grant a privilege within a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feasibility {
    /// The tenant (community) could be reached.
    pub reachable: bool,
    /// The actuator's highest privilege ranks strictly above the target.
    pub rank_ok: bool,
}

impl Feasibility {
    pub const FEASIBLE: Feasibility = Feasibility {
        reachable: true,
        rank_ok: true,
    };

    pub fn is_feasible(&self) -> bool {
        self.reachable && self.rank_ok
    }
}

/// Outcome of a single grant or revoke call.
///
/// The actuator never raises; a failed call is reported here so the caller
/// can skip the principal and continue the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActuationOutcome {
    Applied,
    Failed { reason: String },
}

impl ActuationOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feasibility_requires_both() {
        assert!(Feasibility::FEASIBLE.is_feasible());
        assert!(!Feasibility {
            reachable: true,
            rank_ok: false
        }
        .is_feasible());
        assert!(!Feasibility {
            reachable: false,
            rank_ok: true
        }
        .is_feasible());
    }
}

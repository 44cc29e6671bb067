//! Autonomy levels: how much the agent may do without asking.

use serde::{Deserialize, Serialize};

use crate::tool::ToolEffect;

/// How much freedom the agent has to act.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Can only read, never write or execute
    ReadOnly,
    /// Must ask permission for destructive actions (default)
    #[default]
    Supervised,
    /// Full autonomy, execute everything
    Full,
}

/// Verdict for one tool call under an autonomy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allowed,
    NeedsConfirmation,
    Denied,
}

impl AutonomyLevel {
    pub fn permission(self, effect: ToolEffect) -> Permission {
        match (self, effect) {
            (_, ToolEffect::ReadOnly | ToolEffect::Internal) => Permission::Allowed,
            (Self::ReadOnly, _) => Permission::Denied,
            (Self::Supervised, ToolEffect::Destructive) => Permission::NeedsConfirmation,
            (Self::Supervised, ToolEffect::Mutating) | (Self::Full, _) => Permission::Allowed,
        }
    }
}

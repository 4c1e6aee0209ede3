use serde::{Deserialize, Serialize};

use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableCause {
    /// Administrator switched protection off.
    Manual,
    /// The configured protection deadline passed.
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent {
    Disable,
    /// A block with this timestamp was opened.
    Clock { timestamp: u64 },
}

/// Active -> Disabled, never back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionLifecycle {
    state: LifecycleState,
    cause: Option<DisableCause>,
    protected_until: Option<u64>,
}

impl ProtectionLifecycle {
    pub fn new(protected_until: Option<u64>) -> Self {
        Self {
            state: LifecycleState::Active,
            cause: None,
            protected_until,
        }
    }

    /// Rebuild a lifecycle from persisted state.
    pub fn restore(state: LifecycleState, cause: Option<DisableCause>, protected_until: Option<u64>) -> Self {
        Self {
            state,
            cause: if state == LifecycleState::Disabled { cause } else { None },
            protected_until,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn cause(&self) -> Option<DisableCause> {
        self.cause
    }

    /// Returns the cause when this event performed the transition.
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<Option<DisableCause>, GuardError> {
        match (self.state, event) {
            (LifecycleState::Active, LifecycleEvent::Disable) => {
                self.state = LifecycleState::Disabled;
                self.cause = Some(DisableCause::Manual);
                Ok(self.cause)
            }
            (LifecycleState::Active, LifecycleEvent::Clock { timestamp }) => match self.protected_until {
                Some(until) if timestamp >= until => {
                    self.state = LifecycleState::Disabled;
                    self.cause = Some(DisableCause::Expired);
                    Ok(self.cause)
                }
                _ => Ok(None),
            },
            (LifecycleState::Disabled, LifecycleEvent::Disable) => Err(GuardError::ProtectionDisabled),
            (LifecycleState::Disabled, LifecycleEvent::Clock { .. }) => Ok(None),
        }
    }

    /// Gate for registry admin operations.
    pub fn ensure_active(&self) -> Result<(), GuardError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(GuardError::ProtectionDisabled)
        }
    }
}

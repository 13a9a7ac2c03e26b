use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::{Error, Result};

/// Lifecycle of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationState {
    /// Created, no I/O yet
    Idle,
    /// Querying on its poll schedule
    Active,
    /// Paused; history kept so it can resume
    Snoozed,
    /// Finished for good
    Stopped,
}

/// What `enable` should do from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// First start: history must be cleared
    Fresh,
    /// Resuming from a snooze: history is kept
    Resume,
    /// Already running
    Unchanged,
}

impl AssociationState {
    /// Transition taken by `enable`
    pub fn activate(self) -> Result<(Self, Activation)> {
        match self {
            AssociationState::Idle => Ok((AssociationState::Active, Activation::Fresh)),
            AssociationState::Snoozed => Ok((AssociationState::Active, Activation::Resume)),
            AssociationState::Active => Ok((AssociationState::Active, Activation::Unchanged)),
            AssociationState::Stopped => {
                Err(Error::invalid_state("association has been finished"))
            }
        }
    }

    /// Transition taken by `snooze`; only an active association pauses
    pub fn snooze(self) -> Self {
        match self {
            AssociationState::Active => AssociationState::Snoozed,
            other => other,
        }
    }

    /// Whether queries should be scheduled
    pub fn is_active(&self) -> bool {
        matches!(self, AssociationState::Active)
    }

    /// Whether the association can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssociationState::Stopped)
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationState::Idle => "idle",
            AssociationState::Active => "active",
            AssociationState::Snoozed => "snoozed",
            AssociationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation() {
        assert_eq!(
            AssociationState::Idle.activate().unwrap(),
            (AssociationState::Active, Activation::Fresh)
        );
        assert_eq!(
            AssociationState::Snoozed.activate().unwrap(),
            (AssociationState::Active, Activation::Resume)
        );
        assert_eq!(
            AssociationState::Active.activate().unwrap(),
            (AssociationState::Active, Activation::Unchanged)
        );
        assert!(matches!(
            AssociationState::Stopped.activate(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_snooze_only_pauses_active() {
        assert_eq!(AssociationState::Active.snooze(), AssociationState::Snoozed);
        assert_eq!(AssociationState::Idle.snooze(), AssociationState::Idle);
        assert_eq!(AssociationState::Stopped.snooze(), AssociationState::Stopped);
        assert!(AssociationState::Stopped.is_terminal());
    }
}

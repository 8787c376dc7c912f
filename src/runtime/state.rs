use std::sync::{Mutex, PoisonError};

use crate::{GraphCacheError, Result};

/// `Idle -> Active -> {Terminated, Canceled}`, plus `Idle -> Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum CallState {
    Idle,
    Active,
    Terminated,
    Canceled,
}

#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<CallState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Idle),
        }
    }

    pub(crate) fn get(&self) -> CallState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.get() == CallState::Active
    }

    /// `Idle -> Active`. A canceled call reports `Canceled`; any other state is misuse.
    pub(crate) fn activate(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            CallState::Idle => {
                *state = CallState::Active;
                Ok(())
            }
            CallState::Canceled => Err(GraphCacheError::Canceled),
            CallState::Active | CallState::Terminated => Err(GraphCacheError::IllegalState("Already Executed".to_string())),
        }
    }

    /// `Active -> Terminated`. False when the call is no longer active, e.g. canceled meanwhile.
    pub(crate) fn terminate(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == CallState::Active {
            *state = CallState::Terminated;
            true
        } else {
            false
        }
    }

    /// Returns the state the call was in. Terminated calls stay terminated.
    pub(crate) fn cancel(&self) -> CallState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if matches!(previous, CallState::Idle | CallState::Active) {
            *state = CallState::Canceled;
        }
        previous
    }

    /// Guards configuration setters.
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        match self.get() {
            CallState::Idle => Ok(()),
            CallState::Canceled => Err(GraphCacheError::IllegalState("Canceled".to_string())),
            _ => Err(GraphCacheError::IllegalState("Already Executed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let cell = StateCell::new();
        assert!(cell.ensure_idle().is_ok());
        cell.activate().unwrap();
        assert!(cell.is_active());
        assert!(matches!(cell.activate(), Err(GraphCacheError::IllegalState(msg)) if msg == "Already Executed"));
        assert!(cell.terminate());
        assert!(!cell.terminate());
        assert_eq!(cell.cancel(), CallState::Terminated);
        assert_eq!(cell.get(), CallState::Terminated);
    }

    #[test]
    fn test_cancel_before_start() {
        let cell = StateCell::new();
        assert_eq!(cell.cancel(), CallState::Idle);
        assert!(matches!(cell.activate(), Err(GraphCacheError::Canceled)));
        assert!(matches!(cell.ensure_idle(), Err(GraphCacheError::IllegalState(msg)) if msg == "Canceled"));
    }

    #[test]
    fn test_cancel_while_active() {
        let cell = StateCell::new();
        cell.activate().unwrap();
        assert_eq!(cell.cancel(), CallState::Active);
        assert!(!cell.terminate());
        assert!(cell.ensure_idle().is_err());
    }
}

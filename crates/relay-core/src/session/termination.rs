//! Write-once record of why a session ended.

use std::sync::{Mutex, PoisonError};

use super::TerminationReason;
use crate::cancel::CancellationToken;
use crate::RelayError;

/// First terminal condition wins; later reports are ignored.
#[derive(Debug, Default)]
pub(crate) struct Termination {
    slot: Mutex<Option<(TerminationReason, Option<RelayError>)>>,
}

impl Termination {
    /// Record `reason` unless one is already set. Returns whether it was recorded.
    pub(crate) fn record(&self, reason: TerminationReason, error: Option<RelayError>) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some((reason, error));
        true
    }

    /// Record a stage error and stop every sibling stage.
    pub(crate) fn fail(&self, error: RelayError, token: &CancellationToken) -> bool {
        let recorded = self.record(TerminationReason::Error, Some(error));
        token.cancel();
        recorded
    }

    pub(crate) fn reason(&self) -> Option<TerminationReason> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(reason, _)| *reason)
    }

    pub(crate) fn take(&self) -> Option<(TerminationReason, Option<RelayError>)> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

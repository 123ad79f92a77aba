use thiserror::Error;

use crate::flows::states::{PipelineEvent, PipelineState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: PipelineState, event: PipelineEvent },
}

/// Tracks the lifecycle of a single request and rejects out-of-order events.
#[derive(Clone, Debug)]
pub struct PipelineTracker {
    current: PipelineState,
    history: Vec<TransitionOutcome>,
}

impl Default for PipelineTracker {
    fn default() -> Self {
        Self { current: PipelineState::Received, history: Vec::new() }
    }
}

impl PipelineTracker {
    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[TransitionOutcome] {
        &self.history
    }

    pub fn is_complete(&self) -> bool {
        self.current == PipelineState::Complete
    }

    pub fn apply(&mut self, event: PipelineEvent) -> Result<PipelineState, PipelineTransitionError> {
        let outcome = transition(self.current, event)?;
        self.current = outcome.to;
        self.history.push(outcome);
        Ok(self.current)
    }
}

pub fn transition(
    current: PipelineState,
    event: PipelineEvent,
) -> Result<TransitionOutcome, PipelineTransitionError> {
    use PipelineEvent::{
        Aborted, GuardrailApproved, GuardrailDenied, GuardrailStarted, ResponseFinalized,
        ResponseStarted,
    };
    use PipelineState::{Approved, Complete, Denied, GuardrailPending, Received, ResponsePending};

    let to = match (current, event) {
        (Received, GuardrailStarted) => GuardrailPending,
        (GuardrailPending, GuardrailApproved) => Approved,
        (GuardrailPending, GuardrailDenied) => Denied,
        (Approved, ResponseStarted) | (Denied, ResponseStarted) => ResponsePending,
        (ResponsePending, ResponseFinalized) => Complete,
        (Complete, Aborted) => {
            return Err(PipelineTransitionError::InvalidTransition { state: current, event });
        }
        (_, Aborted) => Complete,
        _ => {
            return Err(PipelineTransitionError::InvalidTransition { state: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event })
}

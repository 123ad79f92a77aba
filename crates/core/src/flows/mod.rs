pub mod engine;
pub mod states;

pub use engine::{PipelineTracker, PipelineTransitionError};
pub use states::{PipelineEvent, PipelineState, TransitionOutcome};

mod change;
mod error_context;
mod intent;
mod metrics;
mod request;
mod result;

pub use change::{changed_lines, ChangeRecord, ImpactTier, LineRange};
pub use error_context::{
    ErrorContext, ErrorKind, PatchSuggestion, Session, SessionStatus,
};
pub use intent::{categorize, select_intent, TransformationIntent};
pub use metrics::{MetricsSnapshot, SmellKind, SmellRecord};
pub use request::{
    InputError, TransformationRequest, ALLOW_SIGNATURE_CHANGES, DEFAULT_MAX_ITERATIONS,
};
pub use result::{
    FailureReason, IterationOutcome, IterationRecord, TransformationResult, TransformationStatus,
};

use crate::{EvalInput, EvalResult};
use std::time::Instant;

/// Something that can run one evaluation to completion.
///
/// Implementations block the calling thread; async callers go through
/// `pyeval_sandbox::TimeoutRace`, which moves the call onto the blocking
/// pool and bounds the wait.
pub trait Evaluate: Send + Sync {
    fn evaluate(&self, input: &EvalInput, deadline: Instant) -> EvalResult;
}

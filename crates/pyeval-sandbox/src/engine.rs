//! Engine contract consumed by the evaluator
//!
//! Instantiation runs the guest program to completion (or until the
//! engine's own deadline fires) as a side effect of creating the
//! instance. Closing releases the instance and reports how the guest
//! exited.

use crate::config::SandboxConfig;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstantiateError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("failed to instantiate module: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("module exited with code {0}")]
    Exit(i32),

    #[error("failed to close module: {0}")]
    Failed(String),
}

/// Creates sandbox instances from one shared program image
pub trait SandboxEngine: Send + Sync {
    type Instance: SandboxInstance;

    /// Instantiate and run the guest with `config`, giving up at `deadline`.
    fn instantiate(
        &self,
        config: SandboxConfig,
        deadline: Instant,
    ) -> Result<Self::Instance, InstantiateError>;
}

/// A live sandbox, owned by the request that created it
pub trait SandboxInstance {
    /// Release the instance. `Ok` means the guest exited with status 0.
    fn close(self) -> Result<(), CloseError>;
}

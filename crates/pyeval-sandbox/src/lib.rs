//! py-eval sandbox - WebAssembly evaluation pipeline
//!
//! Every evaluation runs in a fresh wasmtime store created from one
//! precompiled image. The guest sees only its stdin (the request), its
//! stdout (the answer), an optional read-only stdlib mount and a bounded
//! linear memory. Runaway guests are stopped by epoch interruption.

pub mod config;
pub mod engine;
pub mod instance_id;
pub mod orchestrator;
pub mod race;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use config::{Mount, OutputCapture, SandboxConfig, SandboxTemplate, WASM_PAGES_PER_MIB};
pub use engine::{CloseError, InstantiateError, SandboxEngine, SandboxInstance};
pub use instance_id::{IdError, InstanceId, InstanceIdSource, UuidV7Source};
pub use orchestrator::{validate_output, Evaluator};
pub use race::TimeoutRace;
pub use runtime::{CompiledImage, RuntimeOptions, SandboxRuntime, WasmInstance};

/// Errors from setting up the sandbox runtime
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to initialise wasm engine: {0}")]
    EngineInit(String),

    #[error("Failed to compile WASM module: {0}")]
    CompilationFailed(String),

    #[error("Failed to read WASM file from {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SandboxError>;

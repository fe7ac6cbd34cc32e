//! py-eval core - requests, results and the error taxonomy
//!
//! Shared by the sandbox (which produces results) and the MCP front end
//! (which ships them to callers and decodes them on the client side).

pub mod dto;
pub mod error;
pub mod evaluate;
pub mod input;

pub use dto::{ErrorDto, EvalResultDto};
pub use error::{ErrorKind, EvalError};
pub use evaluate::Evaluate;
pub use input::{EvalInput, EvalOutput, EvalResult};

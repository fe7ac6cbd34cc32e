//! Evaluation request and output types

use crate::EvalError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output of a successful guest run. Always a JSON object.
pub type EvalOutput = Map<String, Value>;

/// Outcome of one evaluation
pub type EvalResult = std::result::Result<EvalOutput, EvalError>;

/// Code to run plus the context it runs against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalInput {
    /// Source code handed to the guest interpreter
    pub code: String,
    /// Arbitrary JSON values exposed to the code
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl EvalInput {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Serialize to the single JSON document written to the guest's stdin
    pub fn to_json(&self) -> Result<Vec<u8>, EvalError> {
        serde_json::to_vec(self)
            .map_err(|e| EvalError::Input(format!("failed to marshal input to JSON: {}", e)))
    }
}

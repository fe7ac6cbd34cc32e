//! Wire shape of an evaluation result
//!
//! `{"result": {...} | null, "error": {"code": int, "message": string} | null}`

use crate::{EvalError, EvalOutput, EvalResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDto {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalResultDto {
    pub result: Option<EvalOutput>,
    pub error: Option<ErrorDto>,
}

impl EvalResultDto {
    /// Decode a result document.
    ///
    /// Fails on malformed JSON and when `result` is neither an object nor null.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// A non-null `error` wins over whatever `result` holds.
    pub fn into_result(self) -> EvalResult {
        if let Some(error) = self.error {
            return Err(EvalError::Runtime(error.message));
        }
        self.result.ok_or_else(|| {
            EvalError::OutputFormat("response carried neither a result nor an error".to_string())
        })
    }
}

impl From<EvalResult> for EvalResultDto {
    fn from(result: EvalResult) -> Self {
        match result {
            Ok(output) => Self {
                result: Some(output),
                error: None,
            },
            Err(e) => Self {
                result: None,
                error: Some(ErrorDto {
                    code: e.kind().code(),
                    message: e.client_message(),
                }),
            },
        }
    }
}

//! Evaluation error taxonomy
//!
//! Every failure of a single evaluation lands in exactly one of these
//! variants. Setup-class errors are reported to callers with a fixed
//! generic message; guest-behaviour errors are reported verbatim so the
//! author of the code can act on them.

/// Discriminant of [`EvalError`], stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Input,
    Instantiate,
    Timeout,
    Execution,
    OutputFormat,
    Close,
    Runtime,
    Internal,
}

impl ErrorKind {
    /// Wire code carried in `ErrorDto::code`
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Configuration => 1,
            ErrorKind::Input => 2,
            ErrorKind::Instantiate => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::Execution => 5,
            ErrorKind::OutputFormat => 6,
            ErrorKind::Close => 7,
            ErrorKind::Runtime => 8,
            ErrorKind::Internal => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Input => "input",
            ErrorKind::Instantiate => "instantiate",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
            ErrorKind::OutputFormat => "output_format",
            ErrorKind::Close => "close",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from one evaluation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("internal error: unable to configure engine: {0}")]
    Configuration(String),

    #[error("input error: invalid json: {0}")]
    Input(String),

    #[error("internal error: invalid evaluation engine: {0}")]
    Instantiate(String),

    #[error("evaluation deadline exceeded")]
    Timeout,

    #[error("python execution error: script exited with code {exit_code}")]
    Execution { exit_code: i32 },

    #[error("output error: invalid json: {0}")]
    OutputFormat(String),

    #[error("error closing wasm module: {0}")]
    Close(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::Configuration(_) => ErrorKind::Configuration,
            EvalError::Input(_) => ErrorKind::Input,
            EvalError::Instantiate(_) => ErrorKind::Instantiate,
            EvalError::Timeout => ErrorKind::Timeout,
            EvalError::Execution { .. } => ErrorKind::Execution,
            EvalError::OutputFormat(_) => ErrorKind::OutputFormat,
            EvalError::Close(_) => ErrorKind::Close,
            EvalError::Runtime(_) => ErrorKind::Runtime,
            EvalError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand to the caller.
    ///
    /// Internal detail (engine causes, id generation failures) never
    /// leaves the process; only errors caused by the submitted code are
    /// passed through in full.
    pub fn client_message(&self) -> String {
        match self {
            EvalError::Configuration(_) => "Engine configuration error".to_string(),
            EvalError::Input(_) => "Invalid code or context input format".to_string(),
            EvalError::Instantiate(_) => "Engine instantiation failed".to_string(),
            EvalError::Timeout => "Python evaluation timed out".to_string(),
            EvalError::Execution { .. } | EvalError::OutputFormat(_) | EvalError::Runtime(_) => {
                self.to_string()
            }
            EvalError::Close(_) | EvalError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

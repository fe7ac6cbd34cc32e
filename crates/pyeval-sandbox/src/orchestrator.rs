//! One evaluation, end to end
//!
//! Building -> Instantiating -> Closing -> Validating -> done. Each step
//! either moves forward or terminates the request with a classified
//! error; the instance is always closed before the outcome is returned.

use crate::config::{OutputCapture, SandboxTemplate};
use crate::engine::{CloseError, InstantiateError, SandboxEngine, SandboxInstance};
use crate::instance_id::{InstanceIdSource, UuidV7Source};
use pyeval_core::{EvalError, EvalInput, EvalResult, Evaluate};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, warn};

/// Runs evaluations against one shared engine image
pub struct Evaluator<E> {
    engine: E,
    template: SandboxTemplate,
    ids: Arc<dyn InstanceIdSource>,
}

impl<E: SandboxEngine> Evaluator<E> {
    pub fn new(engine: E, template: SandboxTemplate) -> Self {
        Self {
            engine,
            template,
            ids: Arc::new(UuidV7Source),
        }
    }

    pub fn with_id_source(mut self, ids: Arc<dyn InstanceIdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn template(&self) -> &SandboxTemplate {
        &self.template
    }
}

impl<E: SandboxEngine> Evaluate for Evaluator<E> {
    fn evaluate(&self, input: &EvalInput, deadline: Instant) -> EvalResult {
        let id = self.ids.next_id().map_err(|e| {
            warn!(error = %e, "Failed to generate id for WASM instance");
            EvalError::Configuration(e.to_string())
        })?;

        let stdin = input.to_json().map_err(|e| {
            warn!(error = %e, "Failed to serialize input to JSON");
            e
        })?;

        let stdout = OutputCapture::new();
        let config = self.template.build(id, stdin, stdout.clone());

        let span = debug_span!("sandbox", instance = %config.instance_name);
        let _guard = span.enter();

        debug!("instantiating");
        let instance = self
            .engine
            .instantiate(config, deadline)
            .map_err(|e| match e {
                InstantiateError::DeadlineExceeded => EvalError::Timeout,
                InstantiateError::Failed(cause) => EvalError::Instantiate(cause),
            })?;

        debug!("closing");
        instance.close().map_err(|e| match e {
            CloseError::DeadlineExceeded => EvalError::Timeout,
            CloseError::Exit(exit_code) => EvalError::Execution { exit_code },
            CloseError::Failed(cause) => EvalError::Close(cause),
        })?;

        debug!("validating output");
        validate_output(&stdout.contents())
    }
}

/// Accept exactly one JSON object, surrounded by optional whitespace
pub fn validate_output(raw: &[u8]) -> EvalResult {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Err(EvalError::OutputFormat(
            "script produced no output, but a JSON object was expected".to_string(),
        ));
    }

    let value: Value = serde_json::from_slice(trimmed).map_err(|_| {
        EvalError::OutputFormat(format!(
            "script output was not valid JSON. Raw output: {}",
            String::from_utf8_lossy(trimmed)
        ))
    })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(EvalError::OutputFormat(format!(
            "script output was valid JSON but not an object. Raw output: {}",
            String::from_utf8_lossy(trimmed)
        ))),
    }
}

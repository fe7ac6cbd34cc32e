//! Scripted engine for exercising the pipeline without a guest image

use crate::config::SandboxConfig;
use crate::engine::{CloseError, InstantiateError, SandboxEngine, SandboxInstance};
use pyeval_core::EvalInput;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Guest that copies stdin (up to 4 KiB) to stdout
pub const ECHO_WAT: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_read"
            (func $fd_read (param i32 i32 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 64))
            (i32.store (i32.const 4) (i32.const 4096))
            (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
            (i32.store (i32.const 16) (i32.const 64))
            (i32.store (i32.const 20) (i32.load (i32.const 8)))
            (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 24)))))
"#;

#[derive(Debug, Clone)]
pub enum Script {
    /// Write the text to stdout and exit 0
    Write(&'static str),
    /// Exit with the code, writing nothing
    Exit(i32),
    /// Answer `{"code": <request code>, "name": <instance name>}`
    Echo,
    /// Ignore the deadline, sleep, then write `{}`
    Sleep(Duration),
    InstantiateFail,
    InstantiateDeadline,
    CloseDeadline,
    CloseFail,
}

pub struct ScriptedEngine {
    script: Script,
    instantiated: AtomicUsize,
    closed: Arc<AtomicUsize>,
    names: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            instantiated: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            names: Mutex::new(Vec::new()),
        }
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

pub struct ScriptedInstance {
    outcome: Result<(), CloseError>,
    closed: Arc<AtomicUsize>,
}

impl SandboxInstance for ScriptedInstance {
    fn close(self) -> Result<(), CloseError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }
}

impl SandboxEngine for Arc<ScriptedEngine> {
    type Instance = ScriptedInstance;

    fn instantiate(
        &self,
        config: SandboxConfig,
        _deadline: Instant,
    ) -> Result<ScriptedInstance, InstantiateError> {
        self.instantiated.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(config.instance_name.clone());

        let outcome = match &self.script {
            Script::Write(text) => {
                config.stdout.extend(text.as_bytes());
                Ok(())
            }
            Script::Exit(code) => Err(CloseError::Exit(*code)),
            Script::Echo => {
                let input: EvalInput = serde_json::from_slice(&config.stdin).unwrap();
                let answer = serde_json::json!({
                    "code": input.code,
                    "name": config.instance_name,
                });
                config.stdout.extend(answer.to_string().as_bytes());
                Ok(())
            }
            Script::Sleep(duration) => {
                std::thread::sleep(*duration);
                config.stdout.extend(b"{}");
                Ok(())
            }
            Script::InstantiateFail => {
                return Err(InstantiateError::Failed("unknown import: env::nope".to_string()))
            }
            Script::InstantiateDeadline => return Err(InstantiateError::DeadlineExceeded),
            Script::CloseDeadline => Err(CloseError::DeadlineExceeded),
            Script::CloseFail => Err(CloseError::Failed("store already released".to_string())),
        };

        Ok(ScriptedInstance {
            outcome,
            closed: Arc::clone(&self.closed),
        })
    }
}

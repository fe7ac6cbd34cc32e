//! Per-request sandbox configuration
//!
//! A [`SandboxTemplate`] is resolved once at startup from the command line.
//! Every request stamps out a fresh [`SandboxConfig`] from it with a new
//! instance name and its own stdio buffers.

use crate::instance_id::InstanceId;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Size of one WebAssembly linear memory page
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Pages per MiB of guest memory
pub const WASM_PAGES_PER_MIB: u32 = (1024 * 1024 / WASM_PAGE_SIZE) as u32;

/// Default cap on captured guest stdout
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Environment variable pointing the interpreter at the mounted stdlib
pub const MODULE_SEARCH_VAR: &str = "PYTHONPATH";

/// Where the stdlib mount appears inside the guest
pub const GUEST_ROOT: &str = "/";

/// Driver executed by the guest interpreter when a stdlib is mounted.
/// Reads one `EvalInput` from stdin and prints `result` as JSON, unchanged;
/// the host rejects anything that is not an object.
pub const DRIVER_SCRIPT: &str = include_str!("driver.py");

/// Host directory exposed to the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub guest_path: String,
    pub read_only: bool,
}

/// Growable buffer the guest's stdout is drained into.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture(Arc<Mutex<Vec<u8>>>);

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Everything needed to instantiate one sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub instance_name: String,
    pub stdin: Vec<u8>,
    pub stdout: OutputCapture,
    pub mount: Option<Mount>,
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
    pub memory_page_limit: u32,
    pub max_output_bytes: usize,
}

/// Settings shared by every sandbox the process creates
#[derive(Debug, Clone)]
pub struct SandboxTemplate {
    python_libs: Option<PathBuf>,
    memory_page_limit: u32,
    max_output_bytes: usize,
    driver_script: String,
}

impl SandboxTemplate {
    pub fn new(memory_page_limit: u32) -> Self {
        Self {
            python_libs: None,
            memory_page_limit,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            driver_script: DRIVER_SCRIPT.to_string(),
        }
    }

    /// Mount a Python standard library read-only at the guest root
    pub fn with_python_libs(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_libs = Some(path.into());
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_driver_script(mut self, script: impl Into<String>) -> Self {
        self.driver_script = script.into();
        self
    }

    pub fn memory_page_limit(&self) -> u32 {
        self.memory_page_limit
    }

    pub fn python_libs(&self) -> Option<&PathBuf> {
        self.python_libs.as_ref()
    }

    /// Stamp out the configuration for one instance.
    ///
    /// Without a stdlib mount the argument vector stays empty and the
    /// image's own entry point decides what runs.
    pub fn build(&self, id: InstanceId, stdin: Vec<u8>, stdout: OutputCapture) -> SandboxConfig {
        let mut config = SandboxConfig {
            instance_name: id.to_instance_name(),
            stdin,
            stdout,
            mount: None,
            env: Vec::new(),
            args: Vec::new(),
            memory_page_limit: self.memory_page_limit,
            max_output_bytes: self.max_output_bytes,
        };

        if let Some(libs) = &self.python_libs {
            config.mount = Some(Mount {
                host_path: libs.clone(),
                guest_path: GUEST_ROOT.to_string(),
                read_only: true,
            });
            config
                .env
                .push((MODULE_SEARCH_VAR.to_string(), GUEST_ROOT.to_string()));
            config.args = vec![
                "python".to_string(),
                "-c".to_string(),
                self.driver_script.clone(),
            ];
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id() -> InstanceId {
        InstanceId::from_uuid(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0001))
    }

    #[test]
    fn test_build_without_libs() {
        let template = SandboxTemplate::new(1024);
        let config = template.build(id(), b"{}".to_vec(), OutputCapture::new());

        assert_eq!(config.instance_name, format!("instance-{}", id()));
        assert_eq!(config.stdin, b"{}");
        assert!(config.mount.is_none());
        assert!(config.env.is_empty());
        assert!(config.args.is_empty());
        assert_eq!(config.memory_page_limit, 1024);
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_build_with_libs() {
        let template = SandboxTemplate::new(64)
            .with_python_libs("/opt/cpython3.14")
            .with_driver_script("print('{}')");
        let config = template.build(id(), Vec::new(), OutputCapture::new());

        assert_eq!(
            config.mount,
            Some(Mount {
                host_path: PathBuf::from("/opt/cpython3.14"),
                guest_path: "/".to_string(),
                read_only: true,
            })
        );
        assert_eq!(
            config.env,
            vec![("PYTHONPATH".to_string(), "/".to_string())]
        );
        assert_eq!(config.args, vec!["python", "-c", "print('{}')"]);
    }

    #[test]
    fn test_default_driver_is_embedded() {
        let config = SandboxTemplate::new(64)
            .with_python_libs("/libs")
            .build(id(), Vec::new(), OutputCapture::new());
        assert_eq!(config.args[2], DRIVER_SCRIPT);
        assert!(DRIVER_SCRIPT.contains("sys.stdin"));
    }

    #[test]
    fn test_driver_does_not_wrap_result() {
        assert!(DRIVER_SCRIPT.contains("json.dumps(scope.get(\"result\"))"));
        assert!(!DRIVER_SCRIPT.contains("isinstance"));
        assert!(!DRIVER_SCRIPT.contains("{\"result\": result}"));

        // what the driver prints for a non-dict or unassigned result
        for printed in ["null", "[1, 2]", "42"] {
            assert!(matches!(
                crate::orchestrator::validate_output(printed.as_bytes()),
                Err(pyeval_core::EvalError::OutputFormat(_))
            ));
        }
    }

    #[test]
    fn test_output_capture_shares_buffer() {
        let capture = OutputCapture::new();
        let handle = capture.clone();
        handle.extend(b"{\"a\":");
        handle.extend(b"1}");
        assert_eq!(capture.contents(), b"{\"a\":1}");
        assert!(!capture.is_empty());
    }

    #[test]
    fn test_pages_per_mib() {
        assert_eq!(WASM_PAGES_PER_MIB, 16);
    }
}

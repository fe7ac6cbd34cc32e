//! Command-line settings shared by the subcommands

use anyhow::{bail, Context, Result};
use clap::Args;
use pyeval_core::EvalInput;
use pyeval_sandbox::{SandboxTemplate, WASM_PAGES_PER_MIB};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// wasm32 linear memory tops out at 4 GiB
const MAX_MEMORY_PAGES: u32 = 65_536;

/// How the WASM python engine is loaded and bounded
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Path to the WASM python engine
    #[arg(long, default_value = "./python.wasm")]
    pub engine: PathBuf,

    /// Path to the Python WASI standard library, mounted read-only at /
    #[arg(long)]
    pub python_libs: Option<PathBuf>,

    /// WASM memory limit in MiB
    #[arg(long, default_value_t = 64)]
    pub mem: u32,

    /// WASM execution timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout: u64,

    /// Largest script output kept, in KiB
    #[arg(long, default_value_t = 1024)]
    pub max_output_kib: usize,
}

impl EngineArgs {
    pub fn memory_page_limit(&self) -> Result<u32> {
        if self.mem == 0 {
            bail!("--mem must be at least 1 MiB");
        }
        match self.mem.checked_mul(WASM_PAGES_PER_MIB) {
            Some(pages) if pages <= MAX_MEMORY_PAGES => Ok(pages),
            _ => bail!(
                "--mem {} MiB exceeds the {} MiB a WASM guest can address",
                self.mem,
                MAX_MEMORY_PAGES / WASM_PAGES_PER_MIB
            ),
        }
    }

    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout == 0 {
            bail!("--timeout must be greater than zero");
        }
        Ok(Duration::from_millis(self.timeout))
    }

    pub fn max_output_bytes(&self) -> Result<usize> {
        match self.max_output_kib.checked_mul(1024) {
            Some(0) => bail!("--max-output-kib must be greater than zero"),
            Some(bytes) => Ok(bytes),
            None => bail!("--max-output-kib {} is too large", self.max_output_kib),
        }
    }

    pub fn template(&self) -> Result<SandboxTemplate> {
        let mut template = SandboxTemplate::new(self.memory_page_limit()?)
            .with_max_output_bytes(self.max_output_bytes()?);
        if let Some(libs) = &self.python_libs {
            template = template.with_python_libs(libs.clone());
        }
        Ok(template)
    }
}

/// The code to evaluate and its context
#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Python source to evaluate
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub code: Option<String>,

    /// Read the Python source from a file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// JSON object exposed to the code as `context`
    #[arg(long, default_value = "{}")]
    pub context: String,
}

impl InputArgs {
    pub fn to_input(&self) -> Result<EvalInput> {
        let code = match (&self.code, &self.file) {
            (Some(code), _) => code.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => bail!("either --code or --file is required"),
        };

        let context: Map<String, Value> =
            serde_json::from_str(&self.context).context("--context must be a JSON object")?;

        Ok(EvalInput { code, context })
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 12040)]
    pub port: u16,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl ServeArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Args)]
pub struct EvalArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// MCP endpoint of a running server
    #[arg(long, default_value = "http://127.0.0.1:12040/mcp")]
    pub url: String,

    #[command(flatten)]
    pub input: InputArgs,
}

//! Sandbox runtime using Wasmtime

use crate::config::{SandboxConfig, WASM_PAGE_SIZE};
use crate::engine::{CloseError, InstantiateError, SandboxEngine, SandboxInstance};
use crate::{Result, SandboxError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::p2::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

/// Guest stderr kept for diagnostics
const STDERR_CAPACITY: usize = 64 * 1024;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Granularity of guest deadlines
    pub epoch_tick: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            epoch_tick: Duration::from_millis(10),
        }
    }
}

/// The process-wide WebAssembly runtime.
///
/// Owns the wasmtime engine and the thread that advances its epoch.
/// Call [`SandboxRuntime::shutdown`] once no more evaluations will run.
pub struct SandboxRuntime {
    engine: Engine,
    options: RuntimeOptions,
    running: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    ticker: Option<EpochTicker>,
}

impl SandboxRuntime {
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        let mut config = Config::new();
        config.epoch_interruption(true);

        let engine = Engine::new(&config).map_err(|e| SandboxError::EngineInit(e.to_string()))?;
        let running = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let ticker = EpochTicker::start(
            engine.clone(),
            options.epoch_tick,
            Arc::clone(&running),
            Arc::clone(&stopped),
        )?;

        Ok(Self {
            engine,
            options,
            running,
            stopped,
            ticker: Some(ticker),
        })
    }

    /// Validate and compile a program image (binary or text format)
    pub fn compile(&self, wasm: &[u8]) -> Result<CompiledImage> {
        let module = Module::new(&self.engine, wasm)
            .map_err(|e| SandboxError::CompilationFailed(format!("{e:#}")))?;
        Ok(CompiledImage {
            engine: self.engine.clone(),
            module,
            epoch_tick: self.options.epoch_tick,
            running: Arc::clone(&self.running),
            stopped: Arc::clone(&self.stopped),
        })
    }

    pub fn compile_file(&self, path: &Path) -> Result<CompiledImage> {
        let wasm = std::fs::read(path).map_err(|source| SandboxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = self.compile(&wasm)?;
        info!(path = %path.display(), "WASM module compiled successfully");
        Ok(image)
    }

    /// Stop the epoch ticker.
    ///
    /// Blocks until guests that are still running (including ones whose
    /// caller already gave up) have reached their deadline or finished.
    /// Images compiled by this runtime refuse to instantiate afterwards.
    pub fn shutdown(mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

impl Drop for SandboxRuntime {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl EpochTicker {
    fn start(
        engine: Engine,
        tick: Duration,
        running: Arc<AtomicUsize>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("pyeval-epoch".to_string())
            .spawn(move || {
                // keep ticking while any guest still depends on the epoch
                while !flag.load(Ordering::SeqCst) || running.load(Ordering::SeqCst) > 0 {
                    std::thread::sleep(tick);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| SandboxError::EngineInit(format!("failed to start epoch ticker: {e}")))?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            tracing::warn!("epoch ticker panicked");
        }
    }
}

/// A validated program image, shared read-only by every request
#[derive(Clone)]
pub struct CompiledImage {
    engine: Engine,
    module: Module,
    epoch_tick: Duration,
    running: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

/// Counts a guest as running for as long as it is alive
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    /// Registers before checking the stop flag, so either the ticker sees
    /// this guest or this guest sees the ticker has stopped.
    fn enter(counter: &Arc<AtomicUsize>, stopped: &AtomicBool) -> Option<Self> {
        counter.fetch_add(1, Ordering::SeqCst);
        let guard = Self(Arc::clone(counter));
        if stopped.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GuestState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// A guest that has run to completion; holds its store until closed
pub struct WasmInstance {
    name: String,
    exit_code: i32,
    store: Store<GuestState>,
}

impl WasmInstance {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SandboxInstance for WasmInstance {
    fn close(self) -> std::result::Result<(), CloseError> {
        let WasmInstance {
            name,
            exit_code,
            store,
        } = self;
        drop(store);
        debug!(instance = %name, exit_code, "closed sandbox instance");
        match exit_code {
            0 => Ok(()),
            code => Err(CloseError::Exit(code)),
        }
    }
}

impl SandboxEngine for CompiledImage {
    type Instance = WasmInstance;

    fn instantiate(
        &self,
        config: SandboxConfig,
        deadline: Instant,
    ) -> std::result::Result<WasmInstance, InstantiateError> {
        let Some(_running) = RunningGuard::enter(&self.running, &self.stopped) else {
            return Err(InstantiateError::Failed(
                "sandbox runtime has been shut down".to_string(),
            ));
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(InstantiateError::DeadlineExceeded);
        }

        let SandboxConfig {
            instance_name,
            stdin,
            stdout,
            mount,
            env,
            args,
            memory_page_limit,
            max_output_bytes,
        } = config;

        let stdout_pipe = MemoryOutputPipe::new(max_output_bytes);
        let stderr_pipe = MemoryOutputPipe::new(STDERR_CAPACITY);

        let mut wasi_builder = WasiCtxBuilder::new();
        wasi_builder
            .stdin(MemoryInputPipe::new(stdin))
            .stdout(stdout_pipe.clone())
            .stderr(stderr_pipe.clone())
            .args(args.as_slice());
        for (key, value) in &env {
            wasi_builder.env(key, value);
        }
        if let Some(mount) = &mount {
            let (dir_perms, file_perms) = if mount.read_only {
                (DirPerms::READ, FilePerms::READ)
            } else {
                (DirPerms::all(), FilePerms::all())
            };
            wasi_builder
                .preopened_dir(&mount.host_path, &mount.guest_path, dir_perms, file_perms)
                .map_err(|e| {
                    InstantiateError::Failed(format!(
                        "failed to mount {} at {}: {e}",
                        mount.host_path.display(),
                        mount.guest_path
                    ))
                })?;
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(memory_page_limit as usize * WASM_PAGE_SIZE)
            .build();
        let mut store = Store::new(
            &self.engine,
            GuestState {
                wasi: wasi_builder.build_p1(),
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(epoch_ticks(remaining, self.epoch_tick));
        store.epoch_deadline_trap();

        let outcome = run_start(&self.engine, &self.module, &mut store);

        stdout.extend(&stdout_pipe.contents());
        let stderr = stderr_pipe.contents();
        if !stderr.is_empty() {
            debug!(
                instance = %instance_name,
                stderr = %String::from_utf8_lossy(&stderr),
                "guest stderr"
            );
        }

        let exit_code = outcome?;
        Ok(WasmInstance {
            name: instance_name,
            exit_code,
            store,
        })
    }
}

/// Link WASI, instantiate and run `_start`, returning the guest's exit code
fn run_start(
    engine: &Engine,
    module: &Module,
    store: &mut Store<GuestState>,
) -> std::result::Result<i32, InstantiateError> {
    let mut linker: Linker<GuestState> = Linker::new(engine);
    wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
        .map_err(|e| InstantiateError::Failed(format!("failed to link WASI: {e}")))?;

    let instance = linker
        .instantiate(&mut *store, module)
        .map_err(classify_trap)?;

    let start_fn = instance
        .get_typed_func::<(), ()>(&mut *store, "_start")
        .map_err(|e| InstantiateError::Failed(format!("no _start entry point: {e}")))?;

    match start_fn.call(&mut *store, ()) {
        Ok(()) => Ok(0),
        Err(e) => match e.downcast_ref::<I32Exit>() {
            Some(exit) => Ok(exit.0),
            None => Err(classify_trap(e)),
        },
    }
}

fn classify_trap(e: wasmtime::Error) -> InstantiateError {
    if matches!(e.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
        InstantiateError::DeadlineExceeded
    } else {
        InstantiateError::Failed(format!("{e:#}"))
    }
}

/// Whole epoch ticks covering `remaining`, at least one
fn epoch_ticks(remaining: Duration, tick: Duration) -> u64 {
    let tick = tick.as_nanos().max(1);
    let ticks = remaining.as_nanos().div_ceil(tick).max(1);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

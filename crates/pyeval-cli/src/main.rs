//! py-eval - sandboxed Python evaluation over MCP
//!
//! Usage:
//!   py-eval serve   - Run the HTTP MCP server
//!   py-eval eval    - Evaluate one snippet locally and print the result
//!   py-eval call    - Send one snippet to a running server

mod client;
mod mcp;
mod server;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pyeval_core::EvalResultDto;
use pyeval_sandbox::{Evaluator, RuntimeOptions, SandboxRuntime, TimeoutRace};
use settings::{CallArgs, EngineArgs, EvalArgs, ServeArgs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "py-eval")]
#[command(version)]
#[command(about = "Evaluate Python in a WebAssembly sandbox, served over MCP", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP MCP server
    Serve(ServeArgs),

    /// Evaluate one snippet locally and print the result
    Eval(EvalArgs),

    /// Send one snippet to a running server
    Call(CallArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Eval(args) => eval(args).await,
        Commands::Call(args) => call(args).await,
    }
}

/// Compile the engine image and wrap it in an evaluator with a deadline
fn build_race(args: &EngineArgs) -> Result<(SandboxRuntime, TimeoutRace)> {
    let template = args.template()?;
    let timeout = args.timeout()?;

    let runtime = SandboxRuntime::new(RuntimeOptions::default()).context("failed to create WASI runtime")?;
    let image = runtime
        .compile_file(&args.engine)
        .context("failed to create WASI evaluator")?;

    if let Some(libs) = template.python_libs() {
        info!(path = %libs.display(), "Mounting Python libraries at / in WASM");
    }
    info!(
        memory_pages = template.memory_page_limit(),
        timeout_ms = timeout.as_millis() as u64,
        "evaluator ready"
    );

    let evaluator = Evaluator::new(image, template);
    Ok((runtime, TimeoutRace::new(Arc::new(evaluator), timeout)))
}

/// Stop the epoch ticker off the async workers; it waits for stray guests
async fn shutdown_runtime(runtime: SandboxRuntime) -> Result<()> {
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("runtime shutdown panicked")
}

async fn serve(args: ServeArgs) -> Result<()> {
    let (runtime, race) = build_race(&args.engine)?;
    let service = Arc::new(mcp::McpService::new(race));

    let addr = args.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    server::serve(listener, service, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("server stopped, shutting down runtime");
    shutdown_runtime(runtime).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn eval(args: EvalArgs) -> Result<()> {
    let input = args.input.to_input()?;
    let (runtime, race) = build_race(&args.engine)?;

    let dto = EvalResultDto::from(race.evaluate(input).await);
    println!("{}", serde_json::to_string_pretty(&dto)?);

    drop(race);
    shutdown_runtime(runtime).await
}

async fn call(args: CallArgs) -> Result<()> {
    let input = args.input.to_input()?;
    let client = client::McpHttpClient::new(args.url);

    match client.call_py_eval(&input).await? {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => anyhow::bail!("evaluation failed: {}", e),
    }
}

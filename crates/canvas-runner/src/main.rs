//! Dry-run host for canvas workflows
//!
//! Usage: `canvas-runner <canvas.json> [engine-config.json]`
//!
//! Runs the canvas with placeholder executors and prints the execution
//! result as JSON on stdout. Progress goes to the log (`RUST_LOG`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use canvas_engine::{
    CanvasEngineError, CanvasState, ChannelEventSink, EngineConfig, ExecutionEngine,
    ExecutorRegistry, WorkflowEvent,
};

struct Args {
    canvas: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args_os().skip(1);
    let canvas = PathBuf::from(args.next()?);
    let config = args.next().map(PathBuf::from);
    Some(Args { canvas, config })
}

fn load_canvas(path: &Path) -> Result<CanvasState, CanvasEngineError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

async fn run(args: Args) -> Result<(), CanvasEngineError> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let canvas = load_canvas(&args.canvas)?;
    log::info!(
        "Loaded canvas {:?}: {} blocks, {} connections",
        args.canvas,
        canvas.blocks.len(),
        canvas.connections.len()
    );

    let (sink, mut events) = ChannelEventSink::channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                WorkflowEvent::BlockRetrying {
                    block_id,
                    attempt,
                    delay_ms,
                    ..
                } => log::info!("{} retry {} in {}ms", block_id, attempt, delay_ms),
                other => log::debug!("{:?}", other),
            }
        }
    });

    let engine = ExecutionEngine::new(Arc::new(ExecutorRegistry::dry_run()))
        .with_config(config)
        .with_event_sink(Arc::new(sink));
    let result = engine.execute_workflow(&canvas).await?;

    // Dropping the engine closes the event channel.
    drop(engine);
    if let Err(e) = progress.await {
        log::warn!("Event logger stopped: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let Some(args) = parse_args() else {
        eprintln!("usage: canvas-runner <canvas.json> [engine-config.json]");
        return ExitCode::from(2);
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

//! Relay RPC - drives streaming sessions over the in-process transport.
//!
//! `demo` runs a single session in one interaction mode and logs every
//! response; `bench` runs concurrent sessions at each concurrency level
//! and message size and reports throughput and latency per mode.

mod bench;
mod demo;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_core::{LifecycleConfig, SessionLifecycle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "relay-rpc")]
#[command(about = "Streaming RPC session demo and benchmark")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one session against a scripted peer
    Demo(demo::DemoArgs),
    /// Run concurrent sessions per mode, level and size and report metrics
    Bench(bench::BenchArgs),
}

impl Command {
    fn lifecycle_config(&self) -> LifecycleConfig {
        match self {
            Command::Demo(_) => LifecycleConfig::default(),
            Command::Bench(args) => {
                LifecycleConfig::default().with_max_sessions(args.max_sessions())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let lifecycle = SessionLifecycle::init(args.command.lifecycle_config())?;

    let result = tokio::select! {
        result = run(args.command, &lifecycle) => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, cancelling sessions");
            Ok(())
        }
    };

    let report = lifecycle.shutdown().await;
    if report.timed_out {
        warn!("Exited with sessions still running");
    } else if report.cancelled > 0 {
        info!("Cancelled {} session(s)", report.cancelled);
    }

    result
}

async fn run(command: Command, lifecycle: &SessionLifecycle) -> Result<()> {
    match command {
        Command::Demo(args) => demo::run(args, lifecycle).await,
        Command::Bench(args) => bench::run(args, lifecycle).await,
    }
}

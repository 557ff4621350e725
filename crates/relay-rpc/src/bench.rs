//! Concurrent-session benchmark.
//!
//! For every concurrency level and message size, runs that many sessions at
//! once in each selected interaction mode, every one against its own
//! scripted peer, and reports latency and throughput. Latency is the
//! duration of a whole call as seen by the peer.

use anyhow::{Context, Result};
use clap::Args;
use futures::future::join_all;
use relay_core::{
    duplex, Message, Mode, PeerTranscript, RelayConfig, ScriptedPeer, SessionConfig,
    SessionCoordinator, SessionLifecycle, SessionOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::demo::{script, DemoMode};

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Concurrency levels to run, e.g. `1,5,10`
    #[arg(short, long, value_delimiter = ',', num_args = 1.., default_value = "1,5,10")]
    pub sessions: Vec<usize>,

    /// Payload sizes in bytes; each message is padded by this many bytes
    #[arg(long, value_delimiter = ',', num_args = 1.., default_value = "1024")]
    pub message_size: Vec<usize>,

    /// Benchmark only this mode (default: every mode)
    #[arg(long, value_enum)]
    pub mode: Option<DemoMode>,

    /// Messages each peer sends (fan-out sends one request)
    #[arg(short, long, default_value = "20")]
    pub messages: usize,

    /// Fan-out pacing and pipeline processing delay, in milliseconds
    #[arg(long, default_value = "10")]
    pub delay_ms: u64,

    /// Write results as JSON to this file
    #[arg(long)]
    pub json: Option<PathBuf>,
}

impl BenchArgs {
    /// Largest concurrency level; the lifecycle must admit this many sessions.
    pub fn max_sessions(&self) -> usize {
        self.sessions.iter().copied().max().unwrap_or(1).max(1)
    }

    fn modes(&self) -> Vec<Mode> {
        let delay = Duration::from_millis(self.delay_ms);
        let all = [
            DemoMode::Collect,
            DemoMode::FanOut,
            DemoMode::LockStep,
            DemoMode::Pipeline,
        ];
        all.into_iter()
            .filter(|m| self.mode.map_or(true, |only| only == *m))
            .map(|m| match m {
                DemoMode::Collect => Mode::CollectThenRespond,
                DemoMode::FanOut => Mode::FanOut {
                    count: RelayConfig::DEFAULT_FAN_OUT_COUNT,
                    interval: delay,
                },
                DemoMode::LockStep => Mode::LockStep,
                DemoMode::Pipeline => Mode::DecoupledPipeline {
                    queue_capacity: RelayConfig::DEFAULT_QUEUE_CAPACITY,
                    processing_delay: delay,
                    dedicated_processor: false,
                },
            })
            .collect()
    }
}

/// A peer script with every payload padded by `message_size` bytes.
fn padded_script(mode: Mode, client: usize, messages: usize, message_size: usize) -> Vec<Message> {
    let base = script(mode, client, messages);
    if message_size == 0 {
        return base;
    }
    let padding = "x".repeat(message_size);
    base.into_iter()
        .map(|m| Message::new(format!("{}: {}", m.payload(), padding)))
        .collect()
}

/// Metrics for one mode at one concurrency level and message size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub mode: String,
    pub sessions: usize,
    pub message_size: usize,
    pub total_requests: usize,
    pub total_responses: usize,
    pub duration_ms: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub requests_per_second: f64,
    pub responses_per_second: f64,
    pub errors: usize,
    pub success_rate: f64,
}

/// What one session contributed.
#[derive(Debug, Clone)]
struct SessionSample {
    requests: usize,
    responses: usize,
    latency: Duration,
    failed: bool,
}

impl SessionSample {
    fn new(transcript: &PeerTranscript, outcome: &relay_core::Result<SessionOutcome>) -> Self {
        let failed = match outcome {
            Ok(outcome) => !outcome.is_success(),
            Err(_) => true,
        };
        Self {
            requests: transcript.sent,
            responses: transcript.responses.len(),
            latency: transcript.elapsed,
            failed: failed || transcript.send_error.is_some(),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn per_second(count: usize, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

impl BenchmarkResult {
    fn from_samples(
        mode: &str,
        message_size: usize,
        samples: &[SessionSample],
        duration: Duration,
    ) -> Self {
        let mut latencies: Vec<f64> = samples.iter().map(|s| millis(s.latency)).collect();
        latencies.sort_by(f64::total_cmp);

        let total_requests = samples.iter().map(|s| s.requests).sum();
        let total_responses = samples.iter().map(|s| s.responses).sum();
        let errors = samples.iter().filter(|s| s.failed).count();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let success_rate = if samples.is_empty() {
            0.0
        } else {
            (samples.len() - errors) as f64 / samples.len() as f64 * 100.0
        };

        Self {
            mode: mode.to_string(),
            sessions: samples.len(),
            message_size,
            total_requests,
            total_responses,
            duration_ms: millis(duration),
            avg_latency_ms,
            min_latency_ms: latencies.first().copied().unwrap_or(0.0),
            max_latency_ms: latencies.last().copied().unwrap_or(0.0),
            p95_latency_ms: percentile(&latencies, 95.0),
            requests_per_second: per_second(total_requests, duration),
            responses_per_second: per_second(total_responses, duration),
            errors,
            success_rate,
        }
    }
}

async fn run_mode(
    args: &BenchArgs,
    mode: Mode,
    sessions: usize,
    message_size: usize,
    lifecycle: &SessionLifecycle,
) -> Result<BenchmarkResult> {
    let coordinator = SessionCoordinator::new(SessionConfig::new(mode))?;
    info!(
        "Benchmarking {} with {} sessions, {} bytes/msg",
        mode, sessions, message_size
    );

    let started = Instant::now();
    let mut runs = Vec::with_capacity(sessions);
    for client in 0..sessions {
        let (source, sink, peer) = duplex(RelayConfig::DEFAULT_QUEUE_CAPACITY);
        let handle = lifecycle.start_session(&coordinator, source, sink)?;
        let peer_script =
            ScriptedPeer::new(padded_script(mode, client, args.messages, message_size));
        runs.push(async move {
            let transcript = peer_script.run(peer).await;
            let outcome = handle.join().await;
            if let Err(e) = &outcome {
                warn!("Client {} session failed: {}", client, e);
            }
            SessionSample::new(&transcript, &outcome)
        });
    }
    let samples = join_all(runs).await;

    Ok(BenchmarkResult::from_samples(
        mode.as_str(),
        message_size,
        &samples,
        started.elapsed(),
    ))
}

fn print_table(results: &[BenchmarkResult]) {
    println!(
        "{:<22} {:>8} {:>7} {:>9} {:>9} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>9}",
        "mode",
        "sessions",
        "bytes",
        "requests",
        "responses",
        "avg ms",
        "min ms",
        "max ms",
        "p95 ms",
        "resp/s",
        "errors",
        "success%"
    );
    for r in results {
        println!(
            "{:<22} {:>8} {:>7} {:>9} {:>9} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.1} {:>8} {:>9.1}",
            r.mode,
            r.sessions,
            r.message_size,
            r.total_requests,
            r.total_responses,
            r.avg_latency_ms,
            r.min_latency_ms,
            r.max_latency_ms,
            r.p95_latency_ms,
            r.responses_per_second,
            r.errors,
            r.success_rate
        );
    }
}

pub async fn run(args: BenchArgs, lifecycle: &SessionLifecycle) -> Result<()> {
    let modes = args.modes();
    let mut results = Vec::new();
    for &sessions in &args.sessions {
        for &message_size in &args.message_size {
            info!(
                "Running benchmarks: sessions={}, message_size={}",
                sessions, message_size
            );
            for &mode in &modes {
                results.push(run_mode(&args, mode, sessions, message_size, lifecycle).await?);
            }
        }
    }

    print_table(&results);

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        info!("Results written to {}", path.display());
    }
    Ok(())
}

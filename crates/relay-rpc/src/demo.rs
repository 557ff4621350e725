//! Single-session demo.

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use relay_core::{
    duplex, Message, Mode, RelayConfig, ScriptedPeer, SessionConfig, SessionCoordinator,
    SessionLifecycle,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoMode {
    Collect,
    FanOut,
    LockStep,
    Pipeline,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Interaction mode
    #[arg(value_enum)]
    pub mode: DemoMode,

    /// Messages the peer sends (fan-out always sends one request)
    #[arg(short, long, default_value = "5")]
    pub messages: usize,

    /// Pause between peer sends, in milliseconds
    #[arg(long, default_value = "0")]
    pub interval_ms: u64,

    /// Run pipeline processing in its own task
    #[arg(long)]
    pub dedicated_processor: bool,

    /// Session config file (JSON); overrides the mode defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DemoArgs {
    fn session_config(&self) -> relay_core::Result<SessionConfig> {
        if let Some(path) = &self.config {
            info!("Loading session config from {}", path.display());
            return SessionConfig::load(path);
        }
        let mode = match self.mode {
            DemoMode::Collect => Mode::CollectThenRespond,
            DemoMode::FanOut => Mode::fan_out(),
            DemoMode::LockStep => Mode::LockStep,
            DemoMode::Pipeline => Mode::DecoupledPipeline {
                queue_capacity: RelayConfig::DEFAULT_QUEUE_CAPACITY,
                processing_delay: RelayConfig::DEFAULT_PROCESSING_DELAY,
                dedicated_processor: self.dedicated_processor,
            },
        };
        Ok(SessionConfig::new(mode))
    }
}

/// Messages a peer sends for `mode`.
pub fn script(mode: Mode, client: usize, messages: usize) -> Vec<Message> {
    match mode {
        Mode::FanOut { .. } => vec![Message::new(format!(
            "Hello from client-{} for server stream",
            client
        ))],
        _ => (0..messages)
            .map(|i| Message::new(format!("Hello from client-{} message-{}", client, i)))
            .collect(),
    }
}

pub async fn run(args: DemoArgs, lifecycle: &SessionLifecycle) -> Result<()> {
    let config = args.session_config()?;
    let coordinator = SessionCoordinator::new(config)?;
    let mode = coordinator.mode();

    let (source, sink, peer) = duplex(RelayConfig::DEFAULT_QUEUE_CAPACITY);
    let handle = lifecycle.start_session(&coordinator, source, sink)?;
    info!(
        "Session {} started in {} mode (shutdown timeout {:?})",
        handle.id(),
        mode,
        coordinator.config().shutdown_timeout
    );

    let transcript = ScriptedPeer::new(script(mode, 0, args.messages))
        .with_interval(Duration::from_millis(args.interval_ms))
        .run(peer)
        .await;

    for (i, (response, at)) in transcript
        .responses
        .iter()
        .zip(&transcript.latencies)
        .enumerate()
    {
        info!("Response #{} after {:?}: {}", i + 1, at, response);
    }

    let outcome = handle.join().await?;
    info!(
        "Session {} ended {:?}: received {}, sent {}, discarded {}, ingress stalls {}, in {:?}",
        outcome.session_id,
        outcome.reason,
        outcome.stats.received,
        outcome.stats.sent,
        outcome.stats.discarded,
        outcome.stats.ingress_stalls,
        outcome.elapsed
    );

    if !outcome.is_success() {
        match outcome.error {
            Some(e) => bail!("session failed with status {}: {}", e.status_code(), e),
            None => bail!("session ended {:?}", outcome.reason),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::LifecycleConfig;
    use std::io::Write;

    fn args(mode: DemoMode) -> DemoArgs {
        DemoArgs {
            mode,
            messages: 3,
            interval_ms: 0,
            dedicated_processor: false,
            config: None,
        }
    }

    #[test]
    fn test_fan_out_script_is_one_request() {
        assert_eq!(script(Mode::fan_out(), 2, 10).len(), 1);
        assert_eq!(
            script(Mode::LockStep, 2, 3)[2].payload(),
            "Hello from client-2 message-2"
        );
    }

    #[test]
    fn test_pipeline_flag_reaches_config() {
        let mut pipeline = args(DemoMode::Pipeline);
        pipeline.dedicated_processor = true;
        let config = pipeline.session_config().unwrap();
        assert!(matches!(
            config.mode,
            Mode::DecoupledPipeline {
                dedicated_processor: true,
                ..
            }
        ));
    }

    #[test]
    fn test_config_file_overrides_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mode": "lock_step", "shutdown_timeout_ms": 500}}"#).unwrap();

        let mut collect = args(DemoMode::Collect);
        collect.config = Some(file.path().to_path_buf());
        let config = collect.session_config().unwrap();
        assert_eq!(config.mode, Mode::LockStep);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_collect_demo_succeeds() {
        let lifecycle = SessionLifecycle::init(LifecycleConfig::default()).unwrap();
        run(args(DemoMode::Collect), &lifecycle).await.unwrap();
        assert_eq!(lifecycle.active_sessions(), 0);
    }
}

//! Process-wide session lifecycle.
//!
//! Replaces ambient global shutdown state with an explicit object: create it
//! with [`SessionLifecycle::init`], start sessions through it, and call
//! [`SessionLifecycle::shutdown`] on process exit. Sessions themselves stay
//! free of any global state; the lifecycle only keeps each session's token so
//! it can cancel them all.
//!
//! # Thread Safety
//!
//! `SessionLifecycle` is cheap to clone and every clone refers to the same
//! registry, guarded by a `Mutex`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::LifecycleConfig;
use crate::policy::ResponsePolicy;
use crate::session::{SessionCoordinator, SessionHandle};
use crate::transport::{MessageSink, MessageSource};
use crate::{RelayError, Result};

/// What a lifecycle shutdown did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were still active and got cancelled.
    pub cancelled: usize,
    /// Sessions were still running when the grace period ran out.
    pub timed_out: bool,
}

struct Inner {
    config: LifecycleConfig,
    sessions: Mutex<HashMap<Uuid, CancellationToken>>,
    active: watch::Sender<usize>,
    shutting_down: AtomicBool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deregister(&self, id: Uuid) {
        let mut sessions = self.lock();
        if sessions.remove(&id).is_some() {
            self.active.send_replace(sessions.len());
        }
    }
}

/// Registry of active sessions with explicit init/shutdown.
#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<Inner>,
}

impl SessionLifecycle {
    /// Create a lifecycle accepting sessions.
    pub fn init(config: LifecycleConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Session lifecycle initialized (max {} sessions)",
            config.max_sessions
        );
        let (active, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                sessions: Mutex::new(HashMap::new()),
                active,
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    /// Number of sessions started and not yet terminated.
    pub fn active_sessions(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Start a session on a background task.
    ///
    /// Refused with [`RelayError::ShuttingDown`] once shutdown has begun and
    /// with [`RelayError::SessionLimit`] when `max_sessions` are active.
    pub fn start_session<P, S, K>(
        &self,
        coordinator: &SessionCoordinator<P>,
        source: S,
        sink: K,
    ) -> Result<SessionHandle>
    where
        P: ResponsePolicy,
        S: MessageSource<Message = P::Message>,
        K: MessageSink<Message = P::Message>,
    {
        let mut sessions = self.inner.lock();
        if self.is_shutting_down() {
            return Err(RelayError::ShuttingDown);
        }
        let limit = self.inner.config.max_sessions;
        if sessions.len() >= limit {
            warn!("Rejecting session: at max capacity ({})", limit);
            return Err(RelayError::SessionLimit { limit });
        }

        let registry = Arc::downgrade(&self.inner);
        let handle = coordinator.spawn_with(source, sink, &CancellationToken::new(), move |outcome| {
            if let Some(inner) = registry.upgrade() {
                inner.deregister(outcome.session_id);
            }
        });

        // Deregistration needs this lock, so it cannot run before the insert.
        sessions.insert(handle.id(), handle.cancel_token());
        self.inner.active.send_replace(sessions.len());
        debug!("Session {} registered ({} active)", handle.id(), sessions.len());
        Ok(handle)
    }

    /// Cancel every active session and wait up to the grace period for them
    /// to terminate. Further `start_session` calls are refused.
    pub async fn shutdown(&self) -> ShutdownReport {
        let tokens: Vec<CancellationToken> = {
            let sessions = self.inner.lock();
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            sessions.values().cloned().collect()
        };

        info!("Shutting down {} active session(s)", tokens.len());
        for token in &tokens {
            token.cancel();
        }

        let grace = self.inner.config.shutdown_grace;
        let mut active = self.inner.active.subscribe();
        let timed_out = tokio::time::timeout(grace, active.wait_for(|n| *n == 0))
            .await
            .is_err();
        if timed_out {
            warn!(
                "{} session(s) still running after {:?} grace period",
                self.active_sessions(),
                grace
            );
        }

        ShutdownReport {
            cancelled: tokens.len(),
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, SessionConfig};
    use crate::transport::duplex;
    use crate::Message;
    use std::time::Duration;

    fn lock_step() -> SessionCoordinator {
        SessionCoordinator::new(SessionConfig::new(Mode::LockStep)).unwrap()
    }

    #[tokio::test]
    async fn test_init_rejects_zero_sessions() {
        let result = SessionLifecycle::init(LifecycleConfig::default().with_max_sessions(0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let lifecycle =
            SessionLifecycle::init(LifecycleConfig::default().with_max_sessions(1)).unwrap();
        let coordinator = lock_step();

        let (source, sink, _peer1) = duplex::<Message>(1);
        let first = lifecycle.start_session(&coordinator, source, sink).unwrap();
        assert_eq!(lifecycle.active_sessions(), 1);

        let (source, sink, _peer2) = duplex::<Message>(1);
        let err = lifecycle
            .start_session(&coordinator, source, sink)
            .unwrap_err();
        assert!(matches!(err, RelayError::SessionLimit { limit: 1 }));

        first.cancel();
        first.join().await.unwrap();
        assert_eq!(lifecycle.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_finished_session_deregisters() {
        let lifecycle = SessionLifecycle::init(LifecycleConfig::default()).unwrap();
        let (source, sink, mut peer) = duplex::<Message>(1);
        let handle = lifecycle.start_session(&lock_step(), source, sink).unwrap();

        peer.finish();
        let outcome = handle.join().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(lifecycle.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sessions_and_refuses_new_ones() {
        let lifecycle = SessionLifecycle::init(
            LifecycleConfig::default().with_shutdown_grace(Duration::from_secs(2)),
        )
        .unwrap();
        let coordinator = lock_step();

        let mut peers = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let (source, sink, peer) = duplex::<Message>(1);
            handles.push(lifecycle.start_session(&coordinator, source, sink).unwrap());
            peers.push(peer);
        }

        let report = lifecycle.shutdown().await;
        assert_eq!(report.cancelled, 3);
        assert!(!report.timed_out);
        assert_eq!(lifecycle.active_sessions(), 0);

        for handle in handles {
            let outcome = handle.join().await.unwrap();
            assert_eq!(
                outcome.reason,
                crate::session::TerminationReason::Cancelled
            );
        }

        let (source, sink, _peer) = duplex::<Message>(1);
        let err = lifecycle
            .start_session(&coordinator, source, sink)
            .unwrap_err();
        assert!(matches!(err, RelayError::ShuttingDown));
    }
}

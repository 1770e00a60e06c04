//! Readiness state machine driven by a background ping loop.
//!
//! ```text
//!            ping ok                ping failed
//! NotReady ──────────▶ Ready ──────────────────▶ NotReady ...
//!     │                  │
//!     └──── stop() ──────┴──────▶ Stopped (terminal)
//! ```
//!
//! The loop pings on an adaptive schedule: every success resets the wait
//! to [`HealthConfig::interval`], every failure doubles it up to
//! [`HealthConfig::max_interval`]. A probe that reads `NotReady` can ask for
//! an extra check right away through [`HealthChecker::check_readiness`];
//! requests are coalesced in a channel of capacity one.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::QueryContext;
use crate::error::StoreError;

/// Narrow capability the checker needs from the store.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Round-trips to the store.
    ///
    /// # Errors
    ///
    /// Any error that makes the store unfit to serve traffic.
    async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError>;
}

/// Readiness as seen by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadinessState {
    /// Last check failed, or no check has run yet.
    NotReady = 0,
    /// Last check succeeded.
    Ready = 1,
    /// The checker was stopped; no further transitions happen.
    Stopped = 2,
}

impl ReadinessState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Ready,
            2 => Self::Stopped,
            _ => Self::NotReady,
        }
    }
}

/// Poll schedule for the background loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Wait after a successful check; the floor of the schedule.
    pub interval: Duration,
    /// Upper bound the wait grows to while checks keep failing.
    pub max_interval: Duration,
    /// Deadline for a single ping.
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Smallest wait the loop accepts between checks.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

impl HealthConfig {
    /// Raises `interval` to at least [`MIN_INTERVAL`] and `max_interval` to
    /// at least `interval`, so the schedule never spins or shrinks below
    /// its floor.
    #[must_use]
    pub fn normalized(self) -> Self {
        let interval = self.interval.max(MIN_INTERVAL);
        Self {
            interval,
            max_interval: self.max_interval.max(interval),
            timeout: self.timeout,
        }
    }

    fn next_wait(&self, current: Duration, healthy: bool) -> Duration {
        if healthy {
            self.interval
        } else {
            current
                .saturating_mul(2)
                .min(self.max_interval)
                .max(self.interval)
        }
    }
}

/// Background readiness checker.
pub struct HealthChecker {
    pinger: Arc<dyn Pinger>,
    config: HealthConfig,
    state: AtomicU8,
    root: QueryContext,
    trigger: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    /// Creates a checker in the `NotReady` state. Call
    /// [`HealthChecker::start`] to run the loop.
    pub fn new(pinger: Arc<dyn Pinger>, config: HealthConfig) -> Self {
        let (trigger, trigger_rx) = mpsc::channel(1);
        Self {
            pinger,
            config: config.normalized(),
            state: AtomicU8::new(ReadinessState::NotReady as u8),
            root: QueryContext::background(),
            trigger,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReadinessState {
        ReadinessState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the last check succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    /// Readiness read for probes. When not ready, asks the loop for an
    /// immediate re-check without waiting for it.
    #[must_use]
    pub fn check_readiness(&self) -> bool {
        match self.state() {
            ReadinessState::Ready => true,
            ReadinessState::Stopped => false,
            ReadinessState::NotReady => {
                // Full channel means a check is already pending.
                let _ = self.trigger.try_send(());
                false
            }
        }
    }

    /// Runs one check now and applies its outcome.
    pub async fn check_now(&self) -> bool {
        let ctx = self.root.child().timeout(self.config.timeout);
        let result = self.pinger.ping(&ctx).await;
        let healthy = result.is_ok();
        let next = if healthy {
            ReadinessState::Ready
        } else {
            ReadinessState::NotReady
        };

        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != ReadinessState::Stopped as u8).then_some(next as u8)
            })
            .map(ReadinessState::from_u8);

        match (previous, result) {
            (Ok(ReadinessState::NotReady), Ok(())) => tracing::info!("store is ready"),
            (Ok(ReadinessState::Ready), Err(err)) => {
                tracing::warn!(error = %err, "store is no longer ready");
            }
            (Ok(ReadinessState::NotReady), Err(err)) => {
                tracing::debug!(error = %err, "store still not ready");
            }
            _ => {}
        }
        healthy
    }

    /// Spawns the background loop. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Some(trigger_rx) = self
            .trigger_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        let handle = tokio::spawn(Arc::clone(self).run(trigger_rx, shutdown_rx));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!(
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            "health checker started"
        );
    }

    async fn run(self: Arc<Self>, mut trigger: mpsc::Receiver<()>, mut shutdown: oneshot::Receiver<()>) {
        let mut wait = self.config.interval;
        loop {
            let healthy = self.check_now().await;
            wait = self.config.next_wait(wait, healthy);

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(()) = trigger.recv() => {
                    tracing::debug!("on-demand readiness check");
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!("health checker loop exited");
    }

    /// Stops the loop and moves to `Stopped`. Safe to call more than once.
    pub async fn stop(&self) {
        self.state
            .store(ReadinessState::Stopped as u8, Ordering::Release);
        self.root.cancel();
        drop(
            self.shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
            tracing::info!("health checker stopped");
        }
    }
}

//! Cyclic acquisition scheduler.
//!
//! Fires one trigger every `interval` for `floor(duration / interval)` cycles,
//! then stops by itself. Each trigger asks the target to sample when it can and
//! to zero otherwise. Stopping early cancels future triggers only; a session
//! already started runs to completion.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::acquisition::SessionMode;
use crate::actor::LevelHandle;
use crate::config::CycleConfig;
use crate::error::AppResult;

/// Something a scheduler cycle can fire.
#[async_trait]
pub trait CycleTarget: Send + Sync + 'static {
    /// Start the session this cycle calls for and report which one it was.
    async fn trigger(&self) -> AppResult<SessionMode>;
}

#[async_trait]
impl CycleTarget for LevelHandle {
    async fn trigger(&self) -> AppResult<SessionMode> {
        self.cycle_trigger().await
    }
}

/// Validated timing for one scheduler run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CyclePlan {
    /// Time between triggers.
    pub interval: Duration,
    /// Triggers before stopping automatically.
    pub max_cycles: u64,
}

impl CyclePlan {
    /// Plan a run from interval and total duration in seconds.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if either value is outside 5..=3600.
    pub fn new(interval_s: u64, duration_s: u64) -> AppResult<Self> {
        let config = CycleConfig {
            interval_s,
            duration_s,
        };
        config.validate()?;
        Ok(Self {
            interval: Duration::from_secs(interval_s),
            max_cycles: duration_s / interval_s,
        })
    }

    /// Plan a run from the `[cycle]` settings.
    pub fn from_config(config: &CycleConfig) -> AppResult<Self> {
        Self::new(config.interval_s, config.duration_s)
    }
}

/// A running (or finished) periodic trigger task.
pub struct CyclicScheduler {
    stop_tx: Option<oneshot::Sender<()>>,
    fired: Arc<AtomicU64>,
    task: Option<JoinHandle<u64>>,
}

impl CyclicScheduler {
    /// Start firing `target` according to `plan`. The first trigger comes one
    /// interval after the call.
    pub fn start<T: CycleTarget>(plan: CyclePlan, target: T) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let fired = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_cycles(plan, target, Arc::clone(&fired), stop_rx));
        info!(
            interval = ?plan.interval,
            max_cycles = plan.max_cycles,
            "Cyclic scheduler started"
        );
        Self {
            stop_tx: Some(stop_tx),
            fired,
            task: Some(task),
        }
    }

    /// Cancel all future triggers.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Whether triggers are still pending.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Triggers fired so far.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait for the run to end and return the number of triggers fired.
    ///
    /// Safe to call again, or to drop mid-wait inside `select!`.
    pub async fn wait(&mut self) -> u64 {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                warn!("Scheduler task failed: {}", e);
            }
            self.task = None;
        }
        self.fired()
    }
}

async fn run_cycles<T: CycleTarget>(
    plan: CyclePlan,
    target: T,
    fired: Arc<AtomicU64>,
    mut stop_rx: oneshot::Receiver<()>,
) -> u64 {
    let mut ticker = interval_at(Instant::now() + plan.interval, plan.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut elapsed = 0u64;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                info!(elapsed, "Cyclic scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                match target.trigger().await {
                    Ok(mode) => info!(cycle = elapsed + 1, ?mode, "Cycle fired"),
                    Err(e) => warn!(cycle = elapsed + 1, "Cycle trigger rejected: {}", e),
                }
                elapsed += 1;
                fired.store(elapsed, Ordering::SeqCst);
                // Checked after firing, so a zero-cycle plan still fires once.
                if elapsed >= plan.max_cycles {
                    info!(elapsed, "Cyclic scheduler finished");
                    break;
                }
            }
        }
    }
    elapsed
}

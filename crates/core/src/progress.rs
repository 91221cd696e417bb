// crates/core/src/progress.rs
//! Client-side progress narrative for a running batch.
//!
//! The backend only reports coarse progress, so while a task runs we
//! simulate a completed-device count and step the stage label forward on a
//! fixed schedule. Both are background tasks tied to the execution's
//! cancellation token and epoch; the real outcome overwrites whatever they
//! wrote.

use std::time::Duration;

use netops_types::{ExecutionMode, ExecutionStage};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ProgressConfig;
use crate::store::{AppStore, Epoch};

impl ProgressConfig {
    /// Share of the device count the simulation may claim as done.
    pub fn ratio_for(&self, mode: ExecutionMode) -> f64 {
        match mode {
            ExecutionMode::Ai => self.ai_mode_max_progress,
            ExecutionMode::Command => self.command_mode_max_progress,
        }
    }

    pub fn interval_for(&self, mode: ExecutionMode) -> Duration {
        match mode {
            ExecutionMode::Ai => self.ai_mode_interval,
            ExecutionMode::Command => self.command_mode_interval,
        }
    }
}

/// Delay between `connecting` and `executing`, growing with the batch size.
pub fn executing_delay(device_count: usize, config: &ProgressConfig) -> Duration {
    let devices = u32::try_from(device_count).unwrap_or(u32::MAX);
    let extra = config
        .executing_per_device
        .saturating_mul(devices)
        .min(config.executing_max_extra);
    config.executing_base_delay + extra
}

/// Default user-facing text for a stage.
pub fn stage_message(stage: ExecutionStage, mode: ExecutionMode, device_count: usize) -> String {
    match stage {
        ExecutionStage::Idle => "Ready".to_string(),
        ExecutionStage::Submitting => match mode {
            ExecutionMode::Ai => "Submitting AI query...".to_string(),
            ExecutionMode::Command => "Submitting command...".to_string(),
        },
        ExecutionStage::Submitted => "Task submitted, waiting for a worker".to_string(),
        ExecutionStage::Connecting => format!("Connecting to {device_count} device(s)..."),
        ExecutionStage::Executing => format!("Executing on {device_count} device(s)..."),
        ExecutionStage::AiAnalyzing => "AI is analyzing the request...".to_string(),
        ExecutionStage::Completed => "Execution completed".to_string(),
        ExecutionStage::Failed => "Execution failed".to_string(),
        ExecutionStage::Cancelled => "Execution cancelled".to_string(),
    }
}

/// Pure counter behind the simulated completed-device count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSimulation {
    ceiling: usize,
    step: usize,
    current: usize,
}

impl ProgressSimulation {
    pub fn new(device_count: usize, mode: ExecutionMode, config: &ProgressConfig) -> Self {
        let ceiling = (device_count as f64 * config.ratio_for(mode)).floor() as usize;
        Self {
            ceiling,
            step: (ceiling / 10).max(1),
            current: 0,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.ceiling
    }

    /// Step forward, saturating at the ceiling.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + self.step).min(self.ceiling);
        self.current
    }
}

/// Tick the simulation into the store until it reaches its ceiling, the
/// token is cancelled, or the store refuses the write.
pub fn spawn_simulation(
    store: AppStore,
    epoch: Epoch,
    device_count: usize,
    mode: ExecutionMode,
    config: &ProgressConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    let mut sim = ProgressSimulation::new(device_count, mode, config);
    let period = config.interval_for(mode);
    let throttle = config.throttle;

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_write: Option<Instant> = None;

        while !sim.is_done() {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let completed = sim.advance();
            let now = Instant::now();
            let throttled = last_write.is_some_and(|at| now.duration_since(at) < throttle);
            if throttled && !sim.is_done() {
                continue;
            }
            if !store.set_simulated_completed(epoch, completed) {
                tracing::debug!(epoch = epoch.value(), "simulation write rejected, stopping");
                break;
            }
            last_write = Some(now);
        }
    })
}

/// Step the stage label to `connecting` and then `executing` or
/// `ai-analyzing`. Each step is dropped if the execution moved on.
pub fn spawn_stage_narrative(
    store: AppStore,
    epoch: Epoch,
    device_count: usize,
    mode: ExecutionMode,
    config: &ProgressConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    let connecting_after = config.connecting_delay;
    let executing_after = executing_delay(device_count, config);
    let working = match mode {
        ExecutionMode::Ai => ExecutionStage::AiAnalyzing,
        ExecutionMode::Command => ExecutionStage::Executing,
    };

    tokio::spawn(async move {
        for (delay, stage) in [
            (connecting_after, ExecutionStage::Connecting),
            (executing_after, working),
        ] {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }
            let message = stage_message(stage, mode, device_count);
            if !store.apply_stage(epoch, stage, message, None) {
                tracing::debug!(epoch = epoch.value(), stage = %stage, "narrative step skipped");
            }
        }
    })
}

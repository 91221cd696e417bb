// crates/cli/src/render.rs
//! Terminal output: plain-text tables and the live progress bar.

use std::fmt::Write as _;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use netops_core::{PollEvent, StoreEvent};
use netops_types::{
    AiStatus, CancelAck, Device, DeviceGroup, Task, TaskManagerStats, TaskResult,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BAR_TEMPLATE: &str = "  {spinner} [{bar:30}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "  {spinner} {prefix} {msg}";
const TICK: Duration = Duration::from_millis(100);

fn dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Render store events as a device progress bar until `done` fires.
pub fn spawn_progress(
    mut rx: broadcast::Receiver<StoreEvent>,
    total: usize,
    done: CancellationToken,
) -> JoinHandle<()> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(TICK);

    tokio::spawn(async move {
        loop {
            // Drain pending events before honouring `done`.
            let event = tokio::select! {
                biased;
                event = rx.recv() => event,
                _ = done.cancelled() => break,
            };
            match event {
                Ok(StoreEvent::StageChanged { stage, message, .. }) => {
                    pb.set_message(format!("{stage}: {message}"));
                }
                Ok(StoreEvent::BatchProgress(progress)) => {
                    pb.set_length(progress.total as u64);
                    pb.set_position(progress.completed as u64);
                }
                Ok(StoreEvent::Results(summary)) => {
                    pb.set_position(summary.successful.saturating_add(summary.failed) as u64);
                }
                Ok(StoreEvent::Status(_) | StoreEvent::Cleared) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress renderer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        pb.finish_and_clear();
    })
}

/// Spinner for `task --wait`; ends when the poller drops its sender.
pub fn spawn_poll_spinner(mut rx: mpsc::UnboundedReceiver<PollEvent>) -> JoinHandle<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(TICK);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PollEvent::Progress(task) => pb.set_message(format!(
                    "{} {:.0}% {}",
                    task.status.as_str(),
                    task.progress.percentage,
                    dash(task.progress.current_stage.as_deref()),
                )),
                PollEvent::StageChanged { stage, .. } => pb.set_prefix(stage.to_string()),
                PollEvent::Error { message } => pb.println(format!("  warning: {message}")),
                PollEvent::Submitted { .. } | PollEvent::Completed(_) => {}
            }
        }
        pb.finish_and_clear();
    })
}

pub fn devices(devices: &[Device]) -> String {
    let mut out = format!(
        "{:<24} {:<16} {:<14} {:<12} {}\n",
        "NAME", "IP", "TYPE", "GROUP", "STATUS"
    );
    for d in devices {
        let _ = writeln!(
            out,
            "{:<24} {:<16} {:<14} {:<12} {}",
            d.name,
            dash(d.ip.as_deref()),
            dash(d.device_type.as_deref()),
            dash(d.group.as_deref()),
            dash(d.status.as_deref()),
        );
    }
    out
}

pub fn groups(groups: &[DeviceGroup]) -> String {
    let mut out = String::new();
    for g in groups {
        let _ = writeln!(out, "{} ({} devices)", g.name, g.devices.len());
        if let Some(description) = &g.description {
            let _ = writeln!(out, "  {description}");
        }
        if !g.devices.is_empty() {
            let _ = writeln!(out, "  {}", g.devices.join(", "));
        }
    }
    out
}

pub fn results(result: &TaskResult) -> String {
    let mut out = String::new();
    for r in &result.results {
        let mark = if r.success { "ok  " } else { "FAIL" };
        let _ = writeln!(out, "[{mark}] {}", r.device);
        if let Some(error) = &r.error {
            let _ = writeln!(out, "       {error}");
        }
        if let Some(output) = &r.output {
            for line in output.lines() {
                let _ = writeln!(out, "       {line}");
            }
        }
    }
    if let Some(answer) = &result.ai_response {
        let _ = writeln!(out, "\n{answer}");
    }
    let summary = result.summary();
    let _ = writeln!(
        out,
        "\n{} device(s): {} succeeded, {} failed",
        summary.total, summary.successful, summary.failed
    );
    out
}

pub fn task(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "task     {}", task.task_id);
    let _ = writeln!(out, "type     {}", task.task_type.as_str());
    let _ = writeln!(out, "status   {}", task.status.as_str());
    let _ = writeln!(
        out,
        "progress {:.0}% {}",
        task.progress.percentage,
        dash(task.progress.current_stage.as_deref())
    );
    if let Some(error) = &task.error {
        let _ = writeln!(out, "error    {error}");
    }
    if let Some(usage) = &task.token_usage {
        let _ = writeln!(
            out,
            "tokens   {} in / {} out",
            usage.input_tokens, usage.output_tokens
        );
    }
    let outcome = task.outcome();
    if !outcome.results.is_empty() || outcome.ai_response.is_some() {
        out.push('\n');
        out.push_str(&results(&outcome));
    }
    out
}

pub fn tasks(tasks: &[Task]) -> String {
    let mut out = format!(
        "{:<38} {:<14} {:<10} {}\n",
        "TASK", "TYPE", "STATUS", "PROGRESS"
    );
    for t in tasks {
        let _ = writeln!(
            out,
            "{:<38} {:<14} {:<10} {:.0}%",
            t.task_id,
            t.task_type.as_str(),
            t.status.as_str(),
            t.progress.percentage
        );
    }
    out
}

pub fn stats(stats: &TaskManagerStats) -> String {
    format!(
        "total {}  pending {}  running {}  completed {}  failed {}\n",
        stats.total_tasks,
        stats.pending_tasks,
        stats.running_tasks,
        stats.completed_tasks,
        stats.failed_tasks
    )
}

pub fn ai_status(status: &AiStatus) -> String {
    let state = if status.available { "available" } else { "unavailable" };
    let mut out = format!("AI {state}");
    if let Some(provider) = &status.provider {
        let _ = write!(out, " via {provider}");
    }
    if let Some(model) = &status.model {
        let _ = write!(out, " ({model})");
    }
    out.push('\n');
    if let Some(message) = &status.message {
        let _ = writeln!(out, "{message}");
    }
    out
}

pub fn cancel_ack(ack: &CancelAck) -> String {
    format!(
        "{}: {}\n",
        dash(ack.task_id.as_deref()),
        ack.message.as_deref().unwrap_or("cancel requested")
    )
}

// crates/cli/src/cli.rs
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use netops_core::{
    AppConfig, AppStore, ExecutionCore, ExecutionError, HttpClient, PollOptions, TaskApi,
    TaskError, TaskPoller,
};
use netops_observability::{init_tracing, LogFormat};
use netops_types::{BatchRequest, DeviceGroup, ExecutionMode, FrontendLogEntry, LogLevel};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::render;

#[derive(Debug, Parser)]
#[command(
    name = "netops",
    version,
    about = "Run commands and AI queries across network devices"
)]
pub struct Cli {
    /// Backend base URL; overrides the config file and NETOPS_API_URL
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,
    /// TOML config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List managed devices
    Devices,
    /// List device groups
    Groups,
    /// Run a command or an AI query on a batch of devices
    Exec(ExecArgs),
    /// Show a task, optionally waiting until it finishes
    Task {
        task_id: String,
        #[arg(long)]
        wait: bool,
        #[arg(long, value_enum, default_value_t = Mode::Command)]
        mode: Mode,
    },
    /// Cancel a task on the backend
    Cancel { task_id: String },
    /// List tasks known to the backend
    Tasks,
    /// Task manager counters
    Stats,
    /// AI backend availability
    AiStatus,
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args, Clone)]
struct ExecArgs {
    /// Target device; repeat for more
    #[arg(long = "device", short = 'd', value_name = "NAME")]
    devices: Vec<String>,
    /// Add every member of this device group
    #[arg(long, short = 'g')]
    group: Option<String>,
    /// Command line, or the question in ai mode
    #[arg(long, short = 'c')]
    command: String,
    #[arg(long, value_enum, default_value_t = Mode::Command)]
    mode: Mode,
    /// Use the blocking endpoint instead of submit-and-poll
    #[arg(long)]
    sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Command,
    Ai,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Command => ExecutionMode::Command,
            Mode::Ai => ExecutionMode::Ai,
        }
    }
}

struct Session {
    client: HttpClient,
    config: AppConfig,
    json: bool,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_tracing(self.log_format).context("failed to initialise logging")?;

        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(url) = self.api_url {
            config.client.base_url = url;
        }
        let client = HttpClient::new(&config.client, config.retry.clone())?;
        tracing::debug!(base_url = client.base_url(), "client ready");

        let session = Session {
            client,
            config,
            json: self.json,
        };

        match self.command {
            Command::Devices => {
                let devices = session.client.devices().await?;
                emit(session.json, &devices, |d| render::devices(d))
            }
            Command::Groups => {
                let groups = session.client.device_groups().await?;
                emit(session.json, &groups, |g| render::groups(g))
            }
            Command::Exec(args) => exec(session, args).await,
            Command::Task {
                task_id,
                wait,
                mode,
            } => task(session, &task_id, wait, mode.into()).await,
            Command::Cancel { task_id } => {
                let ack = session.client.cancel_task(&task_id).await?;
                emit(session.json, &ack, render::cancel_ack)
            }
            Command::Tasks => {
                let tasks = session.client.tasks().await?;
                emit(session.json, &tasks, |t| render::tasks(t))
            }
            Command::Stats => {
                let stats = session.client.task_stats().await?;
                emit(session.json, &stats, render::stats)
            }
            Command::AiStatus => {
                let status = session.client.ai_status().await?;
                emit(session.json, &status, render::ai_status)
            }
            Command::Config => show_config(session).await,
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, table: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", table(value));
    }
    Ok(())
}

async fn exec(session: Session, args: ExecArgs) -> Result<()> {
    let Session {
        client,
        mut config,
        json,
    } = session;

    let mut devices = args.devices;
    if let Some(group) = &args.group {
        let groups = client.device_groups().await?;
        devices.extend(group_members(&groups, group)?);
    }
    let devices = dedupe(devices);
    if devices.is_empty() {
        bail!("no devices selected; pass --device or --group");
    }
    let request = BatchRequest {
        devices,
        command: args.command,
        mode: args.mode.into(),
    };

    if args.sync {
        let result = client.batch_execute(&request).await?;
        return emit(json, &result, render::results);
    }

    match client.remote_config().await {
        Ok(remote) => {
            config.apply_remote(&remote);
            config.validate()?;
        }
        Err(e) => tracing::debug!(error = %e, "remote config unavailable, using local values"),
    }

    let store = AppStore::new();
    store.set_selected_devices(request.devices.clone());
    store.set_input_text(request.command.clone());
    store.set_execution_mode(request.mode);

    let core = ExecutionCore::new(Arc::new(client.clone()), store.clone(), &config);
    let done = CancellationToken::new();
    let renderer =
        (!json).then(|| render::spawn_progress(store.subscribe(), request.devices.len(), done.clone()));

    let mut handle = tokio::spawn({
        let core = core.clone();
        let request = request.clone();
        async move { core.execute(request).await }
    });
    let outcome = tokio::select! {
        res = &mut handle => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, cancelling");
            core.cancel();
            handle.await?
        }
    };

    done.cancel();
    if let Some(renderer) = renderer {
        if let Err(e) = renderer.await {
            tracing::debug!("progress renderer stopped abnormally: {e}");
        }
    }

    match outcome {
        Ok(result) => emit(json, &result, render::results),
        Err(ExecutionError::Cancelled) => bail!("execution cancelled"),
        Err(err) => {
            let state = store.snapshot();
            let entry = FrontendLogEntry::new(LogLevel::Error, "batch execution failed")
                .with_context(json!({
                    "error": err.to_string(),
                    "task_id": state.current_task_id,
                    "devices": request.devices,
                    "mode": request.mode.as_str(),
                }));
            client.ship_logs(&[entry]).await;

            let message = state
                .status_message
                .map(|s| s.text)
                .unwrap_or_else(|| err.to_string());
            bail!("{message}")
        }
    }
}

async fn task(session: Session, task_id: &str, wait: bool, mode: ExecutionMode) -> Result<()> {
    if !wait {
        let task = session.client.get_task_status(task_id).await?;
        return emit(session.json, &task, render::task);
    }

    let api: Arc<dyn TaskApi> = Arc::new(session.client.clone());
    let poller = TaskPoller::new(api, session.config.poller.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    let spinner = (!session.json).then(|| render::spawn_poll_spinner(rx));

    let options = PollOptions::new(mode).with_events(tx);
    let result = tokio::select! {
        res = poller.poll_task(task_id, &options) => res,
        _ = tokio::signal::ctrl_c() => {
            poller.cancel();
            Err(TaskError::Cancelled)
        }
    };
    drop(options);

    if let Some(spinner) = spinner {
        if let Err(e) = spinner.await {
            tracing::debug!("poll spinner stopped abnormally: {e}");
        }
    }
    let task = result?;
    emit(session.json, &task, render::task)
}

async fn show_config(session: Session) -> Result<()> {
    let Session {
        client,
        mut config,
        json,
    } = session;

    let remote = match client.remote_config().await {
        Ok(remote) => {
            config.apply_remote(&remote);
            Some(remote)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not fetch backend config");
            None
        }
    };

    if json {
        let value = json!({ "effective": config, "remote": remote });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn group_members(groups: &[DeviceGroup], name: &str) -> Result<Vec<String>> {
    match groups.iter().find(|g| g.name == name) {
        Some(group) => Ok(group.devices.clone()),
        None => bail!("unknown device group {name:?}"),
    }
}

/// Drop repeats, keeping first-seen order.
fn dedupe(devices: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_exec() {
        let cli = Cli::try_parse_from([
            "netops", "--json", "exec", "-d", "r1", "-d", "r2", "--command", "show ver", "--mode",
            "ai",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Exec(args) => {
                assert_eq!(args.devices, vec!["r1".to_string(), "r2".to_string()]);
                assert_eq!(args.mode, Mode::Ai);
                assert!(!args.sync);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_task_wait_and_log_format() {
        let cli =
            Cli::try_parse_from(["netops", "task", "abc", "--wait", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Task { wait: true, .. }));
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Cli::try_parse_from(["netops", "exec", "-d", "r1"]).is_err());
    }

    #[test]
    fn test_group_members() {
        let groups = vec![DeviceGroup {
            name: "core".into(),
            devices: vec!["c1".into(), "c2".into()],
            description: None,
        }];
        assert_eq!(group_members(&groups, "core").unwrap(), vec!["c1", "c2"]);
        assert!(group_members(&groups, "edge").is_err());
    }

    #[test]
    fn test_dedupe_keeps_first_order() {
        let out = dedupe(vec!["b".into(), "a".into(), "b".into(), "c".into(), "a".into()]);
        assert_eq!(out, vec!["b", "a", "c"]);
    }
}

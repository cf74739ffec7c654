//! ulticlock daemon and control client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use ulticlock::scheduler::{HttpSchedulerClient, SchedulerControl};
use ulticlock::startup::{Service, configured_calendar, remote_reconciler};
use ulticlock::time_spec::{format_time_spec, parse_time_spec};
use ulticlock::{AlarmConfig, EventStore, diagnostics, paths};

/// Calendar-driven alarm clock.
#[derive(Parser)]
#[command(name = "ulticlockd", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "ULTICLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Control surface of a running daemon (defaults to the configured one).
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full service: scheduler, control surface and calendar sync.
    Run,

    /// Run the scheduler and control surface without calendar sync.
    Serve,

    /// Schedule an alarm on a running daemon.
    Create {
        alarm_id: String,
        /// Local time, `YYYY-MM-DD HH:MM:SS`.
        time_spec: String,
        /// Message handed to the actions.
        #[arg(long, default_value = "")]
        command: String,
        /// Restrict to these actions (repeatable).
        #[arg(long = "plugin")]
        plugins: Vec<String>,
    },

    /// Move a pending alarm.
    Modify { alarm_id: String, time_spec: String },

    /// Cancel a pending alarm.
    Cancel { alarm_id: String },

    /// Push a pending alarm back.
    Snooze {
        alarm_id: String,
        /// Delay in seconds (defaults to the daemon's configured snooze).
        #[arg(long)]
        seconds: Option<u64>,
        /// Treat `alarm_id` as a stored event and snooze it through a
        /// `<id>_snooze` copy, so the next calendar sync leaves it snoozed.
        #[arg(long)]
        event: bool,
    },

    /// Show whether an alarm is pending and when it fires.
    Status { alarm_id: String },

    /// Print the next due alarm from the event store.
    Next,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(paths::config_file);
    let config = AlarmConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let _log_guard = diagnostics::init_tracing(&config.logging)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_service(config, true).await,
        Command::Serve => run_service(config, false).await,
        Command::Next => print_next(&config),
        command => control(&config, cli.url.as_deref(), command).await,
    }
}

async fn run_service(config: AlarmConfig, with_sync: bool) -> anyhow::Result<()> {
    println!("ulticlock v{}", env!("CARGO_PKG_VERSION"));

    let service = if with_sync {
        let calendar = configured_calendar(&config)?;
        Service::start(config, calendar).await?
    } else {
        Service::serve(config).await?
    };
    println!("Control surface on {}. Press Ctrl+C to stop.", service.control_url());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("received Ctrl+C, shutting down...");
    service.shutdown().await;
    Ok(())
}

fn print_next(config: &AlarmConfig) -> anyhow::Result<()> {
    let tz = config.tz()?;
    let store = EventStore::open(&config.store.db_path(), tz)?;
    match store.next_due(Utc::now(), config.sync.grace())? {
        Some(event) => println!(
            "{}  {}  {} [{}]",
            format_time_spec(event.trigger_time(tz), tz),
            event.event_id,
            event.title,
            event.status
        ),
        None => println!("No pending alarms."),
    }
    Ok(())
}

async fn control(config: &AlarmConfig, url: Option<&str>, command: Command) -> anyhow::Result<()> {
    let tz = config.tz()?;
    let base_url = url.map_or_else(|| config.scheduler.base_url(), str::to_owned);
    let client: Arc<dyn SchedulerControl> = Arc::new(HttpSchedulerClient::new(&base_url, tz)?);

    let ok = match command {
        Command::Create {
            alarm_id,
            time_spec,
            command,
            plugins,
        } => {
            let at = parse_time_spec(&time_spec, tz)?;
            let plugins = (!plugins.is_empty()).then_some(plugins);
            client.create(&alarm_id, at, &command, plugins).await
        }
        Command::Modify {
            alarm_id,
            time_spec,
        } => {
            let at = parse_time_spec(&time_spec, tz)?;
            client.modify(&alarm_id, at).await
        }
        Command::Cancel { alarm_id } => client.cancel(&alarm_id).await,
        Command::Snooze {
            alarm_id,
            seconds,
            event,
        } => {
            let delay = seconds.map_or_else(
                || config.scheduler.default_snooze(),
                Duration::from_secs,
            );
            if event {
                remote_reconciler(config, &base_url)?
                    .snooze_event(&alarm_id, delay)
                    .await?
            } else {
                client.snooze(&alarm_id, delay).await
            }
        }
        Command::Status { alarm_id } => {
            let status = client.status(&alarm_id).await;
            match status.next_trigger {
                Some(at) if status.active => {
                    println!("{alarm_id}: pending, fires {}", format_time_spec(at, tz));
                }
                _ => println!("{alarm_id}: not pending"),
            }
            return Ok(());
        }
        Command::Run | Command::Serve | Command::Next => true,
    };

    if !ok {
        bail!("scheduler at {base_url} rejected the request");
    }
    println!("ok");
    Ok(())
}

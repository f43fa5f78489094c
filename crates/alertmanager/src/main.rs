use alertmanager::notify::Sender;
use alertmanager::scanner::{HttpProbe, ScanConfig};
use alertmanager::{api, App, Config};
use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use eventlog::{FileLog, Journal, MemoryLog};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Alertmanager tracks alerts, dead man's switches and HTTP monitors.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the event log. If not set, events are held only in memory.
    #[clap(long = "journal", env = "ALERTMANAGER_JOURNAL", global = true)]
    journal: Option<std::path::PathBuf>,
    /// New alerts are dropped while this many alerts are active.
    #[clap(
        long = "max-active-alerts",
        env = "MAX_FIRING_ALERTS",
        default_value = "5",
        global = true
    )]
    max_active_alerts: usize,
    /// Base URL of the HTTP API, used in acknowledgement links.
    #[clap(
        long = "api-endpoint",
        env = "API_ENDPOINT",
        default_value = "http://localhost:8080",
        global = true
    )]
    api_endpoint: url::Url,
    /// Webhook to which alert notifications are posted.
    /// If not set, notifications are logged and discarded.
    #[clap(long = "notify-webhook", env = "ALERT_WEBHOOK_URL", global = true)]
    notify_webhook: Option<url::Url>,
    /// Number of HTTP monitors which are scanned concurrently.
    #[clap(long = "scan-workers", default_value = "3", global = true)]
    scan_workers: usize,
    /// Timeout of a first attempt to scan an HTTP monitor.
    #[clap(long = "scan-timeout", default_value = "15s", value_parser = humantime::parse_duration, global = true)]
    scan_timeout: Duration,
    /// Timeout of a retried scan of an HTTP monitor whose first attempt timed out.
    #[clap(long = "scan-retry-timeout", default_value = "30s", value_parser = humantime::parse_duration, global = true)]
    scan_retry_timeout: Duration,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Manage alerts.
    Alert {
        #[clap(subcommand)]
        cmd: AlertCommand,
    },
    /// Manage dead man's switches.
    Dms {
        #[clap(subcommand)]
        cmd: SwitchCommand,
    },
    /// Manage HTTP monitors.
    Hm {
        #[clap(subcommand)]
        cmd: MonitorCommand,
    },
    /// Run a single scheduled pass: remind of unnoticed alerts, alert for
    /// expired dead man's switches, and scan HTTP monitors.
    Scheduler,
    /// Serve the HTTP API, and run a scheduled pass every minute.
    Serve {
        /// Address on which the HTTP API listens.
        #[clap(long = "listen", env = "API_LISTEN", default_value = "127.0.0.1:8080")]
        listen: String,
    },
    /// Store a snapshot of current state alongside the event log.
    Snapshot,
}

#[derive(Debug, clap::Subcommand)]
enum AlertCommand {
    /// Raise an alert.
    Mk { subject: String, details: String },
    /// List active alerts.
    Ls,
    /// Acknowledge an alert.
    Ack { id: String },
}

#[derive(Debug, clap::Subcommand)]
enum SwitchCommand {
    /// List dead man's switches.
    Ls {
        /// List only switches which have expired.
        #[clap(long)]
        expired: bool,
    },
    /// Remove a switch.
    Rm { subject: String },
    /// Check in a switch, which must next check in before `ttl`.
    ///
    /// `ttl` is one of `+24h` (relative to now), `+1d@09:00` (tomorrow at
    /// 09:00 UTC), or an RFC3339 timestamp.
    Checkin { subject: String, ttl: String },
}

#[derive(Debug, clap::Subcommand)]
enum MonitorCommand {
    /// List HTTP monitors.
    Ls,
    /// Create an HTTP monitor, which expects `find` within the body of `url`.
    Mk { url: String, find: String },
    /// Remove an HTTP monitor.
    Rm { id: String },
    /// Enable a disabled HTTP monitor.
    Enable { id: String },
    /// Temporarily disable an HTTP monitor.
    Disable { id: String },
    /// Scan all enabled monitors, and raise alerts for failures.
    Scan,
}

type AlertManager = App<Journal, Sender>;

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::debug!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args));

    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let journal = match &args.journal {
        Some(path) => {
            let log = FileLog::new(path);
            tracing::debug!(path = ?log.path(), "using file journal");
            Journal::File(log)
        }
        None => {
            tracing::warn!("no --journal was given, and events will be held only in memory");
            Journal::Memory(MemoryLog::new())
        }
    };
    let sender = match &args.notify_webhook {
        Some(url) => Sender::webhook(url.clone(), reqwest::Client::new()),
        None => Sender::Disabled,
    };
    let config = Config {
        max_active_alerts: args.max_active_alerts,
        api_endpoint: args.api_endpoint.as_str().trim_end_matches('/').to_string(),
    };
    let scan_config = ScanConfig {
        workers: args.scan_workers,
        timeout: args.scan_timeout,
        retry_timeout: args.scan_retry_timeout,
    };

    let app = App::load(journal, sender, config)
        .await
        .context("loading alertmanager state")?;

    // Cancelled when the process is interrupted.
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("caught interrupt, shutting down");
                cancel.cancel();
            }
        }
    });

    match args.command {
        Command::Alert { cmd } => alert_command(&app, cmd).await,
        Command::Dms { cmd } => switch_command(&app, cmd).await,
        Command::Hm { cmd } => monitor_command(&app, cmd, &scan_config, &cancel).await,
        Command::Scheduler => {
            let probe = HttpProbe::new()?;
            let outcome = app
                .run_scheduled(Utc::now(), &probe, &scan_config, &cancel)
                .await?;
            tracing::info!(?outcome, "completed scheduled pass");
            Ok(())
        }
        Command::Serve { listen } => serve(app, &listen, scan_config, cancel).await,
        Command::Snapshot => {
            let cursor = app.save_snapshot().await?;
            println!("Stored snapshot at {cursor}");
            Ok(())
        }
    }
}

async fn alert_command(app: &AlertManager, cmd: AlertCommand) -> anyhow::Result<()> {
    match cmd {
        AlertCommand::Mk { subject, details } => {
            let alert = app.raise(&subject, &details, Utc::now()).await?;
            println!("Raised alert {}", alert.id);
        }
        AlertCommand::Ls => {
            let mut table = new_table(vec!["Id", "Raised", "Subject", "Details"]);
            for alert in app.active_alerts() {
                table.add_row(vec![
                    alert.id,
                    alert.raised_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    alert.subject,
                    alertmanager::notify::truncate(&alert.details.replace('\n', " "), 50),
                ]);
            }
            println!("{table}");
        }
        AlertCommand::Ack { id } => {
            app.acknowledge(&id, Utc::now()).await?;
            println!("Acknowledged alert {id}");
        }
    }
    Ok(())
}

async fn switch_command(app: &AlertManager, cmd: SwitchCommand) -> anyhow::Result<()> {
    let now = Utc::now();

    match cmd {
        SwitchCommand::Ls { expired } => {
            let switches = if expired {
                app.expired_dead_mans_switches(now)
            } else {
                app.dead_mans_switches()
            };

            let mut table = new_table(vec!["Subject", "TTL", "Expired"]);
            for switch in switches {
                let expired = if switch.is_expired(now) { "yes" } else { "" };
                table.add_row(vec![
                    switch.subject,
                    switch.ttl.to_rfc3339_opts(SecondsFormat::Secs, true),
                    expired.to_string(),
                ]);
            }
            println!("{table}");
        }
        SwitchCommand::Rm { subject } => {
            app.delete_switch(&subject, now).await?;
        }
        SwitchCommand::Checkin { subject, ttl } => {
            if app.checkin_spec(&subject, &ttl, now).await? {
                println!("Check-in noted, and the alert which was firing for it was acknowledged");
            }
        }
    }
    Ok(())
}

async fn monitor_command(
    app: &AlertManager,
    cmd: MonitorCommand,
    scan_config: &ScanConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let now = Utc::now();

    match cmd {
        MonitorCommand::Ls => {
            let mut table = new_table(vec!["Id", "Enabled", "Created", "URL", "Find"]);
            for monitor in app.http_monitors() {
                table.add_row(vec![
                    monitor.id,
                    monitor.enabled.to_string(),
                    monitor.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    monitor.url,
                    monitor.find,
                ]);
            }
            println!("{table}");
        }
        MonitorCommand::Mk { url, find } => {
            let monitor = app.create_monitor(&url, &find, now).await?;
            println!("Created monitor {}", monitor.id);
        }
        MonitorCommand::Rm { id } => app.delete_monitor(&id, now).await?,
        MonitorCommand::Enable { id } => app.set_monitor_enabled(&id, true, now).await?,
        MonitorCommand::Disable { id } => app.set_monitor_enabled(&id, false, now).await?,
        MonitorCommand::Scan => {
            let probe = HttpProbe::new()?;
            let raised = app
                .scan_monitors_and_ingest_failures(&probe, scan_config, cancel, now)
                .await?;
            tracing::info!(%raised, "completed monitor scan");
        }
    }
    Ok(())
}

async fn serve(
    app: AlertManager,
    listen: &str,
    scan_config: ScanConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = Arc::new(app);
    let probe = HttpProbe::new()?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind server address {listen}"))?;
    tracing::info!(addr = %listener.local_addr()?, "serving API");

    let server = {
        let cancel = cancel.clone();
        axum::serve(listener, api::router(app.clone()))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
    };
    let server = async move { server.await.context("serving API") };

    let scheduler = async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => (),
            }
            match app
                .run_scheduled(Utc::now(), &probe, &scan_config, &cancel)
                .await
            {
                Ok(_) => (),
                Err(alertmanager::Error::Cancelled) => return,
                Err(err) => tracing::error!(error = ?err, "scheduled pass failed"),
            }
        }
    };

    let (result, ()) = tokio::join!(server, scheduler);
    result
}

fn new_table(headers: Vec<&str>) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .apply_modifier(comfy_table::modifiers::UTF8_SOLID_INNER_BORDERS);

    table.set_header(headers);
    table
}

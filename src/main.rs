mod api;
mod dispatcher;
mod poller;
#[cfg(test)]
mod testutil;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dispatcher::{DispatchRequest, Dispatcher};
use poller::{HttpStatusProbe, PollEnd, StatusPoller};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wadispatch_channels::whatsapp::{self, WhatsAppConnector};
use wadispatch_core::{
    config::{self, shellexpand, Config},
    credentials::{self, CredentialSource, Credentials},
    engine::DeliveryEngine,
    policy::DeliveryPolicy,
    target::TargetKind,
};
use wadispatch_memory::Store;

#[derive(Parser)]
#[command(
    name = "wadispatch",
    version,
    about = "Bulk WhatsApp dispatch with paced, retrying delivery"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", env = "WADISPATCH_CONFIG")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control server.
    Serve,
    /// Link a new device by QR code and write its credentials file.
    Pair {
        /// Where to write the credential JSON.
        #[arg(long)]
        out: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Run one dispatch in the foreground.
    Send {
        /// Credential JSON file. Defaults to the server-side sources.
        #[arg(long)]
        creds: Option<PathBuf>,
        /// Your own phone number (fallback target).
        #[arg(long)]
        phone: String,
        /// A target phone number or group id. Repeatable.
        #[arg(long = "target")]
        targets: Vec<String>,
        /// File with one target per line.
        #[arg(long, conflicts_with = "targets")]
        targets_file: Option<PathBuf>,
        /// Message text; each non-blank line is sent separately.
        #[arg(long, required_unless_present = "message_file")]
        message: Option<String>,
        /// File holding the message text.
        #[arg(long, conflicts_with = "message")]
        message_file: Option<PathBuf>,
        /// Treat targets as group ids.
        #[arg(long)]
        group: bool,
        /// Delay between lines in milliseconds (targets wait twice this).
        #[arg(long)]
        delay: Option<u64>,
        /// Retry failed sends.
        #[arg(long)]
        retry: bool,
        /// Retries per message when --retry is set (1-5).
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Watch a running server's status until it reports disconnected.
    Watch {
        /// Server base URL. Defaults to the configured API address.
        #[arg(long)]
        url: Option<String>,
        /// Seconds between polls.
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    let _log_guard = init_logging(&cfg, matches!(cli.command, Commands::Serve))?;

    match cli.command {
        Commands::Serve => {
            let dispatcher = Arc::new(build_dispatcher(&cfg).await?);
            info!("wadispatch starting");
            api::serve(&cfg, dispatcher).await?;
        }
        Commands::Pair { out, force } => {
            if out.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", out.display());
            }
            let sessions_dir = PathBuf::from(shellexpand(&cfg.whatsapp.sessions_dir));
            println!("Open WhatsApp > Linked devices > Link a device, then scan:\n");
            let blob = whatsapp::pair(&sessions_dir, |code| {
                match whatsapp::render_qr_terminal(code) {
                    Ok(qr) => println!("{qr}"),
                    Err(e) => eprintln!("cannot render QR ({e}); raw data: {code}"),
                }
            })
            .await?;
            write_credentials(&out, &blob)?;
            println!("Paired. Credentials written to {}", out.display());
        }
        Commands::Send {
            creds,
            phone,
            targets,
            targets_file,
            message,
            message_file,
            group,
            delay,
            retry,
            max_retries,
        } => {
            let credentials = match creds {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Credentials::parse(&text, CredentialSource::Upload)?
                }
                None => credentials::resolve(&cfg.credentials, None)?,
            };
            let target_phones = match targets_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => targets.join("\n"),
            };
            let message = match (message, message_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("either --message or --message-file is required"),
            };
            let policy = DeliveryPolicy::new(
                delay.unwrap_or(cfg.delivery.default_delay_ms),
                retry,
                max_retries.unwrap_or(cfg.delivery.default_max_retries),
            )?;

            let dispatcher = build_dispatcher(&cfg).await?;
            let handle = dispatcher
                .start(DispatchRequest {
                    credentials,
                    user_phone: phone,
                    target_kind: if group {
                        TargetKind::Group
                    } else {
                        TargetKind::Individual
                    },
                    target_phones,
                    message,
                    policy,
                })
                .await?;
            let session_id = handle.session_id().to_string();
            let result = handle.join().await;
            dispatcher.stop().await?;

            let outcome = result?;
            println!(
                "Session {session_id}: {} message(s) sent in {} attempt(s)",
                outcome.sent, outcome.attempts
            );
        }
        Commands::Watch { url, interval } => {
            let base = url.unwrap_or_else(|| format!("http://{}:{}", cfg.api.host, cfg.api.port));
            let api_key = (!cfg.api.api_key.is_empty()).then(|| cfg.api.api_key.clone());
            let poller = StatusPoller::new(
                HttpStatusProbe::new(&base, api_key),
                Duration::from_secs(interval.max(1)),
            );
            println!("Watching {base} every {}s", interval.max(1));

            let end = poller.run(|state| println!("status: {state}")).await;
            if end == PollEnd::Disconnected {
                println!("WhatsApp disconnected. Messaging has stopped.");
            }
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// With `to_file`, logs are also written to `{data_dir}/logs/wadispatch.log`.
fn init_logging(
    cfg: &Config,
    to_file: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level));

    if !to_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    }

    let log_dir = PathBuf::from(shellexpand(&cfg.general.data_dir)).join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(&log_dir, "wadispatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

async fn build_dispatcher(cfg: &Config) -> anyhow::Result<Dispatcher> {
    let store = Store::new(&cfg.memory).await?;
    let connector = WhatsAppConnector::new(
        &cfg.whatsapp,
        Duration::from_secs(cfg.delivery.connect_timeout_secs),
    );
    let engine = DeliveryEngine::new(Duration::from_millis(cfg.delivery.retry_backoff_ms));
    Ok(Dispatcher::new(Arc::new(connector), store, engine))
}

fn write_credentials(path: &Path, blob: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, blob).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

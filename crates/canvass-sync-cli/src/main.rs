//! canvass-sync - command-line front end for the offline contact outbox.
//!
//! Wires the core library against the on-disk database, the CRM's REST
//! endpoint and the response cache, for inspecting and draining the outbox
//! from a terminal.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use reqwest::header::ACCEPT;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use canvass_sync_core::connectivity::probe_endpoint;
use canvass_sync_core::models::{ContactDraft, ContactOutcome, ContactType};
use canvass_sync_core::worker::{
    FetchError, Fetcher, JsonCacheStorage, LocalClients, ReqwestFetcher,
};
use canvass_sync_core::{
    ApiClient, CacheController, Config, FetchRequest, FetchResponse, LocalDatabase, SyncManager,
    SystemClock, WatchConnectivity,
};

/// Directory under the data dir holding the response caches.
const RESPONSE_CACHE_DIR: &str = "responses";

/// Log file name prefix for the daily rolling appender.
const LOG_FILE_PREFIX: &str = "canvass-sync.log";

#[derive(Parser, Debug)]
#[command(name = "canvass-sync", version, about = "Offline contact outbox for field canvassing")]
struct Cli {
    /// Skip the connectivity probe and act as if the network is down
    #[arg(long, global = true)]
    offline: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connectivity and outbox counts
    Status,
    /// Replay the outbox against the server
    Drain,
    /// Record a contact (queued when offline)
    LogContact {
        #[arg(long)]
        voter: String,
        /// PHONE_CALL, SMS, WHATSAPP, EMAIL, DOOR_KNOCK, MEETING or OTHER
        #[arg(long = "type", default_value = "PHONE_CALL")]
        contact_type: String,
        /// POSITIVE, NEUTRAL, NEGATIVE, NO_ANSWER, CALLBACK or ATTEMPTED
        #[arg(long, default_value = "ATTEMPTED")]
        outcome: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        campaign: Option<String>,
    },
    /// List voters, refreshing the local copy when online
    Voters {
        #[arg(long)]
        campaign: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List abandoned outbox items, or put one back in the outbox
    DeadLetters {
        #[arg(long, value_name = "ID")]
        requeue: Option<String>,
    },
    /// Wipe all local data
    Clear,
    /// Fetch a URL through the response cache
    Fetch {
        url: String,
        /// Send as a page navigation (Accept: text/html)
        #[arg(long)]
        html: bool,
    },
}

/// Initialize the tracing subscriber. The returned guard flushes the log
/// file on drop and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Stand-in network for `--offline`: every request fails.
struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        Err(FetchError::Network("offline".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let mut config = Config::load()?;
    config.apply_env();
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => config.data_dir()?,
    };
    debug!(data_dir = %data_dir.display(), api = %config.api_base_url, "Starting");

    if let Command::Fetch { url, html } = &cli.command {
        return fetch(&config, &data_dir, url, *html, cli.offline).await;
    }

    let mut api = ApiClient::new(&config.api_base_url)?;
    if let Ok(token) = std::env::var("CANVASS_TOKEN") {
        if !token.is_empty() {
            api.set_token(token);
        }
    }

    let online = if cli.offline {
        false
    } else {
        probe_endpoint(&reqwest::Client::new(), &config.api_base_url).await
    };
    info!(online, "Connectivity probed");

    let db = LocalDatabase::open(&data_dir)
        .with_context(|| format!("Failed to open local database in {}", data_dir.display()))?;
    let sync = SyncManager::new(
        db,
        Arc::new(api),
        Arc::new(WatchConnectivity::new(online)),
        Arc::new(SystemClock),
        config.sync.clone(),
    );

    match cli.command {
        Command::Status => {
            let pending = sync.get_pending_sync_count().await?;
            let dead = sync.dead_letters().await?.len();
            let unsynced = sync.database().contacts().find_by("synced", "false").await?.len();
            println!("online:        {}", if online { "yes" } else { "no" });
            println!("pending sync:  {}", pending);
            println!("unsynced:      {}", unsynced);
            println!("dead letters:  {}", dead);
        }
        Command::Drain => {
            let report = sync.sync_pending_data().await?;
            if report.skipped {
                println!("Nothing attempted (offline or another drain is running)");
            } else {
                println!(
                    "synced {}, failed {}, abandoned {}",
                    report.synced, report.failed, report.abandoned
                );
            }
        }
        Command::LogContact {
            voter,
            contact_type,
            outcome,
            notes,
            campaign,
        } => {
            let contact_type = ContactType::parse(&contact_type)
                .ok_or_else(|| anyhow::anyhow!("Unknown contact type: {}", contact_type))?;
            let outcome = ContactOutcome::parse(&outcome)
                .ok_or_else(|| anyhow::anyhow!("Unknown outcome: {}", outcome))?;
            let draft = ContactDraft {
                voter_id: voter,
                campaign_id: campaign_id(&config, campaign)?,
                contact_type,
                outcome,
                contact_date: None,
                notes,
            };
            let contact = sync.create_offline_contact(draft).await?;
            let local_id = contact.local_id.as_deref().unwrap_or("-");
            match (&contact.id, contact.synced) {
                (Some(id), true) => println!("{} synced as {}", local_id, id),
                _ => println!("{} queued for sync", local_id),
            }
        }
        Command::Voters { campaign, json } => {
            let campaign = campaign_id(&config, campaign)?;
            let voters = sync.load_voters(&campaign).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&voters)?);
            } else {
                for voter in &voters {
                    println!(
                        "{:<12} {:<30} {:<16} {:?}",
                        voter.id,
                        voter.name,
                        voter.phone.as_deref().unwrap_or("-"),
                        voter.stance
                    );
                }
                println!("{} voters", voters.len());
            }
        }
        Command::DeadLetters { requeue } => match requeue {
            Some(id) => {
                if sync.requeue_dead_letter(&id).await? {
                    println!("Requeued {}", id);
                } else {
                    anyhow::bail!("No dead letter with id {}", id);
                }
            }
            None => {
                for letter in sync.dead_letters().await? {
                    println!(
                        "{}  {}  retries={}  {}",
                        letter.id,
                        letter.abandoned_at.format("%Y-%m-%d %H:%M"),
                        letter.item.retry_count,
                        letter.item.last_error.as_deref().unwrap_or("")
                    );
                }
            }
        },
        Command::Clear => {
            sync.clear_cache().await?;
            println!("Local data cleared");
        }
        Command::Fetch { .. } => {}
    }

    Ok(())
}

fn campaign_id(config: &Config, arg: Option<String>) -> Result<String> {
    arg.or_else(|| config.campaign_id.clone())
        .ok_or_else(|| anyhow::anyhow!("No campaign given (use --campaign or CANVASS_CAMPAIGN)"))
}

async fn fetch(config: &Config, data_dir: &Path, url: &str, html: bool, offline: bool) -> Result<()> {
    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(OfflineFetcher)
    } else {
        Arc::new(ReqwestFetcher::new()?)
    };
    let storage = Arc::new(
        JsonCacheStorage::open(&data_dir.join(RESPONSE_CACHE_DIR))
            .context("Failed to open response cache")?,
    );
    let controller = CacheController::new(
        config.cache.clone(),
        fetcher,
        storage,
        Arc::new(LocalClients::new()),
    )
    .context("Invalid cache route pattern in config")?;

    let deleted = controller.activate().await;
    if !deleted.is_empty() {
        info!(?deleted, "Removed caches from previous versions");
    }

    let mut request = FetchRequest::get(url)?;
    if html {
        request = request.with_header(ACCEPT, "text/html")?;
    }
    let route = controller
        .interceptor()
        .matching_rule(&request)
        .map(|rule| rule.name())
        .unwrap_or("none");
    let response = controller.fetch(&request).await?;

    eprintln!("{} {} (route: {})", response.status, url, route);
    println!("{}", response.text());
    Ok(())
}

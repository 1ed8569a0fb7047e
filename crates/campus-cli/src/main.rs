//! `campus` CLI: logtime and evaluation slots from the command line.
//!
//! ## Usage
//!
//! ```sh
//! # Daily hours from a locations dump (end date exclusive)
//! campus hours -i locations.json --start 2026-06-01 --end 2026-06-08
//!
//! # Merged evaluation slots from a slots dump, grouped by day
//! campus slots -i slots.json --tz Europe/Paris
//!
//! # Same, as JSON
//! campus slots -i slots.json --json
//!
//! # Live data (token read from CAMPUS_TOKEN)
//! campus fetch-hours --login jdoe --days 7 --config campus.toml
//! campus fetch-slots
//! ```

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use campus_api::models::{slot_records, SlotDto};
use campus_api::{ApiClient, ApiConfig, ApiError, HoursService, MemoryTokenStore, SlotService};
use campus_engine::aggregate::{format_hours, total_hours};
use campus_engine::error::parse_timezone;
use campus_engine::slots::group_by_day;
use campus_engine::{
    aggregate, intervals_from_records, merge_slots, spawn_sweeper, BlobStore, DailyBucket,
    DisplaySlot, EngineError, FileBlobStore, LocationRecord, MemoryBlobStore, SystemClock,
    TtlCache,
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the OAuth access token for online commands.
const ENV_TOKEN: &str = "CAMPUS_TOKEN";

#[derive(Parser)]
#[command(name = "campus", version, about = "Campus logtime and evaluation slots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a locations JSON array into hours per local day
    Hours {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Day after the last day of the window (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// IANA time zone for day boundaries
        #[arg(long, default_value = "Europe/Paris")]
        tz: String,
    },
    /// Merge a slots JSON array into contiguous display runs
    Slots {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// IANA time zone used to group and print runs
        #[arg(long, default_value = "Europe/Paris")]
        tz: String,
        /// Print the merged runs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch a user's daily hours from the API
    FetchHours {
        /// User login
        #[arg(long)]
        login: String,
        /// Number of days ending today
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[command(flatten)]
        online: OnlineArgs,
    },
    /// Fetch the current user's evaluation slots from the API
    FetchSlots {
        /// Print the merged runs as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        online: OnlineArgs,
    },
}

#[derive(clap::Args)]
struct OnlineArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Persist the response cache to this file
    #[arg(long)]
    cache: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Hours {
            input,
            start,
            end,
            tz,
        } => {
            let tz = parse_timezone(&tz)?;
            if start >= end {
                return Err(EngineError::InvalidWindow { start, end }.into());
            }
            let raw = read_input(input.as_deref())?;
            let records: Vec<LocationRecord> =
                serde_json::from_str(&raw).context("Failed to parse locations JSON")?;
            let intervals = intervals_from_records(&records);
            print_hours(&aggregate(&intervals, start, end, tz));
        }
        Commands::Slots { input, tz, json } => {
            let tz = parse_timezone(&tz)?;
            let raw = read_input(input.as_deref())?;
            let dtos: Vec<SlotDto> =
                serde_json::from_str(&raw).context("Failed to parse slots JSON")?;
            print_slots(&merge_slots(&slot_records(&dtos)), tz, json)?;
        }
        Commands::FetchHours {
            login,
            days,
            online,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(fetch_hours(&login, days, &online))?;
        }
        Commands::FetchSlots { json, online } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(fetch_slots(json, &online))?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays parseable. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Everything an online command needs, plus the background sweeper.
struct Session {
    config: ApiConfig,
    client: Arc<ApiClient>,
    cache: Arc<TtlCache>,
    clock: Arc<SystemClock>,
    cancel: CancellationToken,
}

impl Session {
    async fn open(args: &OnlineArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => ApiConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ApiConfig::default(),
        }
        .with_env_overrides()
        .context("Invalid configuration")?;

        let token = std::env::var(ENV_TOKEN)
            .with_context(|| format!("{ENV_TOKEN} must hold an access token"))?;
        let tokens = Arc::new(MemoryTokenStore::with_access_token(&token));
        let client = Arc::new(ApiClient::new(config.clone(), tokens, None)?);

        let clock = Arc::new(SystemClock::new(config.tz()?));
        let store: Arc<dyn BlobStore> = match &args.cache {
            Some(path) => Arc::new(FileBlobStore::new(path.clone())),
            None => Arc::new(MemoryBlobStore::new()),
        };
        let cache = Arc::new(TtlCache::load(store, clock.clone()).await);

        let cancel = CancellationToken::new();
        spawn_sweeper(cache.clone(), config.sweep_interval(), cancel.clone());

        Ok(Self {
            config,
            client,
            cache,
            clock,
            cancel,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fetch_hours(login: &str, days: u32, args: &OnlineArgs) -> Result<()> {
    let session = Session::open(args).await?;
    let service = HoursService::new(
        session.client.clone(),
        session.cache.clone(),
        session.clock.clone(),
    );
    let hours = service.daily_hours(login, days).await.map_err(friendly)?;
    tracing::info!(login, source = ?hours.source, "hours fetched");
    print_hours(&hours.buckets);
    Ok(())
}

async fn fetch_slots(json: bool, args: &OnlineArgs) -> Result<()> {
    let session = Session::open(args).await?;
    let service = SlotService::new(session.client.clone(), session.cache.clone());
    let slots = service.my_slots().await.map_err(friendly)?;
    print_slots(&slots, session.config.tz()?, json)
}

/// Attach the user-facing message as context over the underlying error.
fn friendly(e: ApiError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

fn print_hours(buckets: &[DailyBucket]) {
    for bucket in buckets {
        println!("{}  {}", bucket.day, format_hours(bucket.hours));
    }
    println!("Total:      {}", format_hours(total_hours(buckets)));
}

fn print_slots(slots: &[DisplaySlot], tz: Tz, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(slots)?);
        return Ok(());
    }

    for (day, runs) in group_by_day(slots, tz) {
        println!("{day}");
        for run in runs {
            let state = if run.is_reserved { "booked" } else { "free" };
            println!(
                "  {}-{}  {:<6}  {} min  ids {:?}",
                run.begin.with_timezone(&tz).format("%H:%M"),
                run.end.with_timezone(&tz).format("%H:%M"),
                state,
                run.duration_minutes(),
                run.ids,
            );
        }
    }
    Ok(())
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use redrx::config::Config;
use redrx::geo::GeoDirectory;
use redrx::models::ShortLinkRecord;
use redrx::storage::{self, StorageError};
use redrx::telemetry::AuditPipeline;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "redrx-admin")]
#[command(about = "redrx link and dataset management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new short link
    Create {
        /// Short code, must be unused
        code: String,
        /// Redirect target
        url: String,
        /// Unix timestamp after which the link expires
        #[arg(long)]
        expires_at: Option<i64>,
        /// Comma-separated client addresses allowed to resolve the link
        #[arg(long, default_value = "")]
        allowed_ips: String,
        /// Show the splash page before redirecting
        #[arg(long)]
        splash: bool,
        /// Show the sensitive content warning before redirecting
        #[arg(long)]
        sensitive: bool,
        /// Do not record access events for this link
        #[arg(long)]
        no_stats: bool,
    },
    /// Print a stored link as JSON
    Show {
        code: String,
    },
    /// Print the most recent access events for a link as JSON
    Visits {
        code: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Download and load the GeoIP dataset once
    GeoRefresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Create {
            code,
            url,
            expires_at,
            allowed_ips,
            splash,
            sensitive,
            no_stats,
        } => {
            let storage = storage::connect(&config.database).await?;

            let mut record = ShortLinkRecord::new(code, url);
            record.expires_at = expires_at;
            record.allowed_ips = allowed_ips;
            record.splash_page = splash;
            record.sensitive_warning = sensitive;
            record.stats_enabled = !no_stats;

            let stored = match storage.insert_link(&record).await {
                Ok(stored) => stored,
                Err(StorageError::Conflict) => {
                    anyhow::bail!("short code '{}' is already taken", record.short_code)
                }
                Err(StorageError::Other(e)) => return Err(e),
            };

            let audit = Arc::new(AuditPipeline::audit(
                config.telemetry.audit_queue_capacity,
                Arc::clone(&storage),
            ));
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let consumer = audit.start(shutdown_rx);

            audit.log_action(
                None,
                "CREATE_LINK",
                &stored.short_code,
                &json!({ "target_url": stored.target_url, "source": "redrx-admin" }),
                "",
            );

            // Let the consumer persist the entry before stopping it
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while audit.stats().persisted + audit.stats().failed < 1
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = shutdown_tx.send(true);
            consumer.await.context("audit consumer panicked")?;

            if audit.stats().persisted < 1 {
                eprintln!("⚠ Link created but the audit entry was not recorded");
            }

            println!("✓ Created '{}' -> {}", stored.short_code, stored.target_url);
        }
        Commands::Show { code } => {
            let storage = storage::connect(&config.database).await?;
            let record = storage
                .find_by_code(&code)
                .await?
                .with_context(|| format!("short code '{code}' not found"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Visits { code, limit } => {
            let storage = storage::connect(&config.database).await?;
            let events = storage.recent_access(&code, limit.max(1)).await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Commands::GeoRefresh => {
            let directory = GeoDirectory::from_config(&config.geoip);
            if !directory.is_enabled() {
                anyhow::bail!("MAXMIND_ACCOUNT_ID and MAXMIND_LICENSE_KEY must be set");
            }

            directory.refresh().await?;
            println!(
                "✓ GeoIP dataset refreshed at {}",
                config.geoip.db_path.display()
            );
        }
    }

    Ok(())
}

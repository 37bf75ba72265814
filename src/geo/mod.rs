//! Geolocation directory with background refresh
//!
//! Readers take a short-lived `Arc` to the current snapshot under a read
//! lock. A refresh loads the new dataset outside the lock, then swaps the
//! pointer under the write lock. The superseded snapshot is released once
//! the last reader still holding it lets go.

pub mod dataset;
pub mod updater;

pub use dataset::{DatasetLoader, DatasetRecord, GeoDataset, MaxMindLoader};
pub use updater::{DatasetUpdater, GeoIpUpdateCommand};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::GeoIpConfig;

/// Country, region and city for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub region: String,
    pub city: String,
}

impl GeoLocation {
    fn country_only(country: &str) -> Self {
        Self {
            country: country.to_string(),
            region: String::new(),
            city: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::country_only("Unknown")
    }

    pub fn localhost() -> Self {
        Self {
            country: "Localhost".to_string(),
            region: "Local".to_string(),
            city: "Local".to_string(),
        }
    }
}

/// One loaded dataset and when it was installed
pub struct GeoSnapshot {
    dataset: Box<dyn GeoDataset>,
    loaded_at: DateTime<Utc>,
}

impl GeoSnapshot {
    pub fn new(dataset: Box<dyn GeoDataset>) -> Self {
        Self {
            dataset,
            loaded_at: Utc::now(),
        }
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn lookup(&self, address: &str) -> GeoLocation {
        let ip: IpAddr = match address.parse() {
            Ok(ip) => ip,
            Err(_) => return GeoLocation::country_only("Invalid IP"),
        };

        match self.dataset.lookup(ip) {
            Ok(Some(record)) => {
                let country = record
                    .country_name
                    .filter(|name| !name.is_empty())
                    .or(record.country_code.filter(|code| !code.is_empty()))
                    .unwrap_or_else(|| "Unknown".to_string());

                GeoLocation {
                    country,
                    region: record.region.unwrap_or_default(),
                    city: record.city.unwrap_or_default(),
                }
            }
            Ok(None) => GeoLocation::unknown(),
            Err(e) => {
                error!(ip = %address, error = %e, "GeoIP: Lookup error");
                GeoLocation::country_only("Error")
            }
        }
    }
}

struct Source {
    db_path: PathBuf,
    updater: Arc<dyn DatasetUpdater>,
    loader: Arc<dyn DatasetLoader>,
}

/// Swappable geolocation dataset shared by the access pipeline
pub struct GeoDirectory {
    source: Option<Source>,
    current: RwLock<Option<Arc<GeoSnapshot>>>,
}

impl GeoDirectory {
    /// A directory that never loads anything; every lookup is "Unknown".
    pub fn disabled() -> Self {
        Self {
            source: None,
            current: RwLock::new(None),
        }
    }

    pub fn new(
        db_path: impl Into<PathBuf>,
        updater: Arc<dyn DatasetUpdater>,
        loader: Arc<dyn DatasetLoader>,
    ) -> Self {
        Self {
            source: Some(Source {
                db_path: db_path.into(),
                updater,
                loader,
            }),
            current: RwLock::new(None),
        }
    }

    /// Build from configuration; missing credentials disable the directory.
    pub fn from_config(config: &GeoIpConfig) -> Self {
        let (Some(account_id), Some(license_key)) = (&config.account_id, &config.license_key)
        else {
            warn!("GeoIP: MaxMind credentials not set. Lookups will be disabled.");
            return Self::disabled();
        };

        let database_dir = config
            .db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let updater = GeoIpUpdateCommand {
            binary: config.update_binary.clone(),
            account_id: account_id.clone(),
            license_key: license_key.clone(),
            edition_ids: config.edition_ids.clone(),
            database_dir,
        };

        Self::new(config.db_path.clone(), Arc::new(updater), Arc::new(MaxMindLoader))
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// The snapshot new readers will see, if one is loaded
    pub fn current_snapshot(&self) -> Option<Arc<GeoSnapshot>> {
        self.current.read().clone()
    }

    /// Resolve an address to country/region/city. Never performs I/O.
    pub fn lookup(&self, address: &str) -> GeoLocation {
        if address
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
        {
            return GeoLocation::localhost();
        }

        match self.current_snapshot() {
            Some(snapshot) => snapshot.lookup(address),
            None => GeoLocation::unknown(),
        }
    }

    /// Run the external update, then load and install the refreshed dataset.
    ///
    /// On failure the current snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let source = self.source()?;
        source.updater.update().await?;
        self.reload().await
    }

    /// Load the dataset file as it is on disk and install it.
    pub async fn reload(&self) -> Result<()> {
        let source = self.source()?;
        let loader = Arc::clone(&source.loader);
        let path = source.db_path.clone();

        let dataset = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .context("dataset load task panicked")??;

        if let Some(epoch) = dataset.build_epoch() {
            info!(path = %source.db_path.display(), epoch, "GeoIP: Loaded database");
        } else {
            info!(path = %source.db_path.display(), "GeoIP: Loaded database");
        }

        self.install(GeoSnapshot::new(dataset));
        Ok(())
    }

    fn install(&self, snapshot: GeoSnapshot) {
        let previous = {
            let mut current = self.current.write();
            current.replace(Arc::new(snapshot))
        };
        // Released outside the lock; readers still holding it keep it alive
        drop(previous);
    }

    /// Startup: make sure the dataset directory exists, download the dataset
    /// if the file is missing, then load whatever is on disk.
    pub async fn initialize(&self) -> Result<()> {
        let source = self.source()?;

        if let Some(dir) = source.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }

        if !tokio::fs::try_exists(&source.db_path).await.unwrap_or(false) {
            info!("GeoIP: Database missing, downloading...");
            if let Err(e) = source.updater.update().await {
                error!(error = %e, "GeoIP: Initial download failed");
            }
        }

        self.reload().await
    }

    /// Refresh on a fixed interval until `shutdown` flips to `true`.
    ///
    /// Returns immediately when the directory is disabled.
    pub async fn run_updater(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if !self.is_enabled() {
            return;
        }

        if let Err(e) = self.initialize().await {
            error!(error = %e, "GeoIP: Initial load failed");
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("GeoIP: Running scheduled update...");
                    if let Err(e) = self.refresh().await {
                        error!(error = %e, "GeoIP: Update failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("GeoIP: Updater stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Spawn [`run_updater`](Self::run_updater) on the runtime
    pub fn start_updater(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let directory = Arc::clone(self);
        tokio::spawn(async move { directory.run_updater(interval, shutdown).await })
    }

    fn source(&self) -> Result<&Source> {
        self.source
            .as_ref()
            .context("GeoIP directory is disabled (no credentials configured)")
    }
}

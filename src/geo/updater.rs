//! External dataset update primitive
//!
//! The update itself is delegated to MaxMind's `geoipupdate` tool; this
//! module only feeds it a short-lived config file and reports the outcome.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Brings the dataset file on disk up to date.
#[async_trait]
pub trait DatasetUpdater: Send + Sync {
    async fn update(&self) -> Result<()>;
}

/// Runs `geoipupdate -v -f <conf> -d <dir>`
#[derive(Debug, Clone)]
pub struct GeoIpUpdateCommand {
    pub binary: String,
    pub account_id: String,
    pub license_key: String,
    pub edition_ids: String,
    pub database_dir: PathBuf,
}

impl GeoIpUpdateCommand {
    fn config_contents(&self) -> String {
        format!(
            "AccountID {}\nLicenseKey {}\nEditionIDs {}\nDatabaseDirectory {}\n",
            self.account_id,
            self.license_key,
            self.edition_ids,
            self.database_dir.display()
        )
    }

    fn config_path(&self) -> PathBuf {
        self.database_dir.join("GeoIP.conf")
    }

    async fn run(&self, conf_path: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-v")
            .arg("-f")
            .arg(conf_path)
            .arg("-d")
            .arg(&self.database_dir)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            bail!(
                "{} failed: {}, output: {}",
                self.binary,
                output.status,
                combined.trim()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl DatasetUpdater for GeoIpUpdateCommand {
    async fn update(&self) -> Result<()> {
        let conf_path = self.config_path();

        tokio::fs::create_dir_all(&self.database_dir)
            .await
            .with_context(|| format!("failed to create {}", self.database_dir.display()))?;

        tokio::fs::write(&conf_path, self.config_contents())
            .await
            .context("failed to write GeoIP.conf")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&conf_path, std::fs::Permissions::from_mode(0o600))
                .await
                .context("failed to restrict GeoIP.conf permissions")?;
        }

        let result = self.run(&conf_path).await;
        let _ = tokio::fs::remove_file(&conf_path).await;
        result?;

        info!("GeoIP: Database updated successfully");
        Ok(())
    }
}

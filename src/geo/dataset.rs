//! Loadable geolocation datasets
//!
//! The directory only needs two things from a dataset file: open it and look
//! addresses up in it. MaxMind MMDB is the production format.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::path::Path;

/// Raw fields found for an address, before fallbacks are applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetRecord {
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// A loaded, read-only dataset.
///
/// Resources are released when the value is dropped.
pub trait GeoDataset: Send + Sync {
    /// `Ok(None)` when the address is not covered by the dataset
    fn lookup(&self, ip: IpAddr) -> Result<Option<DatasetRecord>>;

    /// Build timestamp reported by the dataset, if any
    fn build_epoch(&self) -> Option<u64> {
        None
    }
}

/// Opens a dataset file into a [`GeoDataset`]
pub trait DatasetLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn GeoDataset>>;
}

/// MaxMind GeoLite2/GeoIP2 City or Country database, memory-mapped
pub struct MaxMindDataset {
    reader: Reader<Mmap>,
}

impl MaxMindDataset {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP database at {}", path.display()))?;
        Ok(Self { reader })
    }
}

impl GeoDataset for MaxMindDataset {
    fn lookup(&self, ip: IpAddr) -> Result<Option<DatasetRecord>> {
        let result = self
            .reader
            .lookup(ip)
            .with_context(|| format!("GeoIP lookup failed for {ip}"))?;

        // The City decoder also reads Country databases; city and
        // subdivision fields are simply absent there.
        let Some(city) = result
            .decode::<geoip2::City>()
            .with_context(|| format!("Failed to decode GeoIP record for {ip}"))?
        else {
            return Ok(None);
        };

        Ok(Some(DatasetRecord {
            country_name: city.country.names.english.map(|s| s.to_string()),
            country_code: city.country.iso_code.map(|s| s.to_string()),
            region: city
                .subdivisions
                .first()
                .and_then(|subdivision| subdivision.names.english.map(|s| s.to_string())),
            city: city.city.names.english.map(|s| s.to_string()),
        }))
    }

    fn build_epoch(&self) -> Option<u64> {
        Some(self.reader.metadata.build_epoch)
    }
}

/// Loader for MMDB files
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxMindLoader;

impl DatasetLoader for MaxMindLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn GeoDataset>> {
        Ok(Box::new(MaxMindDataset::open(path)?))
    }
}

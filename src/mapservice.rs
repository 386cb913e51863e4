//! Genetic map lookup.
//!
//! [`GeneticMapService`] is what the rate computation needs from a map
//! provider: whether a chromosome's map is available locally, a way to fetch
//! it, and its (position, rate) breakpoints. [`HapMapCache`] implements it
//! over a directory of per-chromosome HapMap files that is filled over HTTP on
//! demand.

use indexmap::indexmap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::recmap::{Position, RateMap, RecMap, RecMapError};

pub const DEFAULT_MAP_ID: &str = "HapMapII_GRCh37";

#[derive(Error, Debug)]
pub enum MapServiceError {
    #[error("map for {0} is not cached and no download URL is configured")]
    NoSource(String),
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("map for {0} is not cached")]
    NotCached(String),
    #[error("{0}")]
    RecMap(#[from] RecMapError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub trait GeneticMapService {
    /// Whether the map for `chrom` is available without fetching.
    fn is_cached(&self, chrom: &str) -> bool;

    /// Fetch the map for `chrom` into the local cache.
    fn download(&self, chrom: &str) -> Result<(), MapServiceError>;

    /// The breakpoints and rates of `chrom`, extended to `sequence_length`.
    fn chromosome_map(&self, chrom: &str, sequence_length: Position)
        -> Result<RateMap, MapServiceError>;
}

/// A local cache of HapMap-format genetic maps, one file per chromosome.
///
/// Files live at `<cache_dir>/<map_id>/genetic_map_<assembly>_<chrom>.txt`,
/// where the assembly is the last `_`-separated part of the map id
/// (`HapMapII_GRCh37` gives `GRCh37`). Missing files are fetched from
/// `<base_url>/<file name>`.
pub struct HapMapCache {
    cache_dir: PathBuf,
    map_id: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl HapMapCache {
    /// Create a cache of HapMap format recombination maps.
    ///
    /// # Arguments
    ///
    /// * `cache_dir`: root directory; maps go in a subdirectory per map id.
    /// * `map_id`: map set name ending in its assembly, e.g. `HapMapII_GRCh37`.
    /// * `base_url`: where missing maps are downloaded from. With `None`, an
    ///   uncached map is an error.
    /// * `timeout`: limit on each download request.
    pub fn new(
        cache_dir: impl AsRef<Path>,
        map_id: &str,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            map_id: map_id.to_string(),
            base_url,
            timeout,
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    fn file_name(&self, chrom: &str) -> String {
        let assembly = self.map_id.rsplit('_').next().unwrap_or(&self.map_id);
        format!("genetic_map_{}_{}.txt", assembly, chrom)
    }

    /// Where the map of `chrom` is (or would be) cached.
    pub fn map_path(&self, chrom: &str) -> PathBuf {
        self.cache_dir.join(&self.map_id).join(self.file_name(chrom))
    }

    fn url(&self, chrom: &str) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), self.file_name(chrom)))
    }
}

impl GeneticMapService for HapMapCache {
    fn is_cached(&self, chrom: &str) -> bool {
        self.map_path(chrom).is_file()
    }

    fn download(&self, chrom: &str) -> Result<(), MapServiceError> {
        let url = self
            .url(chrom)
            .ok_or_else(|| MapServiceError::NoSource(chrom.to_string()))?;
        log::info!("Downloading {} map for {} from {}", self.map_id, chrom, url);

        let download_error = |e: reqwest::Error| MapServiceError::Download {
            url: url.clone(),
            reason: e.to_string(),
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(download_error)?;
        let body = client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(download_error)?;

        // write next to the destination then rename, so a partial download
        // never looks cached
        let path = self.map_path(chrom);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = path.with_extension("part");
        fs::write(&partial, &body)?;
        fs::rename(&partial, &path)?;
        log::debug!("cached {} bytes at {}", body.len(), path.display());
        Ok(())
    }

    fn chromosome_map(
        &self,
        chrom: &str,
        sequence_length: Position,
    ) -> Result<RateMap, MapServiceError> {
        if !self.is_cached(chrom) {
            return Err(MapServiceError::NotCached(chrom.to_string()));
        }
        let seqlens = indexmap! { chrom.to_string() => sequence_length };
        let rec_map = RecMap::from_hapmap(self.map_path(chrom), &seqlens)?;
        Ok(rec_map.chromosome(chrom)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache_with_fixture(dir: &Path) -> HapMapCache {
        let cache = HapMapCache::new(dir, DEFAULT_MAP_ID, None, Duration::from_secs(1));
        let path = cache.map_path("chr20");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::copy("tests/data/genetic_map_GRCh37_chr20.txt", &path).unwrap();
        cache
    }

    #[test]
    fn test_cached_map_is_read() {
        let dir = tempdir().unwrap();
        let cache = cache_with_fixture(dir.path());
        assert!(cache.map_path("chr20").ends_with("HapMapII_GRCh37/genetic_map_GRCh37_chr20.txt"));
        assert!(cache.is_cached("chr20"));
        assert!(!cache.is_cached("chr21"));

        let rate_map = cache.chromosome_map("chr20", 80_000).unwrap();
        assert_eq!(rate_map.ends.last(), Some(&80_000));
        assert_eq!(rate_map.map_pos.len(), rate_map.ends.len());
    }

    #[test]
    fn test_uncached_map_without_source() {
        let dir = tempdir().unwrap();
        let cache = HapMapCache::new(dir.path(), DEFAULT_MAP_ID, None, Duration::from_secs(1));
        assert!(matches!(
            cache.chromosome_map("chr1", 1000),
            Err(MapServiceError::NotCached(_))
        ));
        assert!(matches!(cache.download("chr1"), Err(MapServiceError::NoSource(_))));
    }

    #[test]
    fn test_unreachable_source() {
        let dir = tempdir().unwrap();
        // nothing listens on the discard port
        let cache = HapMapCache::new(
            dir.path(),
            DEFAULT_MAP_ID,
            Some("http://127.0.0.1:9/maps/".to_string()),
            Duration::from_secs(1),
        );
        assert_eq!(
            cache.url("chr1").as_deref(),
            Some("http://127.0.0.1:9/maps/genetic_map_GRCh37_chr1.txt")
        );
        assert!(matches!(cache.download("chr1"), Err(MapServiceError::Download { .. })));
        assert!(!cache.is_cached("chr1"));
    }
}

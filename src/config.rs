//! Run configuration and persistent settings.
//!
//! [`InferenceConfig`] holds the per-run choices made on the command line.
//! [`Settings`] holds where maps come from and how the engine is run, read
//! from a TOML file:
//!
//! ```toml
//! [map]
//! cache_dir = "/data/genetic_maps"
//! base_url = "https://example.org/maps/HapMapII_GRCh37"
//! map_id = "HapMapII_GRCh37"
//! timeout_secs = 300
//!
//! [engine]
//! program = "tsinfer-engine"
//! args = ["--quiet"]
//! scratch_dir = "/tmp/tsinfer-rates"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::CommandEngine;
use crate::error::InferError;
use crate::mapservice::{HapMapCache, DEFAULT_MAP_ID};

pub const DEFAULT_MA_MUT_RATE: f64 = 0.1;
pub const DEFAULT_MS_MUT_RATE: f64 = 0.01;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tskit", "tsinfer-rates")
}

/// The choices of one inference run.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceConfig {
    /// Multiplier of the base rate giving the ancestor matching mutation rate.
    pub ma_mut_rate: f64,
    /// Multiplier of the base rate giving the sample matching mutation rate.
    pub ms_mut_rate: f64,
    /// Matching precision; derived from the rates when unset.
    pub precision: Option<u32>,
    /// Engine threads, 0 for the engine's default.
    pub num_threads: usize,
    /// Raise recombination rates below this value to it.
    pub min_rate: Option<f64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            ma_mut_rate: DEFAULT_MA_MUT_RATE,
            ms_mut_rate: DEFAULT_MS_MUT_RATE,
            precision: None,
            num_threads: 0,
            min_rate: None,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<(), InferError> {
        for (name, value) in [
            ("match ancestors mutation rate", self.ma_mut_rate),
            ("match samples mutation rate", self.ms_mut_rate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(InferError::configuration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if let Some(floor) = self.min_rate {
            if !floor.is_finite() || floor <= 0.0 {
                return Err(InferError::configuration(format!(
                    "minimum rate must be positive, got {}",
                    floor
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    /// Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Where uncached maps are downloaded from; no downloads when unset.
    pub base_url: Option<String>,
    pub map_id: String,
    pub timeout_secs: u64,
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings {
            cache_dir: None,
            base_url: None,
            map_id: DEFAULT_MAP_ID.to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Kept after the run when set. When unset, the engine uses a fresh
    /// directory under the system temp directory and removes it on drop.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            program: "tsinfer-engine".to_string(),
            args: Vec::new(),
            scratch_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub map: MapSettings,
    pub engine: EngineSettings,
}

impl Settings {
    /// Parse settings from TOML text; missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, InferError> {
        toml::from_str(content)
            .map_err(|e| InferError::configuration(format!("invalid settings: {}", e)))
    }

    /// Read settings from `path`, or from `config.toml` in the platform
    /// config directory when no path is given. Without either, the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, InferError> {
        let path = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(InferError::configuration(format!(
                        "settings file {} not found",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match project_dirs().map(|dirs| dirs.config_dir().join("config.toml")) {
                Some(path) if path.is_file() => path,
                _ => {
                    log::debug!("no settings file, using defaults");
                    return Ok(Settings::default());
                }
            },
        };
        log::debug!("reading settings from {}", path.display());
        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn map_cache_dir(&self) -> PathBuf {
        match &self.map.cache_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()
                .map(|dirs| dirs.cache_dir().join("genetic_maps"))
                .unwrap_or_else(|| PathBuf::from("genetic_maps")),
        }
    }

    pub fn map_service(&self) -> HapMapCache {
        HapMapCache::new(
            self.map_cache_dir(),
            &self.map.map_id,
            self.map.base_url.clone(),
            Duration::from_secs(self.map.timeout_secs),
        )
    }

    pub fn engine(&self) -> Result<CommandEngine, InferError> {
        let program = &self.engine.program;
        let args = self.engine.args.clone();
        let engine = match &self.engine.scratch_dir {
            Some(dir) => CommandEngine::new(program, args, dir),
            None => CommandEngine::with_temp_scratch(program, args),
        };
        engine.map_err(|e| InferError::configuration(format!("cannot set up the engine: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapservice::GeneticMapService;
    use tempfile::tempdir;

    #[test]
    fn test_inference_config_validate() {
        assert!(InferenceConfig::default().validate().is_ok());
        let bad = InferenceConfig {
            ms_mut_rate: 0.0,
            ..InferenceConfig::default()
        };
        assert!(matches!(bad.validate(), Err(InferError::Configuration(_))));
        let bad_floor = InferenceConfig {
            min_rate: Some(-1e-9),
            ..InferenceConfig::default()
        };
        assert!(matches!(bad_floor.validate(), Err(InferError::Configuration(_))));
    }

    #[test]
    fn test_parse_settings() {
        let settings = Settings::from_toml(
            r#"
            [map]
            cache_dir = "/data/maps"
            base_url = "https://example.org/maps"

            [engine]
            program = "my-engine"
            args = ["--verbose"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.map.cache_dir, Some(PathBuf::from("/data/maps")));
        assert_eq!(settings.map.base_url.as_deref(), Some("https://example.org/maps"));
        assert_eq!(settings.map.map_id, DEFAULT_MAP_ID);
        assert_eq!(settings.map.timeout_secs, 300);
        assert_eq!(settings.engine.program, "my-engine");
        assert_eq!(settings.engine.args, vec!["--verbose".to_string()]);
        assert_eq!(settings.engine.scratch_dir, None);

        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
        assert!(matches!(
            Settings::from_toml("[map]\ntimeout_secs = \"soon\""),
            Err(InferError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let cache = dir.path().join("cache");
        fs::write(
            &path,
            format!("[map]\ncache_dir = {:?}\nmap_id = \"HapMapII_GRCh38\"\n", cache),
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.map_cache_dir(), cache);
        let maps = settings.map_service();
        assert_eq!(maps.map_id(), "HapMapII_GRCh38");
        assert!(!maps.is_cached("chr1"));

        assert!(matches!(
            Settings::load(Some(&dir.path().join("absent.toml"))),
            Err(InferError::Configuration(_))
        ));
    }

    #[test]
    fn test_engine_scratch_dir() {
        let engine = Settings::default().engine().unwrap();
        let temp = engine.scratch_dir().to_path_buf();
        assert!(temp.starts_with(std::env::temp_dir()));
        drop(engine);
        assert!(!temp.exists());

        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.engine.scratch_dir = Some(dir.path().join("work"));
        let engine = settings.engine().unwrap();
        assert_eq!(engine.scratch_dir(), dir.path().join("work"));
        drop(engine);
        assert!(dir.path().join("work").is_dir());
    }
}

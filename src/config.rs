use crate::pool::WorkerPolicy;
use crate::scan::ScanOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub timeout_secs: u64,
    pub progress_item_threshold: u64,
    pub progress_interval_ms: u64,
    pub excluded_paths: Vec<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            progress_item_threshold: 250,
            progress_interval_ms: 500,
            excluded_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanSettings {
    pub dry_run_by_default: bool,
    pub log_history: bool,
}

impl Default for CleanSettings {
    fn default() -> Self {
        Self {
            dry_run_by_default: true,
            log_history: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanSettings,
    pub workers: WorkerPolicy,
    pub clean: CleanSettings,
}

impl EngineConfig {
    /// Loads the TOML config, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config at {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("could not locate the config directory")?;
        Ok(dir.join("macsweep").join("config.toml"))
    }

    /// Where history, exclusions, the activity log and trash staging live.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir().context("could not locate the data directory")?;
        Ok(dir.join("macsweep"))
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            timeout: Duration::from_secs(self.scan.timeout_secs),
            progress_item_threshold: self.scan.progress_item_threshold,
            progress_interval: Duration::from_millis(self.scan.progress_interval_ms),
            excluded_paths: self.scan.excluded_paths.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = EngineConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let back: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.scan.timeout_secs, 60);
        assert_eq!(back.scan.progress_item_threshold, 250);
        assert!(back.clean.dry_run_by_default);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let raw = "[scan]\ntimeout_secs = 120\n";
        let config: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.scan.timeout_secs, 120);
        assert_eq!(config.scan.progress_interval_ms, 500);
        assert!(config.clean.log_history);
    }

    #[test]
    fn scan_options_carry_exclusions() {
        let mut config = EngineConfig::default();
        config.scan.excluded_paths.push(PathBuf::from("/Users/amy/keep"));
        let options = config.scan_options();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(options.excluded_paths.len(), 1);
    }
}

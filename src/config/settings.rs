use crate::core::proof_of_work::PowParams;
use crate::error::{BitmessageError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const POW_WORKERS_KEY: &str = "BM_POW_WORKERS";
const NONCE_TRIALS_KEY: &str = "BM_NONCE_TRIALS_PER_BYTE";
const EXTRA_BYTES_KEY: &str = "BM_EXTRA_BYTES";
const DATA_DIR_KEY: &str = "BM_DATA_DIR";

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network minimum difficulty.
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub pow_workers: usize,
    pub random_pow_start: bool,

    pub address_version: u64,
    pub stream: u64,
    /// Zero bytes demanded at the start of new ripe hashes.
    pub ripe_leading_zeros: usize,

    /// Lifetimes in seconds.
    pub msg_ttl: u64,
    pub pubkey_ttl: u64,
    pub getpubkey_ttl: u64,
    pub ack_ttl: u64,

    pub queue_max_attempts: u32,
    pub queue_retry_interval: u64,

    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            pow_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            random_pow_start: true,
            address_version: 4,
            stream: 1,
            ripe_leading_zeros: 1,
            msg_ttl: 4 * DAY,
            pubkey_ttl: 28 * DAY,
            getpubkey_ttl: 2 * DAY,
            ack_ttl: 4 * DAY,
            queue_max_attempts: 10,
            queue_retry_interval: 300,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Reads a TOML file; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` (or defaults when `None`) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    BitmessageError::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                Config::from_toml_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(workers) = env_value::<usize>(POW_WORKERS_KEY)? {
            self.pow_workers = workers;
        }
        if let Some(trials) = env_value::<u64>(NONCE_TRIALS_KEY)? {
            self.nonce_trials_per_byte = trials;
        }
        if let Some(extra) = env_value::<u64>(EXTRA_BYTES_KEY)? {
            self.extra_bytes = extra;
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nonce_trials_per_byte == 0 {
            return Err(BitmessageError::Config(
                "nonce_trials_per_byte must be positive".to_string(),
            ));
        }
        if self.pow_workers == 0 {
            return Err(BitmessageError::Config(
                "pow_workers must be positive".to_string(),
            ));
        }
        if !(3..=4).contains(&self.address_version) {
            return Err(BitmessageError::Config(format!(
                "Cannot create version {} addresses",
                self.address_version
            )));
        }
        if self.stream == 0 {
            return Err(BitmessageError::Config("stream must be positive".to_string()));
        }
        Ok(())
    }

    /// Difficulty every object we produce or accept must meet.
    pub fn network_pow_params(&self) -> PowParams {
        PowParams::new(self.nonce_trials_per_byte, self.extra_bytes)
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BitmessageError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.nonce_trials_per_byte, 1000);
        assert_eq!(config.extra_bytes, 1000);
        assert_eq!(config.address_version, 4);
        assert_eq!(config.msg_ttl, 345_600);
        assert_eq!(config.pubkey_ttl, 28 * 86_400);
        assert!(config.pow_workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            "nonce_trials_per_byte = 2000\nstream = 2\nmsg_ttl = 3600\n",
        )
        .unwrap();
        assert_eq!(config.nonce_trials_per_byte, 2000);
        assert_eq!(config.stream, 2);
        assert_eq!(config.msg_ttl, 3600);
        assert_eq!(config.extra_bytes, 1000);
        assert_eq!(config.network_pow_params().nonce_trials_per_byte, 2000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("nonce_trials_per_byte = 0"),
            Err(BitmessageError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("address_version = 2"),
            Err(BitmessageError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("stream = \"one\""),
            Err(BitmessageError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "ripe_leading_zeros = 2").unwrap();
        writeln!(file, "queue_max_attempts = 3").unwrap();
        drop(file);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.ripe_leading_zeros, 2);
        assert_eq!(config.queue_max_attempts, 3);

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}

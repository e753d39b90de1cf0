// Runtime configuration, read from the environment (and a `.env` file when present)
use crate::bfe_analysis::DEFAULT_FLOW_THRESHOLD;
use crate::bfe_models::{BFEError, Result};
use std::path::PathBuf;

pub const DEFAULT_BUCKET_URL: &str = "https://s3.amazonaws.com/hubway-data";
pub const DEFAULT_STATIONS_FILE: &str = "data/current_bluebikes_stations.csv";
pub const DEFAULT_GEOCODER_AGENT: &str = "bfe-station-geolocator";

#[derive(Debug, Clone, PartialEq)]
pub struct BFEConfig {
    pub bucket_url: String,
    pub stations_file: PathBuf,
    /// Read archives from this directory instead of the bucket.
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub flow_threshold: usize,
    pub geocoder_agent: String,
}

impl Default for BFEConfig {
    fn default() -> Self {
        BFEConfig {
            bucket_url: DEFAULT_BUCKET_URL.to_string(),
            stations_file: PathBuf::from(DEFAULT_STATIONS_FILE),
            data_dir: None,
            cache_dir: default_cache_dir(),
            flow_threshold: DEFAULT_FLOW_THRESHOLD,
            geocoder_agent: DEFAULT_GEOCODER_AGENT.to_string(),
        }
    }
}

impl BFEConfig {
    /// Loads `.env` if present, then reads `BFE_*` variables.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {:?}", path),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = BFEConfig::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("BFE_BUCKET_URL") {
            config.bucket_url = url;
        }
        if let Some(path) = get("BFE_STATIONS_FILE") {
            config.stations_file = PathBuf::from(path);
        }
        if let Some(path) = get("BFE_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(path));
        }
        if let Some(path) = get("BFE_CACHE_DIR") {
            config.cache_dir = match path.as_str() {
                "off" | "none" => None,
                _ => Some(PathBuf::from(path)),
            };
        }
        if let Some(threshold) = get("BFE_FLOW_THRESHOLD") {
            config.flow_threshold = threshold.parse().map_err(|e| {
                BFEError::InvalidInput(format!("BFE_FLOW_THRESHOLD '{}' is not a count: {}", threshold, e))
            })?;
        }
        if let Some(agent) = get("BFE_GEOCODER_AGENT") {
            config.geocoder_agent = agent;
        }

        Ok(config)
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("bfe").join("archives"))
}

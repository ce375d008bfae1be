use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use brownstone_crawler::{ConfigError, CrawlConfig};

/// Deployment settings shared by every subcommand, loaded from a YAML
/// file. A missing file is fatal before any network activity.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Root directory of the filesystem blob store.
    pub archive_root: PathBuf,

    /// Root directory of the work queue (one subdirectory per site).
    pub queue_dir: PathBuf,

    #[serde(default = "default_harvest_prefix")]
    pub harvest_prefix: String,

    #[serde(default = "default_extract_prefix")]
    pub extract_prefix: String,

    #[serde(default = "default_geoloc_prefix")]
    pub geoloc_prefix: String,

    /// Persistent geocoding cache; defaults to `geocache.json` under the
    /// archive root.
    #[serde(default)]
    pub geocache_path: Option<PathBuf>,

    /// Queue lease visibility timeout, in seconds.
    #[serde(default = "default_queue_visibility_secs")]
    pub queue_visibility_secs: u64,

    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Anonymizing proxy; omit to download directly.
    #[serde(default)]
    pub tor: Option<TorSettings>,

    #[serde(default)]
    pub geocoder: Option<GeocoderSettings>,
}

#[derive(Debug, Deserialize)]
pub struct TorSettings {
    #[serde(default = "default_socks_addr")]
    pub socks_addr: String,

    #[serde(default = "default_control_addr")]
    pub control_addr: String,

    /// Environment variable holding the control-port password, so the
    /// secret stays out of the settings file.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

#[derive(Debug, Deserialize)]
pub struct GeocoderSettings {
    pub api_key: String,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            fs::read_to_string(path).map_err(|_| ConfigError::MissingFile(path.to_path_buf()))?;
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn geocache_path(&self) -> PathBuf {
        self.geocache_path
            .clone()
            .unwrap_or_else(|| self.archive_root.join("geocache.json"))
    }
}

fn default_harvest_prefix() -> String {
    "harvest".to_string()
}

fn default_extract_prefix() -> String {
    "extract".to_string()
}

fn default_geoloc_prefix() -> String {
    "geolocation".to_string()
}

fn default_queue_visibility_secs() -> u64 {
    15 * 60
}

fn default_socks_addr() -> String {
    "127.0.0.1:9050".to_string()
}

fn default_control_addr() -> String {
    "127.0.0.1:9051".to_string()
}

fn default_password_env() -> String {
    "TOR_PASSWORD".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_settings_fill_defaults() {
        let yaml = "archive_root: /var/lib/brownstone\nqueue_dir: /var/lib/brownstone/queue\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.harvest_prefix, "harvest");
        assert_eq!(settings.crawl.identity_budget, 50);
        assert!(settings.tor.is_none());
        assert_eq!(
            settings.geocache_path(),
            PathBuf::from("/var/lib/brownstone/geocache.json")
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Settings::load(Path::new("/nonexistent/brownstone.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }
}

//! Process-level bootstrap configuration, loaded once at startup. Distinct
//! from [`crate::config::ConfigStore`], which holds the runtime-mutable
//! settings (`INV_BASE`, `CLOUD_TOKEN`, ...) that the Reconciler re-reads on
//! every tick.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub db_path: String,
    pub http_port: u16,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            db_path: "filament-sync.db".to_string(),
            http_port: 8080,
            log_filter: "info".to_string(),
        }
    }
}

/// Load configuration from (in increasing precedence) built-in defaults,
/// `config/filament-sync.toml` if present, then `FILAMENT_SYNC__*`
/// environment variables — mirroring the teacher's figment-based
/// `ConfigLoader`.
pub fn load() -> Result<AppConfig, figment::Error> {
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/filament-sync.toml"))
        .merge(Env::prefixed("FILAMENT_SYNC__").split("__"))
        .extract()
}

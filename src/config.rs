//! Configuration (C8)
//!
//! Environment-driven `AppConfig`, loaded with `config` + `dotenvy`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    pub database_url: String,

    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_book_depth")]
    pub default_book_depth: usize,

    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_symbol() -> String {
    "MAIN".to_string()
}

fn default_book_depth() -> usize {
    50
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

fn default_log_filter() -> String {
    "limitbook_engine=debug,tower_http=debug".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .set_default("bind_address", default_bind_address())?
            .set_default("symbol", default_symbol())?
            .set_default("default_book_depth", default_book_depth() as i64)?
            .set_default("snapshot_interval_ms", default_snapshot_interval_ms())?
            .set_default("log_filter", default_log_filter())?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert_eq!(default_bind_address(), "0.0.0.0:8080");
        assert_eq!(default_book_depth(), 50);
    }
}

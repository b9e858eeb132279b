mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Invalid TOML")?;
    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./mediastash.toml",
        "./config.toml",
        "~/.config/mediastash/config.toml",
        "/etc/mediastash/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    let expand = |p: &Path| -> std::path::PathBuf {
        shellexpand::tilde(&p.to_string_lossy()).into_owned().into()
    };
    config.cache.dir = expand(&config.cache.dir);
    config.refresh.records_path = expand(&config.refresh.records_path);
    if let Some(cookies) = config.tools.cookies_path.as_deref() {
        config.tools.cookies_path = Some(expand(cookies));
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let cache = &config.cache;
    if cache.extension.is_empty() || cache.extension.contains(['/', '.']) {
        anyhow::bail!("Cache extension {:?} is not a bare extension", cache.extension);
    }
    if cache.orphan_ttl_secs >= cache.ttl_secs {
        anyhow::bail!(
            "cache.orphan_ttl_secs ({}) must be shorter than cache.ttl_secs ({})",
            cache.orphan_ttl_secs,
            cache.ttl_secs
        );
    }
    if cache.sweep_interval_secs == 0 {
        anyhow::bail!("cache.sweep_interval_secs must be greater than 0");
    }

    let downloads = &config.downloads;
    if downloads.max_concurrent == 0 {
        anyhow::bail!("downloads.max_concurrent must be greater than 0");
    }
    if downloads.subscriber_capacity == 0 {
        anyhow::bail!("downloads.subscriber_capacity must be greater than 0");
    }
    if downloads.progress_interval_ms == 0 {
        anyhow::bail!("downloads.progress_interval_ms must be greater than 0");
    }

    let refresh = &config.refresh;
    if refresh.workers == 0 {
        anyhow::bail!("refresh.workers must be greater than 0");
    }
    if refresh.interval_secs == 0 {
        anyhow::bail!("refresh.interval_secs must be greater than 0");
    }
    if refresh.enabled && refresh.sources.is_empty() {
        tracing::warn!("Refresh is enabled but no sources are configured");
    }

    if let Some(cookies) = &config.tools.cookies_path {
        if !cookies.exists() {
            tracing::warn!("Cookies file does not exist: {:?}", cookies);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.extension, "mp4");
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.orphan_ttl_secs, 1800);
        assert_eq!(config.cache.max_size_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.downloads.max_concurrent, 4);
        assert_eq!(config.downloads.progress_interval_ms, 250);
        assert_eq!(config.refresh.interval_secs, 14400);
        assert_eq!(config.refresh.workers, 5);
        assert!(config.refresh.sources.is_empty());
    }

    #[test]
    fn parses_sources_and_overrides() {
        let config = parse_config(
            r#"
            [cache]
            dir = "/var/cache/mediastash"
            max_size_bytes = 1024

            [[refresh.sources]]
            name = "One"
            url = "https://example.com/one"

            [[refresh.sources]]
            name = "Two"
            url = "https://example.com/two"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.dir, Path::new("/var/cache/mediastash"));
        assert_eq!(config.cache.max_size_bytes, 1024);
        assert_eq!(config.refresh.sources.len(), 2);
        assert_eq!(config.refresh.sources[1].name, "Two");
    }

    #[test]
    fn orphan_ttl_must_be_shorter_than_ttl() {
        let err = parse_config(
            r#"
            [cache]
            ttl_secs = 600
            orphan_ttl_secs = 600
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("orphan_ttl_secs"));
    }

    #[test]
    fn rejects_zero_port_and_workers() {
        assert!(parse_config("[server]\nport = 0").is_err());
        assert!(parse_config("[refresh]\nworkers = 0").is_err());
        assert!(parse_config("[downloads]\nmax_concurrent = 0").is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/mediastash.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

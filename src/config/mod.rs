mod types;

pub use types::*;

use anyhow::{Context, Result};
use plexscan_common::Error;
use plexscan_snapshot::ExclusionSet;
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file locations, searched in order.
pub const DEFAULT_PATHS: [&str; 4] = [
    "./plexscan.toml",
    "./config.toml",
    "~/.config/plexscan/config.toml",
    "/etc/plexscan/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;

    if config.cycle.first_run_scans.is_none() {
        tracing::warn!(
            "cycle.first_run_scans is not set; roots without a snapshot will be seeded \
             without scanning. Set it explicitly to silence this warning"
        );
    }

    Ok(config)
}

/// Load config from the given path or the first default location that exists
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Err(Error::configuration(format!(
        "no configuration file found (searched {})",
        DEFAULT_PATHS.join(", ")
    ))
    .into())
}

/// Parse TOML without overrides or validation.
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Apply environment overrides. Only called while loading; components never
/// read the environment themselves.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("PLEXSCAN_PLEX_URL").filter(|v| !v.is_empty()) {
        config.plex.url = url;
    }
    if let Some(token) = lookup("PLEXSCAN_PLEX_TOKEN")
        .or_else(|| lookup("PLEX_TOKEN"))
        .filter(|v| !v.is_empty())
    {
        config.plex.token = token;
    }
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    Error::configuration(msg).into()
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.roots.is_empty() {
        return Err(invalid("no roots configured"));
    }

    let url = config.plex.url.trim();
    if url.is_empty() {
        return Err(invalid("plex.url is empty"));
    }
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => {
            return Err(invalid(format!(
                "plex.url must be http or https, got scheme {:?}",
                parsed.scheme()
            )))
        }
        Err(e) => return Err(invalid(format!("plex.url {:?} is invalid: {}", url, e))),
    }

    if config.plex.token.trim().is_empty() {
        return Err(invalid(
            "plex.token is empty (set it in the config file or PLEXSCAN_PLEX_TOKEN)",
        ));
    }

    let mut seen = HashSet::new();
    for root in &config.roots {
        let id = root.root_id();
        if !seen.insert(id.clone()) {
            return Err(invalid(format!("duplicate root id {:?}", id.as_str())));
        }
        if !root.path.exists() {
            tracing::warn!("Root path does not exist: {:?}", root.path);
        }
    }

    for section in &config.sections {
        if section.id.as_str().trim().is_empty() {
            return Err(invalid("a section has an empty id"));
        }
        if section.remote_root_paths.is_empty() {
            return Err(invalid(format!("section {} has no paths", section.id)));
        }
    }

    for mapping in &config.path_mappings {
        if mapping.local.trim().is_empty() || mapping.remote.trim().is_empty() {
            return Err(invalid(format!(
                "path mapping {:?} -> {:?} has an empty prefix",
                mapping.local, mapping.remote
            )));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(invalid("retry.base_delay_ms exceeds retry.max_delay_ms"));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        return Err(invalid("retry.jitter must be between 0.0 and 1.0"));
    }

    if let Some(days) = config.snapshot.max_age_days {
        if days > MAX_SNAPSHOT_AGE_DAYS {
            return Err(invalid(format!(
                "snapshot.max_age_days must be at most {}, got {}",
                MAX_SNAPSHOT_AGE_DAYS, days
            )));
        }
    }

    ExclusionSet::new(&config.scan.exclude).map_err(anyhow::Error::from)?;

    Ok(())
}

//! Configuration loading.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use broadcaster_ipc::{BroadcastConfig, PublishTarget};

pub const ENV_RTMP_URL: &str = "BROADCASTER_RTMP_URL";
pub const ENV_STREAM_KEY: &str = "BROADCASTER_STREAM_KEY";
pub const ENV_BANDWIDTH_TEST: &str = "BROADCASTER_BANDWIDTH_TEST";

/// Load the configuration file if one is given, then apply environment
/// overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BroadcastConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: BroadcastConfig = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        None => BroadcastConfig::default(),
    };

    apply_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Override the publish target from `lookup`.
pub fn apply_overrides(config: &mut BroadcastConfig, lookup: impl Fn(&str) -> Option<String>) {
    let url = lookup(ENV_RTMP_URL);
    let key = lookup(ENV_STREAM_KEY);
    let bandwidth_test = lookup(ENV_BANDWIDTH_TEST);

    if url.is_none() && key.is_none() && bandwidth_test.is_none() {
        return;
    }

    let target = config
        .target
        .get_or_insert_with(|| PublishTarget::new("", ""));
    if let Some(url) = url {
        target.endpoint_url = url;
    }
    if let Some(key) = key {
        target.stream_key = key;
    }
    if let Some(value) = bandwidth_test {
        target.bandwidth_test = matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    debug!(target = ?config.target, "Applied environment overrides");
}
